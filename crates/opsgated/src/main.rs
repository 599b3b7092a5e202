//! opsgated - Provider Gateway Daemon
//!
//! Serves DevOps backend operations (GitHub, Jenkins, Azure, Artifactory)
//! to local tooling over a JSON-lines protocol on stdin/stdout. Logs go to
//! stderr.
//!
//! Usage:
//!   opsgated [OPTIONS] [config.toml]
//!
//! Options:
//!   --log-json  Emit logs as JSON lines
//!
//! If no config file is provided, every backend is served from canned demo
//! data.

mod config;
mod demo;
mod stdio;

use std::path::PathBuf;
use std::sync::Arc;

use opsgate_gateway::Gateway;
use opsgate_providers::{create_adapter, create_transport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::DaemonConfig;

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<PathBuf>,
    log_json: bool,
}

fn parse_args() -> Args {
    let mut result = Args {
        config_path: None,
        log_json: false,
    };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--log-json" => result.log_json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            path if !path.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(PathBuf::from(path));
            }
            other => eprintln!("opsgated: ignoring unknown argument {}", other),
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"opsgated - Provider Gateway Daemon

Usage: opsgated [OPTIONS] [config.toml]

Options:
      --log-json  Emit logs as JSON lines on stderr
  -h, --help      Print this help message

Reads one JSON command per line on stdin and answers on stdout:
  {{"id": 1, "method": "dispatch", "request": {{"backend": "github", "operation": "get_current_user"}}}}
  {{"id": 2, "method": "health"}}
  {{"id": 3, "method": "stats"}}
  {{"id": 4, "method": "operations", "backend": "jenkins"}}
  {{"id": 5, "method": "invalidate", "backend": "github", "operation": "list_commits"}}

Examples:
  # Serve canned demo data
  opsgated

  # Serve real backends
  opsgated opsgate.toml
"#
    );
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "opsgated=info,opsgate_gateway=info,opsgate_providers=info,\
         opsgate_cache=info,opsgate_resilience=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries protocol responses
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_tracing(args.log_json);

    tracing::info!("Starting opsgated (Provider Gateway Daemon)");

    let gateway = match args.config_path {
        Some(ref path) => {
            tracing::info!("Loading config from: {}", path.display());
            build_gateway(DaemonConfig::load(path)?)
        }
        None => {
            tracing::info!("No config file provided, serving demo data");
            demo::gateway()
        }
    };

    if gateway.backends().is_empty() {
        tracing::warn!("No backend is available, every dispatch will be rejected");
    }
    let sweeper = gateway.spawn_cache_sweeper();

    let gateway = Arc::new(gateway);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    stdio::serve(gateway, stdin, tokio::io::stdout()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("Input closed, shutting down");
    Ok(())
}

/// Register an adapter for every configured backend that can be reached
fn build_gateway(config: DaemonConfig) -> Gateway {
    let mut gateway = Gateway::new(config.gateway);

    for (backend, backend_config) in &config.backends {
        match create_transport(*backend, backend_config) {
            Ok(transport) => {
                gateway.register_adapter(create_adapter(*backend, transport, backend_config));
            }
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Skipping backend");
            }
        }
    }

    gateway
}
