//! JSON-lines front-end over stdin/stdout
//!
//! One command per input line, one response per output line. Dispatches run
//! concurrently, so responses may come back out of order; the `id` of a
//! command is echoed on its response.
//!
//! ```text
//! {"id": 1, "method": "dispatch", "request": {"backend": "jenkins", "operation": "get_queue"}}
//! {"id": 2, "method": "health"}
//! {"id": 3, "method": "invalidate", "backend": "github", "operation": "list_commits"}
//! ```

use std::sync::Arc;

use opsgate_core::{BackendId, OperationRequest};
use opsgate_gateway::Gateway;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum Command {
    Dispatch { request: OperationRequest },
    Health,
    Stats,
    Operations { backend: BackendId },
    Invalidate {
        backend: BackendId,
        #[serde(default)]
        operation: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    #[serde(flatten)]
    command: Command,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: Value) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Serve commands from `input` until it is exhausted, then wait for
/// outstanding dispatches to answer
pub async fn serve<R, W>(gateway: Arc<Gateway>, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response).unwrap_or_else(|e| {
                format!(r#"{{"id":null,"error":{{"kind":"internal","message":"{}"}}}}"#, e)
                    .into_bytes()
            });
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        handle_line(&gateway, &line, &tx);
    }
    debug!("Input closed, waiting for outstanding requests");
    drop(tx);

    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}

fn handle_line(gateway: &Arc<Gateway>, line: &str, tx: &mpsc::UnboundedSender<Response>) {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed command");
            let _ = tx.send(Response::err(
                Value::Null,
                json!({"kind": "invalid_argument", "message": format!("Malformed command: {}", e)}),
            ));
            return;
        }
    };

    let id = envelope.id;
    let response = match envelope.command {
        Command::Dispatch { request } => {
            let gateway = Arc::clone(gateway);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = match gateway.dispatch(request).await {
                    Ok(value) => Response::ok(id, value),
                    Err(err) => Response::err(id, json!(err)),
                };
                let _ = tx.send(response);
            });
            return;
        }
        Command::Health => Response::ok(id, json!(gateway.health())),
        Command::Stats => Response::ok(id, json!(gateway.cache_stats())),
        Command::Operations { backend } => match gateway.operations(backend) {
            Some(catalog) => Response::ok(id, json!(catalog)),
            None => Response::err(
                id,
                json!({
                    "kind": "invalid_argument",
                    "backend": backend,
                    "message": format!("No adapter registered for backend '{}'", backend),
                }),
            ),
        },
        Command::Invalidate { backend, operation } => {
            let removed = gateway.invalidate(backend, operation.as_deref());
            Response::ok(id, json!({ "removed": removed }))
        }
    };
    let _ = tx.send(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgate_gateway::GatewayConfig;
    use opsgate_providers::{JenkinsAdapter, MockTransport};

    async fn run(gateway: Gateway, input: &str) -> Vec<Value> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        serve(Arc::new(gateway), input.as_bytes(), server)
            .await
            .unwrap();

        let mut out = String::new();
        let mut client = tokio::io::BufReader::new(client);
        while client.read_line(&mut out).await.unwrap() > 0 {}
        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn jenkins_gateway() -> Gateway {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/queue/api/json", json!({"items": []}));
        let mut gateway = Gateway::new(GatewayConfig::default());
        gateway.register_adapter(Arc::new(JenkinsAdapter::new(mock)));
        gateway
    }

    #[tokio::test]
    async fn dispatch_and_health_round_trip() {
        let responses = run(
            jenkins_gateway(),
            concat!(
                r#"{"id": 1, "method": "dispatch","#,
                r#" "request": {"backend": "jenkins", "operation": "get_queue"}}"#,
                "\n",
                r#"{"id": 2, "method": "health"}"#,
                "\n",
            ),
        )
        .await;

        assert_eq!(responses.len(), 2);
        let by_id = |id: i64| responses.iter().find(|r| r["id"] == json!(id)).unwrap();
        assert_eq!(by_id(1)["result"], json!({"queue_items": []}));
        assert_eq!(by_id(2)["result"][0]["backend"], json!("jenkins"));
        assert_eq!(by_id(2)["result"][0]["breaker"]["state"], json!("closed"));
    }

    #[tokio::test]
    async fn errors_are_canonical() {
        let responses = run(
            jenkins_gateway(),
            concat!(
                r#"{"id": "a", "method": "dispatch","#,
                r#" "request": {"backend": "github", "operation": "get_current_user"}}"#,
                "\n",
                "not json\n",
            ),
        )
        .await;

        let unregistered = responses.iter().find(|r| r["id"] == json!("a")).unwrap();
        assert_eq!(unregistered["error"]["kind"], json!("invalid_argument"));
        assert_eq!(unregistered["error"]["retriable"], json!(false));
        let malformed = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(malformed["error"]["kind"], json!("invalid_argument"));
    }
}
