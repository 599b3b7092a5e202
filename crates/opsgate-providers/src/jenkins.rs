//! Jenkins adapter (JSON API)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use opsgate_core::{
    ArgKind, ArgSpec, BackendError, BackendId, BackendResult, CanonicalArgs, OperationSpec,
    ProviderAdapter, ProviderOutput,
};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::shape::{reword, select, select_all};
use crate::transport::{encode_segment, RestTransport};

const JOB_NAME: ArgSpec = ArgSpec::required("job_name", ArgKind::String);

pub static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "get_jobs",
        description: "All top-level jobs",
        args: &[],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "get_build_log",
        description: "Tail of a build's console log",
        args: &[JOB_NAME, ArgSpec::optional("build_number", ArgKind::Integer)],
        default_ttl_secs: 0,
    },
    OperationSpec {
        name: "get_all_views",
        description: "All views",
        args: &[],
        default_ttl_secs: 600,
    },
    OperationSpec {
        name: "get_build_parameters",
        description: "Parameters a build ran with",
        args: &[JOB_NAME, ArgSpec::required("build_number", ArgKind::Integer)],
        default_ttl_secs: 3600,
    },
    OperationSpec {
        name: "get_queue",
        description: "Items waiting in the build queue",
        args: &[],
        default_ttl_secs: 60,
    },
    OperationSpec {
        name: "get_recent_failed_builds",
        description: "Jobs whose last build failed within the window",
        args: &[ArgSpec::with_default("hours_ago", ArgKind::Integer, "8")],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "diagnose_build_failure",
        description: "Known failure causes found in a build's console log",
        args: &[JOB_NAME, ArgSpec::optional("build_number", ArgKind::Integer)],
        default_ttl_secs: 0,
    },
];

const LAST_BUILDS_TREE: &str = "jobs[name,url,lastBuild[number,timestamp,result,url]]";

/// A console log symptom and what usually fixes it
struct FailurePattern {
    name: &'static str,
    /// Lowercase substrings, any of which marks a line as matching
    needles: &'static [&'static str],
    suggestion: &'static str,
}

static FAILURE_PATTERNS: &[FailurePattern] = &[
    FailurePattern {
        name: "Compilation errors",
        needles: &["compilation error", "compilation failure", "error: could not compile"],
        suggestion: "Fix the reported compiler errors and check the toolchain version",
    },
    FailurePattern {
        name: "Test failures",
        needles: &["tests failed", "test failures", "failed tests"],
        suggestion: "Review failing tests and the test environment configuration",
    },
    FailurePattern {
        name: "Dependency issues",
        needles: &[
            "could not resolve dependencies",
            "unable to resolve dependency",
            "dependency resolution failed",
        ],
        suggestion: "Check dependency versions and repository connectivity",
    },
    FailurePattern {
        name: "Memory errors",
        needles: &["outofmemoryerror", "out of memory", "java heap space"],
        suggestion: "Increase JVM memory allocation or reduce build parallelism",
    },
    FailurePattern {
        name: "Disk space",
        needles: &["no space left on device"],
        suggestion: "Free workspace disk space on the agent or enable workspace cleanup",
    },
    FailurePattern {
        name: "Build timeout",
        needles: &["build timed out", "timeout after", "timed out after"],
        suggestion: "Increase the build timeout or speed up slow build steps",
    },
    FailurePattern {
        name: "Permission denied",
        needles: &["permission denied", "access denied"],
        suggestion: "Verify file permissions and the agent's access rights",
    },
    FailurePattern {
        name: "Network errors",
        needles: &["connection refused", "could not resolve host", "unknownhostexception"],
        suggestion: "Check that the agent can reach the remote service",
    },
];

/// Longest log line quoted back in a diagnosis, in characters
const MAX_QUOTED_LINE: usize = 200;

/// Adapter for a Jenkins server
pub struct JenkinsAdapter {
    transport: Arc<dyn RestTransport>,
    log_tail_bytes: usize,
}

impl JenkinsAdapter {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self {
            transport,
            log_tail_bytes: 10_240,
        }
    }

    /// Limit returned console logs to their last `bytes`
    pub fn with_log_tail_bytes(mut self, bytes: usize) -> Self {
        self.log_tail_bytes = bytes;
        self
    }

    async fn get_jobs(&self) -> BackendResult<ProviderOutput> {
        let tree = [(
            "tree",
            "jobs[name,url,buildable,inQueue,lastBuild[number,url]]".to_string(),
        )];
        let root = self.transport.get_json("/api/json", &tree).await?;
        Ok(ProviderOutput::from_list(select_all(
            &root,
            "/jobs",
            &[
                ("name", "/name"),
                ("url", "/url"),
                ("is_enabled", "/buildable"),
                ("in_queue", "/inQueue"),
                ("last_build_number", "/lastBuild/number"),
                ("last_build_url", "/lastBuild/url"),
            ],
        )))
    }

    /// Sanitized console log of a build, with the build label it was fetched as
    async fn console_log(&self, args: &CanonicalArgs) -> BackendResult<(String, String)> {
        let job = args.require("job_name")?;
        let build = match args.get_i64("build_number")? {
            Some(n) if n > 0 => n.to_string(),
            _ => "lastBuild".to_string(),
        };
        let path = format!("{}/{}/consoleText", job_path(job)?, build);

        let log = self
            .transport
            .get_text(&path, &[])
            .await
            .map_err(|err| reword(err, 404, || build_not_found(job, &build)))?;
        debug!(job, build = %build, bytes = log.len(), "Fetched build log");
        Ok((build, sanitize_log(&log)))
    }

    async fn get_build_log(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (_, log) = self.console_log(args).await?;
        let excerpt = tail(&log, self.log_tail_bytes).to_string();
        Ok(ProviderOutput::new(Value::String(excerpt)))
    }

    async fn diagnose_build_failure(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (build, log) = self.console_log(args).await?;
        let findings = diagnose(&log);
        let summary = if findings.is_empty() {
            "No known failure pattern found, review the log manually".to_string()
        } else {
            format!("{} known failure pattern(s) found", findings.len())
        };
        debug!(build = %build, findings = findings.len(), "Diagnosed build log");

        Ok(ProviderOutput::new(json!({
            "job_name": args.require("job_name")?,
            "build": build,
            "summary": summary,
            "findings": findings,
            "log_excerpt": tail(&log, self.log_tail_bytes),
        })))
    }

    async fn get_all_views(&self) -> BackendResult<ProviderOutput> {
        let tree = [("tree", "views[name,url]".to_string())];
        let root = self.transport.get_json("/api/json", &tree).await?;
        Ok(ProviderOutput::from_list(select_all(
            &root,
            "/views",
            &[("name", "/name"), ("url", "/url")],
        )))
    }

    async fn get_build_parameters(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let job = args.require("job_name")?;
        let build = args.require("build_number")?;
        let path = format!("{}/{}/api/json", job_path(job)?, build);
        let tree = [("tree", "actions[parameters[name,value]]".to_string())];

        let details = self
            .transport
            .get_json(&path, &tree)
            .await
            .map_err(|err| reword(err, 404, || build_not_found(job, build)))?;

        Ok(ProviderOutput::new(Value::Object(build_parameters(&details))))
    }

    async fn get_queue(&self) -> BackendResult<ProviderOutput> {
        let queue = self.transport.get_json("/queue/api/json", &[]).await?;
        let items = select_all(
            &queue,
            "/items",
            &[
                ("id", "/id"),
                ("task", "/task/name"),
                ("url", "/task/url"),
                ("why", "/why"),
                ("in_queue_since", "/inQueueSince"),
                ("blocked", "/blocked"),
                ("stuck", "/stuck"),
            ],
        );
        let confirmed_empty = items.is_empty();
        Ok(ProviderOutput {
            value: json!({ "queue_items": items }),
            confirmed_empty,
        })
    }

    async fn get_recent_failed_builds(
        &self,
        args: &CanonicalArgs,
    ) -> BackendResult<ProviderOutput> {
        let hours = args.get_i64("hours_ago")?.unwrap_or(8);
        if hours < 0 {
            return Err(BackendError::InvalidArgument(format!(
                "hours_ago must not be negative, got {}",
                hours
            )));
        }

        let tree = [("tree", LAST_BUILDS_TREE.to_string())];
        let root = self.transport.get_json("/api/json", &tree).await?;
        let cutoff = ChronoDuration::try_hours(hours)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                BackendError::InvalidArgument(format!("hours_ago out of range: {}", hours))
            })?;
        Ok(ProviderOutput::from_list(filter_recent_failures(&root, cutoff)))
    }
}

#[async_trait]
impl ProviderAdapter for JenkinsAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Jenkins
    }

    fn operations(&self) -> &'static [OperationSpec] {
        OPERATIONS
    }

    async fn invoke(&self, operation: &str, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        match operation {
            "get_jobs" => self.get_jobs().await,
            "get_build_log" => self.get_build_log(args).await,
            "get_all_views" => self.get_all_views().await,
            "get_build_parameters" => self.get_build_parameters(args).await,
            "get_queue" => self.get_queue().await,
            "get_recent_failed_builds" => self.get_recent_failed_builds(args).await,
            "diagnose_build_failure" => self.diagnose_build_failure(args).await,
            other => Err(BackendError::UnknownOperation(format!("jenkins.{}", other))),
        }
    }
}

/// URL path of a possibly foldered job: `team/api` becomes `/job/team/job/api`
pub(crate) fn job_path(name: &str) -> BackendResult<String> {
    let path: String = name
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| format!("/job/{}", encode_segment(part)))
        .collect();
    if path.is_empty() {
        return Err(BackendError::InvalidArgument(format!(
            "Invalid job name '{}'",
            name
        )));
    }
    Ok(path)
}

fn build_not_found(job: &str, build: &str) -> String {
    match build {
        "lastBuild" => format!("Job '{}' not found or has no builds", job),
        n => format!("Build #{} not found for job '{}'", n, job),
    }
}

/// Replace control characters other than line breaks and tabs with spaces
fn sanitize_log(log: &str) -> String {
    log.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => c,
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

/// The last `max_bytes` of `text`, starting on a character boundary
fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// First log line matching each known failure pattern, in pattern order
fn diagnose(log: &str) -> Vec<Value> {
    let lowered: Vec<(usize, &str, String)> = log
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line, line.to_lowercase()))
        .collect();

    FAILURE_PATTERNS
        .iter()
        .filter_map(|pattern| {
            let (number, line, _) = lowered
                .iter()
                .find(|(_, _, lower)| pattern.needles.iter().any(|n| lower.contains(n)))?;
            Some(json!({
                "pattern": pattern.name,
                "suggestion": pattern.suggestion,
                "line_number": number,
                "line": line.trim().chars().take(MAX_QUOTED_LINE).collect::<String>(),
            }))
        })
        .collect()
}

fn build_parameters(details: &Value) -> Map<String, Value> {
    details
        .get("actions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|action| action.get("parameters").and_then(Value::as_array))
        .flatten()
        .filter_map(|param| {
            let name = param.get("name")?.as_str()?;
            Some((
                name.to_string(),
                param.get("value").cloned().unwrap_or(Value::Null),
            ))
        })
        .collect()
}

/// Jobs whose last build failed at or after `cutoff`.
///
/// Jobs without builds or without a build timestamp are skipped.
pub(crate) fn filter_recent_failures(root: &Value, cutoff: DateTime<Utc>) -> Vec<Value> {
    let cutoff_ms = cutoff.timestamp_millis();
    let mut failed = Vec::new();

    for job in root.get("jobs").and_then(Value::as_array).into_iter().flatten() {
        let name = job.get("name").and_then(Value::as_str).unwrap_or_default();
        let Some(build) = job.get("lastBuild").filter(|b| b.is_object()) else {
            continue;
        };
        let Some(timestamp) = build.get("timestamp").and_then(Value::as_i64) else {
            debug!(job = name, "Last build has no timestamp, skipping");
            continue;
        };
        if timestamp < cutoff_ms {
            continue;
        }
        if build.get("result").and_then(Value::as_str) != Some("FAILURE") {
            continue;
        }

        let number = build.get("number").cloned().unwrap_or(Value::Null);
        let url = match build.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!(
                "{}{}",
                job.get("url").and_then(Value::as_str).unwrap_or_default(),
                number
            ),
        };
        let started = DateTime::<Utc>::from_timestamp_millis(timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        failed.push(json!({
            "name": name,
            "build_number": number,
            "result": "FAILURE",
            "timestamp_utc": started,
            "url": url,
        }));
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn adapter(tail_bytes: usize) -> (Arc<MockTransport>, JenkinsAdapter) {
        let mock = Arc::new(MockTransport::new());
        let adapter = JenkinsAdapter::new(mock.clone()).with_log_tail_bytes(tail_bytes);
        (mock, adapter)
    }

    fn args(pairs: &[(&str, &str)]) -> CanonicalArgs {
        pairs.iter().copied().collect()
    }

    #[test]
    fn folder_jobs_map_to_nested_paths() {
        assert_eq!(job_path("team/api build").unwrap(), "/job/team/job/api%20build");
        assert_eq!(job_path("deploy").unwrap(), "/job/deploy");
        assert!(job_path("/").is_err());
    }

    #[rstest]
    #[case("hello", 10, "hello")]
    #[case("hello", 3, "llo")]
    // 'é' is two bytes; cutting into it moves forward
    #[case("aéb", 2, "b")]
    #[case("aéb", 3, "éb")]
    fn tail_respects_char_boundaries(#[case] log: &str, #[case] max: usize, #[case] want: &str) {
        assert_eq!(tail(log, max), want);
    }

    #[test]
    fn sanitize_keeps_line_structure() {
        assert_eq!(sanitize_log("ok\u{1b}[0m\r\n\tdone\0"), "ok [0m\r\n\tdone ");
    }

    #[tokio::test]
    async fn build_log_defaults_to_last_build_and_is_tailed() {
        let (mock, jenkins) = adapter(8);
        mock.on_text("/job/team/job/api/lastBuild/consoleText", "Started\nFinished: FAILURE");

        let out = jenkins
            .invoke("get_build_log", &args(&[("job_name", "team/api"), ("build_number", "0")]))
            .await
            .unwrap();

        assert_eq!(out.value, json!(" FAILURE"));
        assert_eq!(mock.requests()[0].path, "/job/team/job/api/lastBuild/consoleText");
    }

    #[tokio::test]
    async fn missing_build_is_not_found() {
        let (mock, jenkins) = adapter(1024);
        mock.on_error("/job/api/42/consoleText", BackendError::http(404, "Not Found"));

        let err = jenkins
            .invoke("get_build_log", &args(&[("job_name", "api"), ("build_number", "42")]))
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::http(404, "Build #42 not found for job 'api'"));
    }

    #[test]
    fn diagnosis_reports_first_matching_line_per_pattern() {
        let log = "Started by timer\n\
                   [ERROR] There were test failures\n\
                   Exception: java.lang.OutOfMemoryError: Java heap space\n\
                   [ERROR] There were test failures again\n\
                   Finished: FAILURE";

        let findings = diagnose(log);

        assert_eq!(
            findings,
            vec![
                json!({
                    "pattern": "Test failures",
                    "suggestion": "Review failing tests and the test environment configuration",
                    "line_number": 2,
                    "line": "[ERROR] There were test failures",
                }),
                json!({
                    "pattern": "Memory errors",
                    "suggestion": "Increase JVM memory allocation or reduce build parallelism",
                    "line_number": 3,
                    "line": "Exception: java.lang.OutOfMemoryError: Java heap space",
                }),
            ]
        );
    }

    #[tokio::test]
    async fn diagnosis_without_known_pattern_asks_for_manual_review() {
        let (mock, jenkins) = adapter(16);
        mock.on_text("/job/api/5/consoleText", "Started\nscript returned exit code 2\n");

        let out = jenkins
            .invoke(
                "diagnose_build_failure",
                &args(&[("job_name", "api"), ("build_number", "5")]),
            )
            .await
            .unwrap();

        assert_eq!(out.value["build"], json!("5"));
        assert_eq!(out.value["findings"], json!([]));
        assert_eq!(
            out.value["summary"],
            json!("No known failure pattern found, review the log manually")
        );
        assert_eq!(out.value["log_excerpt"], json!("ned exit code 2\n"));
    }

    #[tokio::test]
    async fn diagnosis_scans_beyond_the_returned_tail() {
        let (mock, jenkins) = adapter(8);
        mock.on_text(
            "/job/api/lastBuild/consoleText",
            "fatal: could not resolve host: git.example.com\nFinished: FAILURE",
        );

        let out = jenkins
            .invoke("diagnose_build_failure", &args(&[("job_name", "api")]))
            .await
            .unwrap();

        assert_eq!(out.value["build"], json!("lastBuild"));
        assert_eq!(out.value["findings"][0]["pattern"], json!("Network errors"));
        assert_eq!(out.value["log_excerpt"], json!(" FAILURE"));
    }

    #[tokio::test]
    async fn build_parameters_are_flattened() {
        let (mock, jenkins) = adapter(1024);
        mock.on_json(
            "/job/api/7/api/json",
            json!({"actions": [
                {"_class": "hudson.model.CauseAction"},
                {"parameters": [
                    {"name": "BRANCH", "value": "main"},
                    {"name": "DRY_RUN", "value": false}
                ]}
            ]}),
        );

        let out = jenkins
            .invoke("get_build_parameters", &args(&[("job_name", "api"), ("build_number", "7")]))
            .await
            .unwrap();

        assert_eq!(out.value, json!({"BRANCH": "main", "DRY_RUN": false}));
    }

    #[tokio::test]
    async fn empty_queue_is_confirmed_empty() {
        let (mock, jenkins) = adapter(1024);
        mock.on_json("/queue/api/json", json!({"items": []}));

        let out = jenkins.invoke("get_queue", &args(&[])).await.unwrap();

        assert_eq!(out.value, json!({"queue_items": []}));
        assert!(out.confirmed_empty);
    }

    #[test]
    fn recent_failures_respect_window_and_result() {
        let cutoff = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let inside = cutoff.timestamp_millis() + 60_000;
        let before = cutoff.timestamp_millis() - 60_000;
        let root = json!({"jobs": [
            {"name": "api", "url": "https://ci/job/api/",
             "lastBuild": {"number": 12, "timestamp": inside, "result": "FAILURE", "url": ""}},
            {"name": "web", "lastBuild": {"number": 3, "timestamp": inside, "result": "SUCCESS"}},
            {"name": "old", "lastBuild": {"number": 9, "timestamp": before, "result": "FAILURE"}},
            {"name": "never", "lastBuild": null},
            {"name": "odd", "lastBuild": {"number": 1, "result": "FAILURE"}}
        ]});

        let failed = filter_recent_failures(&root, cutoff);

        assert_eq!(
            failed,
            vec![json!({
                "name": "api",
                "build_number": 12,
                "result": "FAILURE",
                "timestamp_utc": "2024-05-01T00:01:00+00:00",
                "url": "https://ci/job/api/12",
            })]
        );
    }

    #[tokio::test]
    async fn recent_failed_builds_uses_tree_query() {
        let (mock, jenkins) = adapter(1024);
        mock.on_json("/api/json", json!({"jobs": []}));

        let out = jenkins
            .invoke("get_recent_failed_builds", &args(&[("hours_ago", "8")]))
            .await
            .unwrap();

        assert!(out.confirmed_empty);
        assert_eq!(mock.requests()[0].query_value("tree"), Some(LAST_BUILDS_TREE));
    }
}
