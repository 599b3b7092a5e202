//! GitHub adapter (REST API v3)

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use opsgate_core::{
    ArgKind, ArgSpec, BackendError, BackendId, BackendResult, CanonicalArgs, OperationSpec,
    ProviderAdapter, ProviderOutput,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::shape::{http_matches, reword, select, select_all, strings};
use crate::transport::{encode_path, encode_segment, RestTransport};

const OWNER: ArgSpec = ArgSpec::required("owner", ArgKind::String);
const REPO: ArgSpec = ArgSpec::required("repo", ArgKind::String);
const ISSUE_NUMBER: ArgSpec = ArgSpec::required("issue_number", ArgKind::Integer);

pub static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "get_current_user",
        description: "Profile of the authenticated user",
        args: &[],
        default_ttl_secs: 3600,
    },
    OperationSpec {
        name: "search_repositories",
        description: "Search repositories",
        args: &[ArgSpec::required("query", ArgKind::String)],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "get_file_contents",
        description: "Contents of a file or directory",
        args: &[
            OWNER,
            REPO,
            ArgSpec::required("path", ArgKind::String),
            ArgSpec::optional("branch", ArgKind::String),
        ],
        default_ttl_secs: 1800,
    },
    OperationSpec {
        name: "list_commits",
        description: "Commits on a branch",
        args: &[OWNER, REPO, ArgSpec::optional("branch", ArgKind::String)],
        default_ttl_secs: 3600,
    },
    OperationSpec {
        name: "list_issues",
        description: "Issues of a repository",
        args: &[
            OWNER,
            REPO,
            ArgSpec::with_default("state", ArgKind::String, "open"),
            ArgSpec::optional("labels", ArgKind::StringList),
            ArgSpec::with_default("sort", ArgKind::String, "created"),
            ArgSpec::with_default("direction", ArgKind::String, "desc"),
        ],
        default_ttl_secs: 1800,
    },
    OperationSpec {
        name: "get_repository",
        description: "Repository metadata",
        args: &[OWNER, REPO],
        default_ttl_secs: 3600,
    },
    OperationSpec {
        name: "search_code",
        description: "Search code",
        args: &[
            ArgSpec::required("query", ArgKind::String),
            ArgSpec::with_default("sort", ArgKind::String, "indexed"),
            ArgSpec::with_default("order", ArgKind::String, "desc"),
        ],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "get_issue_details",
        description: "Issue with its comments",
        args: &[OWNER, REPO, ISSUE_NUMBER],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "get_issue_content",
        description: "Issue text and comment bodies",
        args: &[OWNER, REPO, ISSUE_NUMBER],
        default_ttl_secs: 300,
    },
];

const REPO_FIELDS: &[(&str, &str)] = &[
    ("full_name", "/full_name"),
    ("name", "/name"),
    ("owner", "/owner/login"),
    ("description", "/description"),
    ("html_url", "/html_url"),
    ("language", "/language"),
    ("private", "/private"),
    ("default_branch", "/default_branch"),
    ("stargazers_count", "/stargazers_count"),
    ("forks_count", "/forks_count"),
    ("updated_at", "/updated_at"),
];

const ENTRY_FIELDS: &[(&str, &str)] = &[
    ("name", "/name"),
    ("path", "/path"),
    ("type", "/type"),
    ("size", "/size"),
    ("sha", "/sha"),
    ("html_url", "/html_url"),
];

/// Adapter for the GitHub REST API
pub struct GithubAdapter {
    transport: Arc<dyn RestTransport>,
    page_size: u32,
}

impl GithubAdapter {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self {
            transport,
            page_size: 30,
        }
    }

    /// Items requested per page from list and search endpoints (max 100)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    fn repo_path(args: &CanonicalArgs) -> BackendResult<String> {
        Ok(format!(
            "/repos/{}/{}",
            encode_segment(args.require("owner")?),
            encode_segment(args.require("repo")?)
        ))
    }

    fn repo_not_found(args: &CanonicalArgs) -> impl FnOnce() -> String + '_ {
        move || {
            format!(
                "Repository '{}/{}' not found",
                args.get("owner").unwrap_or_default(),
                args.get("repo").unwrap_or_default()
            )
        }
    }

    async fn get_current_user(&self) -> BackendResult<ProviderOutput> {
        let user = self.transport.get_json("/user", &[]).await?;
        Ok(ProviderOutput::new(select(
            &user,
            &[
                ("login", "/login"),
                ("name", "/name"),
                ("email", "/email"),
                ("id", "/id"),
                ("html_url", "/html_url"),
                ("type", "/type"),
            ],
        )))
    }

    async fn search_repositories(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let query = [
            ("q", args.require("query")?.to_string()),
            ("per_page", self.page_size.to_string()),
        ];
        let found = self
            .transport
            .get_json("/search/repositories", &query)
            .await?;
        Ok(ProviderOutput::from_list(select_all(&found, "/items", REPO_FIELDS)))
    }

    async fn get_file_contents(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let file = args.require("path")?;
        let path = format!(
            "{}/contents/{}",
            Self::repo_path(args)?,
            encode_path(file.trim_start_matches('/'))
        );
        let query: Vec<(&str, String)> = args
            .get("branch")
            .map(|branch| ("ref", branch.to_string()))
            .into_iter()
            .collect();

        let contents = self
            .transport
            .get_json(&path, &query)
            .await
            .map_err(|err| {
                if http_matches(&err, 403, "too large") {
                    return BackendError::InvalidArgument(format!(
                        "File '{}' is too large to retrieve via the API",
                        file
                    ));
                }
                reword(err, 404, || {
                    format!(
                        "Repository '{}/{}' or path '{}' not found",
                        args.get("owner").unwrap_or_default(),
                        args.get("repo").unwrap_or_default(),
                        file
                    )
                })
            })?;

        match contents {
            Value::Array(entries) => Ok(ProviderOutput::from_list(
                entries.iter().map(|e| select(e, ENTRY_FIELDS)).collect(),
            )),
            file => Ok(ProviderOutput::new(decode_file(&file))),
        }
    }

    async fn list_commits(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let path = format!("{}/commits", Self::repo_path(args)?);
        let mut query = vec![("per_page", self.page_size.to_string())];
        if let Some(branch) = args.get("branch") {
            query.push(("sha", branch.to_string()));
        }

        let commits = match self.transport.get_json(&path, &query).await {
            Ok(commits) => commits,
            Err(err) if http_matches(&err, 409, "repository is empty") => {
                debug!(path = %path, "Repository has no commits");
                return Ok(ProviderOutput::empty_list());
            }
            Err(err) if http_matches(&err, 422, "no commit found") => {
                return Err(BackendError::http(
                    404,
                    format!(
                        "Branch or SHA '{}' not found in repository {}/{}",
                        args.get("branch").unwrap_or_default(),
                        args.get("owner").unwrap_or_default(),
                        args.get("repo").unwrap_or_default()
                    ),
                ));
            }
            Err(err) => return Err(reword(err, 404, Self::repo_not_found(args))),
        };

        Ok(ProviderOutput::from_list(select_all(
            &Value::Array(as_array(commits)),
            "",
            &[
                ("sha", "/sha"),
                ("message", "/commit/message"),
                ("author", "/commit/author/name"),
                ("date", "/commit/author/date"),
                ("html_url", "/html_url"),
            ],
        )))
    }

    async fn list_issues(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let path = format!("{}/issues", Self::repo_path(args)?);
        let mut query = vec![
            ("state", args.require("state")?.to_string()),
            ("sort", args.require("sort")?.to_string()),
            ("direction", args.require("direction")?.to_string()),
            ("per_page", self.page_size.to_string()),
        ];
        if let Some(labels) = args.get("labels") {
            query.push(("labels", labels.to_string()));
        }

        let issues = self
            .transport
            .get_json(&path, &query)
            .await
            .map_err(|err| reword(err, 404, Self::repo_not_found(args)))?;

        let shaped = as_array(issues)
            .iter()
            .map(|issue| {
                let mut out = select(
                    issue,
                    &[
                        ("number", "/number"),
                        ("title", "/title"),
                        ("state", "/state"),
                        ("author", "/user/login"),
                        ("comments", "/comments"),
                        ("created_at", "/created_at"),
                        ("updated_at", "/updated_at"),
                        ("html_url", "/html_url"),
                    ],
                );
                out["labels"] = Value::Array(strings(issue, "/labels", "/name"));
                out
            })
            .collect();
        Ok(ProviderOutput::from_list(shaped))
    }

    async fn get_repository(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let repo = self
            .transport
            .get_json(&Self::repo_path(args)?, &[])
            .await
            .map_err(|err| reword(err, 404, Self::repo_not_found(args)))?;

        let mut out = select(&repo, REPO_FIELDS);
        out["open_issues_count"] = repo.get("open_issues_count").cloned().unwrap_or_default();
        out["created_at"] = repo.get("created_at").cloned().unwrap_or_default();
        Ok(ProviderOutput::new(out))
    }

    async fn search_code(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let query = [
            ("q", args.require("query")?.to_string()),
            ("sort", args.require("sort")?.to_string()),
            ("order", args.require("order")?.to_string()),
            ("per_page", self.page_size.to_string()),
        ];
        let found = self.transport.get_json("/search/code", &query).await?;
        Ok(ProviderOutput::from_list(select_all(
            &found,
            "/items",
            &[
                ("name", "/name"),
                ("path", "/path"),
                ("sha", "/sha"),
                ("repository", "/repository/full_name"),
                ("html_url", "/html_url"),
            ],
        )))
    }

    /// Issue and its comments, fetched concurrently
    async fn fetch_issue(&self, args: &CanonicalArgs) -> BackendResult<(Value, Value)> {
        let number = args.require("issue_number")?;
        let issue_path = format!("{}/issues/{}", Self::repo_path(args)?, number);
        let comments_path = format!("{}/comments", issue_path);
        let comments_query = [("per_page", "100".to_string())];

        tokio::try_join!(
            self.transport.get_json(&issue_path, &[]),
            self.transport.get_json(&comments_path, &comments_query),
        )
        .map_err(|err| {
            reword(err, 404, || {
                format!(
                    "Repository '{}/{}' or issue #{} not found",
                    args.get("owner").unwrap_or_default(),
                    args.get("repo").unwrap_or_default(),
                    number
                )
            })
        })
    }

    async fn get_issue_details(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (issue, comments) = self.fetch_issue(args).await?;

        let mut out = select(
            &issue,
            &[
                ("number", "/number"),
                ("title", "/title"),
                ("state", "/state"),
                ("author", "/user/login"),
                ("created_at", "/created_at"),
                ("updated_at", "/updated_at"),
                ("html_url", "/html_url"),
                ("description", "/body"),
            ],
        );
        out["labels"] = Value::Array(strings(&issue, "/labels", "/name"));
        out["comments"] = Value::Array(select_all(
            &Value::Array(as_array(comments)),
            "",
            &[
                ("author", "/user/login"),
                ("created_at", "/created_at"),
                ("body", "/body"),
            ],
        ));
        Ok(ProviderOutput::new(out))
    }

    async fn get_issue_content(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (issue, comments) = self.fetch_issue(args).await?;

        Ok(ProviderOutput::new(json!({
            "title": issue.get("title").cloned().unwrap_or_default(),
            "labels": strings(&issue, "/labels", "/name"),
            "timestamp": issue.get("created_at").cloned().unwrap_or_default(),
            "description": issue.get("body").cloned().unwrap_or_default(),
            "comments": strings(&Value::Array(as_array(comments)), "", "/body"),
        })))
    }
}

#[async_trait]
impl ProviderAdapter for GithubAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Github
    }

    fn operations(&self) -> &'static [OperationSpec] {
        OPERATIONS
    }

    async fn invoke(&self, operation: &str, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        match operation {
            "get_current_user" => self.get_current_user().await,
            "search_repositories" => self.search_repositories(args).await,
            "get_file_contents" => self.get_file_contents(args).await,
            "list_commits" => self.list_commits(args).await,
            "list_issues" => self.list_issues(args).await,
            "get_repository" => self.get_repository(args).await,
            "search_code" => self.search_code(args).await,
            "get_issue_details" => self.get_issue_details(args).await,
            "get_issue_content" => self.get_issue_content(args).await,
            other => Err(BackendError::UnknownOperation(format!("github.{}", other))),
        }
    }
}

fn as_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Shape a single `contents` entry, decoding base64 text when possible
fn decode_file(file: &Value) -> Value {
    let mut out = select(file, ENTRY_FIELDS);

    let encoded = file.get("content").and_then(Value::as_str).unwrap_or_default();
    if encoded.is_empty() {
        out["content"] = json!("");
        return out;
    }
    if file.get("encoding").and_then(Value::as_str) != Some("base64") {
        out["content"] = json!(encoded);
        return out;
    }

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => {
                out["encoding"] = json!("utf-8");
                out["content"] = json!(text);
            }
            Err(_) => {
                out["binary"] = json!(true);
                out["message"] = json!("Could not decode content (likely binary file)");
            }
        },
        Err(e) => {
            out["binary"] = json!(true);
            out["message"] = json!(format!("Error decoding content: {}", e));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    fn adapter() -> (Arc<MockTransport>, GithubAdapter) {
        let mock = Arc::new(MockTransport::new());
        let adapter = GithubAdapter::new(mock.clone()).with_page_size(10);
        (mock, adapter)
    }

    fn args(op: &str, raw: Value) -> CanonicalArgs {
        let raw: BTreeMap<String, Value> = serde_json::from_value(raw).unwrap();
        opsgate_core::find_operation(OPERATIONS, op)
            .unwrap()
            .canonicalize(&raw)
            .unwrap()
    }

    #[tokio::test]
    async fn list_issues_sends_defaults_and_labels() {
        let (mock, gh) = adapter();
        mock.on_json(
            "/repos/acme/api/issues",
            json!([{
                "number": 7,
                "title": "Crash on start",
                "state": "open",
                "user": {"login": "dana"},
                "labels": [{"name": "bug"}],
                "comments": 2,
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-02T10:00:00Z",
                "html_url": "https://github.com/acme/api/issues/7"
            }]),
        );

        let out = gh
            .invoke(
                "list_issues",
                &args("list_issues", json!({"owner": "acme", "repo": "api", "labels": "p1,bug"})),
            )
            .await
            .unwrap();

        assert_eq!(out.value[0]["author"], json!("dana"));
        assert_eq!(out.value[0]["labels"], json!(["bug"]));
        let request = &mock.requests()[0];
        assert_eq!(request.query_value("state"), Some("open"));
        assert_eq!(request.query_value("direction"), Some("desc"));
        assert_eq!(request.query_value("labels"), Some("bug,p1"));
        assert_eq!(request.query_value("per_page"), Some("10"));
    }

    #[tokio::test]
    async fn empty_repository_is_confirmed_empty() {
        let (mock, gh) = adapter();
        mock.on_error(
            "/repos/acme/new/commits",
            BackendError::http(409, "Git Repository is empty."),
        );

        let out = gh
            .invoke("list_commits", &args("list_commits", json!({"owner": "acme", "repo": "new"})))
            .await
            .unwrap();

        assert_eq!(out, ProviderOutput::empty_list());
    }

    #[tokio::test]
    async fn unknown_branch_becomes_not_found() {
        let (mock, gh) = adapter();
        mock.on_error(
            "/repos/acme/api/commits",
            BackendError::http(422, "No commit found for SHA: nope"),
        );

        let err = gh
            .invoke(
                "list_commits",
                &args("list_commits", json!({"owner": "acme", "repo": "api", "branch": "nope"})),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BackendError::http(404, "Branch or SHA 'nope' not found in repository acme/api")
        );
        assert_eq!(mock.requests()[0].query_value("sha"), Some("nope"));
    }

    #[tokio::test]
    async fn file_contents_are_decoded() {
        let (mock, gh) = adapter();
        mock.on_json(
            "/repos/acme/api/contents/docs/READ%20ME.md",
            json!({
                "name": "READ ME.md",
                "path": "docs/READ ME.md",
                "type": "file",
                "size": 6,
                "sha": "abc",
                "encoding": "base64",
                "content": "aGVs\nbG8K\n"
            }),
        );

        let out = gh
            .invoke(
                "get_file_contents",
                &args(
                    "get_file_contents",
                    json!({
                        "owner": "acme",
                        "repo": "api",
                        "path": "/docs/READ ME.md",
                        "branch": "dev"
                    }),
                ),
            )
            .await
            .unwrap();

        assert_eq!(out.value["content"], json!("hello\n"));
        assert_eq!(out.value["encoding"], json!("utf-8"));
        assert_eq!(mock.requests()[0].query_value("ref"), Some("dev"));
    }

    #[test]
    fn binary_file_reports_metadata_only() {
        let out = decode_file(&json!({
            "name": "logo.png",
            "encoding": "base64",
            "content": STANDARD.encode([0x89u8, 0x50, 0xff, 0xfe])
        }));
        assert_eq!(out["binary"], json!(true));
        assert!(out.get("content").is_none());
    }

    #[tokio::test]
    async fn oversized_file_is_invalid_argument() {
        let (mock, gh) = adapter();
        mock.on_error(
            "/repos/acme/api/contents/big.bin",
            BackendError::http(403, "The requested blob is too large to fetch"),
        );

        let err = gh
            .invoke(
                "get_file_contents",
                &args(
                    "get_file_contents",
                    json!({"owner": "acme", "repo": "api", "path": "big.bin"}),
                ),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn issue_content_collects_comment_bodies() {
        let (mock, gh) = adapter();
        mock.on_json(
            "/repos/acme/api/issues/7",
            json!({
                "title": "Crash on start",
                "body": "Steps to reproduce",
                "labels": [{"name": "bug"}],
                "created_at": "2024-05-01T10:00:00Z"
            }),
        )
        .on_json(
            "/repos/acme/api/issues/7/comments",
            json!([{"body": "Confirmed"}, {"body": "Fixed in #8"}]),
        );

        let out = gh
            .invoke(
                "get_issue_content",
                &args(
                    "get_issue_content",
                    json!({"owner": "acme", "repo": "api", "issue_number": 7}),
                ),
            )
            .await
            .unwrap();

        assert_eq!(
            out.value,
            json!({
                "title": "Crash on start",
                "labels": ["bug"],
                "timestamp": "2024-05-01T10:00:00Z",
                "description": "Steps to reproduce",
                "comments": ["Confirmed", "Fixed in #8"]
            })
        );
    }

    #[tokio::test]
    async fn missing_repository_names_the_repository() {
        let (mock, gh) = adapter();
        mock.on_error("/repos/acme/gone", BackendError::http(404, "Not Found"));

        let err = gh
            .invoke(
                "get_repository",
                &args("get_repository", json!({"owner": "acme", "repo": "gone"})),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BackendError::http(404, "Repository 'acme/gone' not found"));
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let (_, gh) = adapter();
        let err = gh
            .invoke("delete_repository", &CanonicalArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnknownOperation(_)));
    }
}
