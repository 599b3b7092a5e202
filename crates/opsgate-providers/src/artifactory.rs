//! Artifactory adapter (storage and search APIs)

use std::sync::Arc;

use async_trait::async_trait;
use opsgate_core::{
    ArgKind, ArgSpec, BackendError, BackendId, BackendResult, CanonicalArgs, OperationSpec,
    ProviderAdapter, ProviderOutput,
};
use serde_json::{json, Value};

use crate::shape::{items, reword, select};
use crate::transport::{encode_path, encode_segment, RestTransport};

const REPOSITORY: ArgSpec = ArgSpec::required("repository", ArgKind::String);

pub static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "list_items",
        description: "Children of a folder",
        args: &[REPOSITORY, ArgSpec::with_default("path", ArgKind::String, "/")],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "search_items",
        description: "Search artifacts by name",
        args: &[
            ArgSpec::required("query", ArgKind::String),
            ArgSpec::optional("repositories", ArgKind::StringList),
        ],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "get_item_info",
        description: "Metadata of a file or folder",
        args: &[REPOSITORY, ArgSpec::required("path", ArgKind::String)],
        default_ttl_secs: 300,
    },
];

/// Adapter for a JFrog Artifactory instance
pub struct ArtifactoryAdapter {
    transport: Arc<dyn RestTransport>,
}

impl ArtifactoryAdapter {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    async fn storage(&self, args: &CanonicalArgs) -> BackendResult<(String, String, Value)> {
        let repo = args.require("repository")?;
        let path = normalize_path(args.get("path").unwrap_or("/"));
        let url = format!("/api/storage/{}{}", encode_segment(repo), encode_path(&path));

        let info = self.transport.get_json(&url, &[]).await.map_err(|err| {
            reword(err, 404, || {
                format!("Path '{}' not found in repository '{}'", path, repo)
            })
        })?;
        Ok((repo.to_string(), path, info))
    }

    async fn list_items(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (repo, path, info) = self.storage(args).await?;
        if info.get("children").is_none() {
            return Err(BackendError::InvalidArgument(format!(
                "'{}' in repository '{}' is a file, not a folder",
                path, repo
            )));
        }
        Ok(ProviderOutput::from_list(children(&info, &path)))
    }

    async fn search_items(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let mut query = vec![("name", args.require("query")?.to_string())];
        if let Some(repos) = args.get("repositories") {
            query.push(("repos", repos.to_string()));
        }

        let found = self
            .transport
            .get_json("/api/search/artifact", &query)
            .await?;
        Ok(ProviderOutput::from_list(
            items(&found, "/results")
                .iter()
                .filter_map(|hit| hit.get("uri").and_then(Value::as_str))
                .map(search_hit)
                .collect(),
        ))
    }

    async fn get_item_info(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let (repo, path, info) = self.storage(args).await?;

        let mut out = select(
            &info,
            &[
                ("created", "/created"),
                ("created_by", "/createdBy"),
                ("last_modified", "/lastModified"),
                ("modified_by", "/modifiedBy"),
            ],
        );
        out["repository"] = json!(repo);
        out["path"] = json!(path);

        if info.get("children").is_some() {
            out["type"] = json!("folder");
            out["children"] = Value::Array(children(&info, &path));
        } else {
            out["type"] = json!("file");
            for (name, pointer) in [
                ("size", "/size"),
                ("mime_type", "/mimeType"),
                ("checksums", "/checksums"),
                ("download_uri", "/downloadUri"),
            ] {
                out[name] = info.pointer(pointer).cloned().unwrap_or(Value::Null);
            }
        }
        Ok(ProviderOutput::new(out))
    }
}

#[async_trait]
impl ProviderAdapter for ArtifactoryAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Artifactory
    }

    fn operations(&self) -> &'static [OperationSpec] {
        OPERATIONS
    }

    async fn invoke(&self, operation: &str, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        match operation {
            "list_items" => self.list_items(args).await,
            "search_items" => self.search_items(args).await,
            "get_item_info" => self.get_item_info(args).await,
            other => Err(BackendError::UnknownOperation(format!(
                "artifactory.{}",
                other
            ))),
        }
    }
}

/// Leading slash, no trailing slash (except for the root)
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}

fn children(info: &Value, parent: &str) -> Vec<Value> {
    items(info, "/children")
        .iter()
        .filter_map(|child| {
            let name = child.get("uri")?.as_str()?.trim_start_matches('/');
            let folder = child.get("folder").and_then(Value::as_bool).unwrap_or(false);
            Some(json!({
                "name": name,
                "path": format!("{}/{}", parent.trim_end_matches('/'), name),
                "type": if folder { "folder" } else { "file" },
            }))
        })
        .collect()
}

/// Split a search hit `.../api/storage/<repo>/<path>` into its parts
fn search_hit(uri: &str) -> Value {
    let located = uri
        .split_once("/api/storage/")
        .and_then(|(_, rest)| rest.split_once('/'));
    match located {
        Some((repo, path)) => json!({
            "uri": uri,
            "repository": repo,
            "path": format!("/{}", path),
        }),
        None => json!({ "uri": uri, "repository": null, "path": null }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    fn adapter() -> (Arc<MockTransport>, ArtifactoryAdapter) {
        let mock = Arc::new(MockTransport::new());
        (mock.clone(), ArtifactoryAdapter::new(mock))
    }

    fn args(pairs: &[(&str, &str)]) -> CanonicalArgs {
        pairs.iter().copied().collect()
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("libs/app/"), "/libs/app");
    }

    #[tokio::test]
    async fn list_items_shapes_children() {
        let (mock, art) = adapter();
        mock.on_json(
            "/api/storage/libs-release/com/acme",
            json!({
                "repo": "libs-release",
                "path": "/com/acme",
                "children": [
                    {"uri": "/app", "folder": true},
                    {"uri": "/app.pom", "folder": false}
                ]
            }),
        );

        let out = art
            .invoke(
                "list_items",
                &args(&[("repository", "libs-release"), ("path", "com/acme/")]),
            )
            .await
            .unwrap();

        assert_eq!(
            out.value,
            json!([
                {"name": "app", "path": "/com/acme/app", "type": "folder"},
                {"name": "app.pom", "path": "/com/acme/app.pom", "type": "file"}
            ])
        );
    }

    #[tokio::test]
    async fn search_passes_repositories() {
        let (mock, art) = adapter();
        mock.on_json(
            "/api/search/artifact",
            json!({"results": [
                {"uri": "https://repo.example.com/artifactory/api/storage/libs-release/com/acme/app-1.0.jar"}
            ]}),
        );

        let out = art
            .invoke(
                "search_items",
                &args(&[("query", "app-*.jar"), ("repositories", "libs-release,libs-snapshot")]),
            )
            .await
            .unwrap();

        assert_eq!(out.value[0]["repository"], json!("libs-release"));
        assert_eq!(out.value[0]["path"], json!("/com/acme/app-1.0.jar"));
        let request = &mock.requests()[0];
        assert_eq!(request.query_value("name"), Some("app-*.jar"));
        assert_eq!(request.query_value("repos"), Some("libs-release,libs-snapshot"));
    }

    #[tokio::test]
    async fn file_info_includes_checksums() {
        let (mock, art) = adapter();
        mock.on_json(
            "/api/storage/libs-release/app.jar",
            json!({
                "created": "2024-05-01T10:00:00.000Z",
                "size": "1024",
                "mimeType": "application/java-archive",
                "checksums": {"sha256": "abc"}
            }),
        );

        let out = art
            .invoke(
                "get_item_info",
                &args(&[("repository", "libs-release"), ("path", "app.jar")]),
            )
            .await
            .unwrap();

        assert_eq!(out.value["type"], json!("file"));
        assert_eq!(out.value["checksums"], json!({"sha256": "abc"}));
        assert_eq!(out.value["path"], json!("/app.jar"));
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let (mock, art) = adapter();
        mock.on_error(
            "/api/storage/libs-release/nope",
            BackendError::http(404, "Unable to find item"),
        );

        let err = art
            .invoke(
                "get_item_info",
                &args(&[("repository", "libs-release"), ("path", "nope")]),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BackendError::http(404, "Path '/nope' not found in repository 'libs-release'")
        );
    }
}
