//! Operation catalog and argument canonicalization
//!
//! Every adapter publishes a static table of [`OperationSpec`]s. The gateway
//! uses it to reject unknown operations, validate arguments, fill in
//! defaults and pick the default cache TTL, all before any backend is
//! contacted.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

/// Accepted type of a single argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
    /// A set of strings, given as a JSON array or a comma-separated string
    StringList,
}

/// Declaration of one operation argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    /// Canonical value used when the caller omits the argument
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

impl ArgSpec {
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, kind: ArgKind, default: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Declaration of one operation an adapter supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: &'static [ArgSpec],
    /// Default freshness window in seconds; zero disables caching
    pub default_ttl_secs: u64,
}

impl OperationSpec {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Validate raw arguments and produce their canonical form.
    ///
    /// Nulls and empty strings count as absent. Unknown names, missing
    /// required arguments and values of the wrong type are rejected.
    pub fn canonicalize(&self, raw: &BTreeMap<String, Value>) -> BackendResult<CanonicalArgs> {
        if let Some(unknown) = raw
            .keys()
            .find(|name| !self.args.iter().any(|spec| spec.name == name.as_str()))
        {
            return Err(BackendError::InvalidArgument(format!(
                "{}: unknown argument '{}'",
                self.name, unknown
            )));
        }

        let mut values = BTreeMap::new();
        for spec in self.args {
            let rendered = match raw.get(spec.name) {
                Some(value) => render(self.name, spec, value)?,
                None => None,
            };
            match rendered.or_else(|| spec.default.map(str::to_string)) {
                Some(value) => {
                    values.insert(spec.name.to_string(), value);
                }
                None if spec.required => {
                    return Err(BackendError::InvalidArgument(format!(
                        "{}: missing required argument '{}'",
                        self.name, spec.name
                    )));
                }
                None => {}
            }
        }

        Ok(CanonicalArgs(values))
    }
}

/// Look up an operation by name in a catalog
pub fn find_operation<'a>(catalog: &'a [OperationSpec], name: &str) -> Option<&'a OperationSpec> {
    catalog.iter().find(|op| op.name == name)
}

fn render(operation: &str, spec: &ArgSpec, value: &Value) -> BackendResult<Option<String>> {
    let mistyped = || {
        BackendError::InvalidArgument(format!(
            "{}: argument '{}' must be {}",
            operation,
            spec.name,
            match spec.kind {
                ArgKind::String => "a string",
                ArgKind::Integer => "an integer",
                ArgKind::Boolean => "a boolean",
                ArgKind::StringList => "a list of strings",
            }
        ))
    };

    if value.is_null() {
        return Ok(None);
    }

    let rendered = match (spec.kind, value) {
        (ArgKind::String, Value::String(s)) => s.clone(),
        (ArgKind::Integer, Value::Number(n)) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => u.to_string(),
            (None, Some(i)) => i.to_string(),
            _ => return Err(mistyped()),
        },
        (ArgKind::Integer, Value::String(s)) if s.trim().is_empty() => String::new(),
        (ArgKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| mistyped())?
            .to_string(),
        (ArgKind::Boolean, Value::Bool(b)) => b.to_string(),
        (ArgKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => "true".to_string(),
            "false" => "false".to_string(),
            "" => String::new(),
            _ => return Err(mistyped()),
        },
        (ArgKind::StringList, Value::String(s)) => join_list(s.split(',').map(str::to_string)),
        (ArgKind::StringList, Value::Array(items)) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) if !s.contains(',') => parts.push(s.clone()),
                    _ => return Err(mistyped()),
                }
            }
            join_list(parts.into_iter())
        }
        _ => return Err(mistyped()),
    };

    Ok(if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    })
}

fn join_list(items: impl Iterator<Item = String>) -> String {
    let mut items: Vec<String> = items
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    items.sort();
    items.dedup();
    items.join(",")
}

/// Validated arguments in canonical, sorted-key string form
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalArgs(BTreeMap<String, String>);

impl CanonicalArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Get an argument the catalog declares as required
    pub fn require(&self, name: &str) -> BackendResult<&str> {
        self.get(name)
            .ok_or_else(|| BackendError::InvalidArgument(format!("missing argument '{}'", name)))
    }

    /// Parse an integer argument
    pub fn get_i64(&self, name: &str) -> BackendResult<Option<i64>> {
        self.get(name)
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    BackendError::InvalidArgument(format!("argument '{}' is not an integer", name))
                })
            })
            .transpose()
    }

    /// Split a list argument into its items
    pub fn get_list(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split(',').collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CanonicalArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LIST_ISSUES: OperationSpec = OperationSpec {
        name: "list_issues",
        description: "List repository issues",
        args: &[
            ArgSpec::required("owner", ArgKind::String),
            ArgSpec::required("repo", ArgKind::String),
            ArgSpec::with_default("state", ArgKind::String, "open"),
            ArgSpec::optional("labels", ArgKind::StringList),
            ArgSpec::optional("per_page", ArgKind::Integer),
            ArgSpec::optional("draft", ArgKind::Boolean),
        ],
        default_ttl_secs: 1800,
    };

    fn raw(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn fills_defaults_so_explicit_and_implicit_match() {
        let implicit = LIST_ISSUES
            .canonicalize(&raw(json!({"owner": "acme", "repo": "gw"})))
            .unwrap();
        let explicit = LIST_ISSUES
            .canonicalize(&raw(json!({"repo": "gw", "state": "open", "owner": "acme"})))
            .unwrap();
        assert_eq!(implicit, explicit);
        assert_eq!(implicit.get("state"), Some("open"));
    }

    #[test]
    fn renders_scalars_as_strings() {
        let args = LIST_ISSUES
            .canonicalize(&raw(json!({
                "owner": "acme",
                "repo": "gw",
                "per_page": "050",
                "draft": true
            })))
            .unwrap();
        assert_eq!(args.get("per_page"), Some("50"));
        assert_eq!(args.get("draft"), Some("true"));
        assert_eq!(args.get_i64("per_page").unwrap(), Some(50));
    }

    #[test]
    fn lists_are_sorted_and_deduplicated() {
        let from_array = LIST_ISSUES
            .canonicalize(&raw(json!({
                "owner": "acme",
                "repo": "gw",
                "labels": ["bug", "ci", "bug"]
            })))
            .unwrap();
        let from_string = LIST_ISSUES
            .canonicalize(&raw(json!({
                "owner": "acme",
                "repo": "gw",
                "labels": "ci, bug"
            })))
            .unwrap();
        assert_eq!(from_array.get("labels"), Some("bug,ci"));
        assert_eq!(from_array, from_string);
        assert_eq!(from_array.get_list("labels"), vec!["bug", "ci"]);
    }

    #[test]
    fn null_and_empty_values_are_absent() {
        let args = LIST_ISSUES
            .canonicalize(&raw(json!({
                "owner": "acme",
                "repo": "gw",
                "labels": null,
                "per_page": ""
            })))
            .unwrap();
        assert_eq!(args.get("labels"), None);
        assert_eq!(args.get("per_page"), None);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn rejects_unknown_argument() {
        let err = LIST_ISSUES
            .canonicalize(&raw(json!({"owner": "acme", "repo": "gw", "colour": "red"})))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidArgument(ref m) if m.contains("colour")));
    }

    #[test]
    fn rejects_missing_required() {
        let err = LIST_ISSUES
            .canonicalize(&raw(json!({"owner": "acme"})))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidArgument(ref m) if m.contains("'repo'")));
    }

    #[test]
    fn rejects_mistyped_values() {
        for bad in [
            json!({"owner": 7, "repo": "gw"}),
            json!({"owner": "acme", "repo": "gw", "per_page": "many"}),
            json!({"owner": "acme", "repo": "gw", "draft": "maybe"}),
            json!({"owner": "acme", "repo": "gw", "labels": [1, 2]}),
        ] {
            assert!(
                LIST_ISSUES.canonicalize(&raw(bad.clone())).is_err(),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn find_operation_by_name() {
        let catalog = [LIST_ISSUES];
        assert!(find_operation(&catalog, "list_issues").is_some());
        assert!(find_operation(&catalog, "list_pulls").is_none());
    }
}
