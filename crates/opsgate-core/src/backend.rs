//! Backend identifiers

use serde::{Deserialize, Serialize};

/// The DevOps backends the gateway can route to.
///
/// This is a closed set: a new backend is added by adding a variant here and
/// registering a [`crate::ProviderAdapter`] for it. The gateway dispatcher
/// itself never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Source-control host
    Github,
    /// CI server
    Jenkins,
    /// Cloud-resource manager (Azure Resource Manager)
    Azure,
    /// Artifact repository
    Artifactory,
}

impl BackendId {
    /// Every known backend, in declaration order
    pub const ALL: [BackendId; 4] = [
        BackendId::Github,
        BackendId::Jenkins,
        BackendId::Azure,
        BackendId::Artifactory,
    ];

    /// Stable identifier used in cache keys, config tables and logs
    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Github => "github",
            BackendId::Jenkins => "jenkins",
            BackendId::Azure => "azure",
            BackendId::Artifactory => "artifactory",
        }
    }

    /// The role this backend plays
    pub fn category(self) -> &'static str {
        match self {
            BackendId::Github => "source-control",
            BackendId::Jenkins => "ci",
            BackendId::Azure => "cloud",
            BackendId::Artifactory => "artifact-repository",
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(BackendId::Github),
            "jenkins" => Ok(BackendId::Jenkins),
            "azure" => Ok(BackendId::Azure),
            "artifactory" => Ok(BackendId::Artifactory),
            _ => Err(format!("Unknown backend: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("GitHub".parse::<BackendId>(), Ok(BackendId::Github));
        assert_eq!(" jenkins ".parse::<BackendId>(), Ok(BackendId::Jenkins));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("gitlab".parse::<BackendId>().is_err());
    }

    #[test]
    fn display_round_trips_through_serde() {
        for backend in BackendId::ALL {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend));
        }
    }
}
