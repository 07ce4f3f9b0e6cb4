//! Provider-agnostic service descriptors.
//!
//! Every provider translates its native objects into these types. The
//! compiler only ever sees descriptors, never provider formats.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// "State of this provider may have changed." Carries no payload; the
/// current state is read from the provider when the next rebuild compiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    /// Id of the provider that observed the change.
    pub source: String,
    /// When the change was observed.
    pub at: SystemTime,
}

impl ProviderEvent {
    pub fn now(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            at: SystemTime::now(),
        }
    }
}

/// One service/route fragment as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawServiceDescriptor {
    /// Name, unique within its provider.
    pub name: String,

    /// Match rule, e.g. `Host:example.com;PathPrefix:/api`.
    pub rule: String,

    /// Target endpoints in order.
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,

    /// Middleware directives in execution order.
    #[serde(default)]
    pub middlewares: Vec<MiddlewareDirective>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: i32,

    /// Enables session affinity with this cookie name.
    #[serde(default)]
    pub affinity_cookie: Option<String>,
}

/// Target endpoint of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Absolute URL of the endpoint (e.g. `http://10.0.0.1:8080`).
    pub address: String,

    /// Weight for weighted round-robin (0 = default weight).
    #[serde(default)]
    pub weight: u32,
}

/// Structured middleware configuration: a kind plus string options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareDirective {
    pub kind: String,

    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Split a comma-separated option value, trimming items and dropping empties.
pub fn split_and_trim(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_trim() {
        assert_eq!(split_and_trim(" 10.0.0.0/8 , ,fe80::/16,"), vec!["10.0.0.0/8", "fe80::/16"]);
        assert!(split_and_trim("  ").is_empty());
    }

    #[test]
    fn test_descriptor_from_toml() {
        let raw = r#"
            name = "stats"
            rule = "Host:example.com;PathPrefix:/stat"
            priority = 10
            affinity_cookie = "_backend"

            [[endpoints]]
            address = "http://10.0.0.1:8080"
            weight = 2

            [[endpoints]]
            address = "http://10.0.0.2:8080"

            [[middlewares]]
            kind = "strip-prefix"
            options = { prefixes = "/stat/" }
        "#;
        let d: RawServiceDescriptor = toml::from_str(raw).unwrap();
        assert_eq!(d.endpoints.len(), 2);
        assert_eq!(d.endpoints[1].weight, 0);
        assert_eq!(d.middlewares[0].options["prefixes"], "/stat/");
        assert_eq!(d.affinity_cookie.as_deref(), Some("_backend"));
    }
}
