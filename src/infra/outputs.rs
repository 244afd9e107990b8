//! Structured outputs of a provisioning run

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Endpoints and identifiers extracted after apply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraOutputs {
    pub run_id: String,
    pub service_url: Option<String>,
    pub cluster_id: Option<String>,
    pub service_id: Option<String>,
    pub registry_url: Option<String>,
    /// True when the run did not finish and these values are incomplete
    pub partial: bool,
    #[serde(default)]
    pub raw: BTreeMap<String, Value>,
}

impl InfraOutputs {
    /// Outputs of an unfinished run
    pub fn partial<S: Into<String>>(run_id: S) -> Self {
        Self {
            run_id: run_id.into(),
            partial: true,
            ..Default::default()
        }
    }

    /// Build from engine outputs, accepting both bare values and
    /// `{"value": ...}` wrappers
    pub fn from_raw<S: Into<String>>(run_id: S, raw: BTreeMap<String, Value>) -> Self {
        let raw: BTreeMap<String, Value> = raw
            .into_iter()
            .map(|(key, value)| match value {
                Value::Object(mut map) if map.contains_key("value") => {
                    (key, map.remove("value").unwrap_or(Value::Null))
                }
                other => (key, other),
            })
            .collect();

        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            run_id: run_id.into(),
            service_url: text("service_url"),
            cluster_id: text("cluster_id"),
            service_id: text("service_id"),
            registry_url: text("registry_url"),
            partial: false,
            raw,
        }
    }

    /// Names of expected outputs that are missing
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("service_url", &self.service_url),
            ("cluster_id", &self.cluster_id),
            ("service_id", &self.service_id),
            ("registry_url", &self.registry_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.partial && self.missing().is_empty()
    }
}
