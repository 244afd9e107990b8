use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and ports used by the checklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Default bound for any single check
    pub check_timeout_secs: u64,
    /// Bound for the template build check
    pub build_timeout_secs: u64,
    /// How long a started container or deployed service may take to turn healthy
    pub startup_grace_secs: u64,
    /// Slowest acceptable health response
    pub max_response_ms: u64,
    pub poll_interval_ms: u64,
    /// Host port the verification container is published on
    pub container_host_port: u16,
    pub container_runtime: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 120,
            build_timeout_secs: 900,
            startup_grace_secs: 60,
            max_response_ms: 2000,
            poll_interval_ms: 1000,
            container_host_port: 18080,
            container_runtime: "docker".to_string(),
        }
    }
}

impl VerificationConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn max_response(&self) -> Duration {
        Duration::from_millis(self.max_response_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
