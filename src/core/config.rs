//! Service configuration.
//!
//! Loaded from a TOML file, then patched with a small set of environment
//! overrides. Every section has defaults, so an absent file is valid.
//!
//! Lookup order for the file:
//! 1. `--config <path>` on the command line
//! 2. the `MUPPETS_CONFIG` environment variable
//! 3. `<config_dir>/muppets/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::retry::RetryPolicy;
use crate::lifecycle::LockMode;
use crate::repository::{BranchProtection, Collaborator};
use crate::verification::VerificationConfig;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub templates: TemplatesConfig,
    pub source_control: SourceControlConfig,
    pub infrastructure: InfrastructureConfig,
    pub retry: RetryPolicy,
    pub concurrency: ConcurrencyConfig,
    pub verification: VerificationConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding lifecycle records and pipeline history
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: base.join("muppets").join("muppets.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Extra template directory; templates here shadow built-ins by name
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceControlConfig {
    pub api_url: String,
    /// Organization that owns muppet repositories
    pub organization: String,
    /// Environment variable holding the API token
    pub token_env: String,
    pub private: bool,
    pub default_branch: String,
    pub branch_protection: BranchProtection,
    /// Collaborators granted on every new repository
    pub collaborators: Vec<Collaborator>,
}

impl Default for SourceControlConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            organization: "muppets".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            private: true,
            default_branch: "main".to_string(),
            branch_protection: BranchProtection::default(),
            collaborators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfrastructureConfig {
    /// IaC engine executable
    pub binary: String,
    /// Root for per-muppet working directories
    pub work_dir: PathBuf,
    pub apply_timeout_secs: u64,
    pub region: String,
}

impl InfrastructureConfig {
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            binary: "terraform".to_string(),
            work_dir: base.join("muppets").join("infra"),
            apply_timeout_secs: 1800,
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub source_control_max_in_flight: usize,
    pub infrastructure_max_in_flight: usize,
    /// What a second operation on a busy muppet does
    pub lock_mode: LockMode,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            source_control_max_in_flight: 4,
            infrastructure_max_in_flight: 2,
            lock_mode: LockMode::Reject,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Deadline applied to every operation unless the caller supplies one
    pub operation_timeout_secs: Option<u64>,
    /// Tear down infrastructure of failed non-production creates
    pub auto_teardown_non_production: bool,
}

impl Config {
    /// Load configuration from `explicit`, `MUPPETS_CONFIG` or the default
    /// location, then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("MUPPETS_CONFIG").map(PathBuf::from))
            .or_else(|| dirs::config_dir().map(|d| d.join("muppets").join("config.toml")));

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if explicit.is_some() => {
                return Err(ConfigError::Read {
                    path,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `MUPPETS_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MUPPETS_DATABASE") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("MUPPETS_TEMPLATE_DIR") {
            self.templates.directory = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("MUPPETS_GITHUB_API_URL") {
            self.source_control.api_url = url;
        }
        if let Some(org) = lookup("MUPPETS_GITHUB_ORG") {
            self.source_control.organization = org;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid(
                "retry.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.concurrency.source_control_max_in_flight == 0
            || self.concurrency.infrastructure_max_in_flight == 0
        {
            return Err(ConfigError::Invalid(
                "concurrency limits must be greater than zero".to_string(),
            ));
        }
        if self.source_control.organization.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "source_control.organization cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Operation deadline derived from configuration
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.lifecycle.operation_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency.lock_mode, LockMode::Reject);
        assert!(!config.lifecycle.auto_teardown_non_production);
        assert_eq!(config.source_control.default_branch, "main");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml(
            r#"
[store]
database_path = "/var/lib/muppets/state.db"

[source_control]
organization = "acme"

[retry]
max_attempts = 3
base_delay = 250

[concurrency]
lock_mode = "block"

[lifecycle]
auto_teardown_non_production = true
"#,
        )
        .unwrap();

        assert_eq!(
            config.store.database_path,
            PathBuf::from("/var/lib/muppets/state.db")
        );
        assert_eq!(config.source_control.organization, "acme");
        assert_eq!(config.source_control.token_env, "GITHUB_TOKEN");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.concurrency.lock_mode, LockMode::Block);
        assert!(config.lifecycle.auto_teardown_non_production);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MUPPETS_DATABASE", "/tmp/x.db"),
            ("MUPPETS_GITHUB_ORG", "widgets"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.store.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.source_control.organization, "widgets");
        assert_eq!(config.source_control.api_url, "https://api.github.com");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.concurrency.infrastructure_max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/muppets.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[infrastructure]\napply_timeout_secs = 60\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.infrastructure.apply_timeout(), Duration::from_secs(60));
        assert_eq!(config.infrastructure.binary, "terraform");
    }
}
