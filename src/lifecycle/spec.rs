//! Validated input to lifecycle operations

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lowercase alphanumerics and hyphens, alphanumeric at both ends
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid muppet name regex")
});

/// Longest accepted muppet name; names end up in DNS labels
pub const MAX_NAME_LENGTH: usize = 63;

/// Rejections raised before any external call is made
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid muppet name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Unknown environment '{0}' (expected development, staging or production)")]
    UnknownEnvironment(String),

    #[error("Invalid parameter '{0}': expected key=value")]
    MalformedParameter(String),

    #[error("Template reference cannot be empty")]
    MissingTemplate,
}

/// Deployment environment of a muppet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "stage" | "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ValidationError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Check a muppet name against the identifier rules
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(&format!(
            "name is longer than {MAX_NAME_LENGTH} characters"
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(invalid(
            "use lowercase letters, digits and hyphens, starting and ending with a letter or digit",
        ));
    }
    Ok(())
}

/// Parse `key=value` pairs from the command line
pub fn parse_parameters<I, S>(pairs: I) -> Result<BTreeMap<String, String>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|pair| {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.to_string()))
                }
                _ => Err(ValidationError::MalformedParameter(pair.to_string())),
            }
        })
        .collect()
}

/// Input to `create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuppetSpec {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub feature_overrides: BTreeMap<String, bool>,
}

impl MuppetSpec {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, template: T) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            params: BTreeMap::new(),
            environment: Environment::default(),
            feature_overrides: BTreeMap::new(),
        }
    }

    pub fn param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn feature<K: Into<String>>(mut self, name: K, enabled: bool) -> Self {
        self.feature_overrides.insert(name.into(), enabled);
        self
    }

    /// Structural validation; parameter checks happen against the template
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.template.trim().is_empty() {
            return Err(ValidationError::MissingTemplate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["billing-svc", "a", "svc2", "0rders", "a-b-c"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "Bad_Name!", "-leading", "trailing-", "UPPER", "has space", "dot.name"] {
            assert!(
                matches!(validate_name(name), Err(ValidationError::InvalidName { .. })),
                "{name} should be rejected"
            );
        }
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH + 1)).is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_environment_aliases() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("stage".parse::<Environment>().unwrap(), Environment::Staging);
        assert!(matches!(
            "qa".parse::<Environment>(),
            Err(ValidationError::UnknownEnvironment(_))
        ));
        assert_eq!(
            serde_json::to_string(&Environment::Staging).unwrap(),
            "\"staging\""
        );
    }

    #[test]
    fn test_parse_parameters() {
        let params = parse_parameters(["java_package=com.acme", "owner=team=core"]).unwrap();
        assert_eq!(params["java_package"], "com.acme");
        assert_eq!(params["owner"], "team=core");

        assert!(parse_parameters(["novalue"]).is_err());
        assert!(parse_parameters(["=value"]).is_err());
    }

    #[test]
    fn test_spec_validation() {
        let spec = MuppetSpec::new("billing-svc", "java-micronaut")
            .param("owner", "payments")
            .environment(Environment::Staging)
            .feature("tracing", true);
        assert!(spec.validate().is_ok());
        assert!(spec.feature_overrides["tracing"]);

        assert_eq!(
            MuppetSpec::new("billing-svc", " ").validate(),
            Err(ValidationError::MissingTemplate)
        );
    }
}
