//! Request types for the operator-facing use cases

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::lifecycle::{Environment, MuppetSpec, ValidationError, parse_parameters};
use crate::templates::InstantiationRequest;

/// Raw `create` arguments as typed by an operator
#[derive(Debug, Clone, Default)]
pub struct CreateMuppetRequest {
    pub name: String,
    pub template: String,
    /// `key=value` pairs
    pub params: Vec<String>,
    pub environment: String,
    /// `feature` or `feature=true|false`
    pub features: Vec<String>,
}

impl CreateMuppetRequest {
    pub fn into_spec(self) -> Result<MuppetSpec, ValidationError> {
        let spec = MuppetSpec {
            name: self.name,
            template: self.template,
            params: parse_parameters(&self.params)?,
            environment: self.environment.parse::<Environment>()?,
            feature_overrides: parse_features(&self.features)?,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Arguments of `verify-template`
#[derive(Debug, Clone, Default)]
pub struct VerifyTemplateRequest {
    pub template: String,
    pub muppet_name: String,
    pub params: Vec<String>,
    pub features: Vec<String>,
    /// Keep the materialized project here instead of a scratch directory
    pub output_dir: Option<PathBuf>,
    pub skip_build: bool,
    pub skip_container: bool,
}

impl VerifyTemplateRequest {
    pub fn instantiation_request(&self) -> Result<InstantiationRequest, ValidationError> {
        crate::lifecycle::validate_name(&self.muppet_name)?;
        Ok(InstantiationRequest {
            muppet_name: self.muppet_name.clone(),
            environment: Environment::Development.to_string(),
            params: parse_parameters(&self.params)?,
            feature_overrides: parse_features(&self.features)?,
        })
    }
}

/// Parse `name` / `name=true|false` feature overrides
pub fn parse_features<I, S>(values: I) -> Result<BTreeMap<String, bool>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut features = BTreeMap::new();
    for value in values {
        let value = value.as_ref().trim();
        let (name, enabled) = match value.split_once('=') {
            None => (value, true),
            Some((name, flag)) => {
                let enabled = match flag.trim().to_ascii_lowercase().as_str() {
                    "true" | "on" | "yes" => true,
                    "false" | "off" | "no" => false,
                    _ => return Err(ValidationError::MalformedParameter(value.to_string())),
                };
                (name.trim(), enabled)
            }
        };
        if name.is_empty() {
            return Err(ValidationError::MalformedParameter(value.to_string()));
        }
        features.insert(name.to_string(), enabled);
    }
    Ok(features)
}
