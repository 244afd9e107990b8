//! Template manifest parsing
//!
//! Shared by the embedded catalogue and filesystem template directories.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::templates::{FileTree, InstantiationError, TemplateKind};

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid version regex"));

/// Names the engine injects into every render context
pub const RESERVED_PARAMETERS: &[&str] = &[
    "muppet_name",
    "muppet_name_snake",
    "muppet_name_pascal",
    "package_path",
    "package_name",
    "environment",
    "template_name",
    "template_version",
    "health_path",
    "features",
];

/// Declared type of a template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Integer,
    Boolean,
}

/// A parameter a template accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Regex every supplied value must match in full
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Where a template was loaded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    Embedded,
    FileSystem(PathBuf),
}

/// An immutable template: manifest metadata plus its raw file tree
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub name: String,
    pub version: String,
    pub kind: TemplateKind,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    /// Feature name to enabled-by-default
    pub features: BTreeMap<String, bool>,
    /// Files dropped when the owning feature is disabled
    pub feature_files: BTreeMap<String, Vec<String>>,
    /// Rendered paths the structural check expects
    pub required_files: Vec<String>,
    /// Directory holding CI/CD workflow files
    pub pipeline_dir: String,
    #[serde(skip)]
    pub files: FileTree,
    pub source: TemplateSource,
}

impl Template {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Port the service listens on, honouring a `port` parameter
    pub fn container_port(&self, params: &BTreeMap<String, String>) -> u16 {
        params
            .get("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| self.kind.container_port())
    }

    /// Short summary used by the `templates` listing
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "version": self.version,
            "kind": self.kind,
            "description": self.description,
            "parameters": self.parameters,
            "features": self.features,
            "source": self.source,
        })
    }
}

/// Internal representation matching the manifest YAML structure
#[derive(Debug, Clone, Deserialize)]
struct ManifestData {
    name: String,
    version: String,
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    #[serde(default)]
    features: BTreeMap<String, bool>,
    #[serde(default)]
    feature_files: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    required_files: Vec<String>,
    #[serde(default = "default_pipeline_dir")]
    pipeline_dir: String,
}

fn default_pipeline_dir() -> String {
    ".github/workflows".to_string()
}

impl ManifestData {
    fn into_template(
        self,
        files: FileTree,
        source: TemplateSource,
    ) -> Result<Template, InstantiationError> {
        if self.name.trim().is_empty() {
            return Err(InstantiationError::InvalidManifest(
                "template name cannot be empty".to_string(),
            ));
        }
        if !VERSION_PATTERN.is_match(&self.version) {
            return Err(InstantiationError::InvalidManifest(format!(
                "template '{}' has invalid version '{}', expected x.y.z",
                self.name, self.version
            )));
        }
        let kind: TemplateKind = self
            .kind
            .parse()
            .map_err(InstantiationError::InvalidManifest)?;

        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if RESERVED_PARAMETERS.contains(&param.name.as_str()) {
                return Err(InstantiationError::InvalidManifest(format!(
                    "parameter '{}' is reserved",
                    param.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(InstantiationError::InvalidManifest(format!(
                    "parameter '{}' declared twice",
                    param.name
                )));
            }
            if let Some(pattern) = &param.pattern {
                Regex::new(pattern).map_err(|e| {
                    InstantiationError::InvalidManifest(format!(
                        "parameter '{}' has invalid pattern: {}",
                        param.name, e
                    ))
                })?;
            }
        }

        if let Some(feature) = self
            .feature_files
            .keys()
            .find(|f| !self.features.contains_key(*f))
        {
            return Err(InstantiationError::InvalidManifest(format!(
                "feature_files refers to undeclared feature '{feature}'"
            )));
        }

        Ok(Template {
            name: self.name,
            version: self.version,
            kind,
            description: self.description,
            parameters: self.parameters,
            features: self.features,
            feature_files: self.feature_files,
            required_files: self.required_files,
            pipeline_dir: self.pipeline_dir.trim_end_matches('/').to_string(),
            files,
            source,
        })
    }
}

/// Parse manifest YAML and attach the template's file tree
pub fn parse_manifest_yaml(
    content: &str,
    files: FileTree,
    source: TemplateSource,
) -> Result<Template, InstantiationError> {
    let data: ManifestData = serde_yaml::from_str(content).map_err(|e| {
        InstantiationError::InvalidManifest(format!("Failed to parse manifest YAML: {}", e))
    })?;
    data.into_template(files, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: java-micronaut
version: 1.2.0
kind: java-micronaut
description: Micronaut HTTP service
parameters:
  - name: java_package
    type: string
    default: com.example
    pattern: '^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$'
  - name: java_version
    type: integer
features:
  metrics: true
  tracing: false
feature_files:
  tracing:
    - src/main/resources/tracing.yml
required_files:
  - build.gradle
"#;

    #[test]
    fn test_parse_manifest() {
        let template =
            parse_manifest_yaml(MANIFEST, FileTree::new(), TemplateSource::Embedded).unwrap();

        assert_eq!(template.name, "java-micronaut");
        assert_eq!(template.kind, TemplateKind::JavaMicronaut);
        assert_eq!(template.parameters.len(), 2);
        assert_eq!(
            template.parameter("java_version").unwrap().param_type,
            ParameterType::Integer
        );
        assert!(!template.parameter("java_package").unwrap().required);
        assert_eq!(template.features["metrics"], true);
        assert_eq!(template.pipeline_dir, ".github/workflows");
        assert_eq!(template.required_files, vec!["build.gradle"]);
    }

    #[test]
    fn test_rejects_bad_version() {
        let yaml = "name: x\nversion: v1\nkind: rust-axum\n";
        let err = parse_manifest_yaml(yaml, FileTree::new(), TemplateSource::Embedded).unwrap_err();
        assert!(matches!(err, InstantiationError::InvalidManifest(_)));
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let yaml = "name: x\nversion: 1.0.0\nkind: go-gin\n";
        let err = parse_manifest_yaml(yaml, FileTree::new(), TemplateSource::Embedded).unwrap_err();
        assert!(err.to_string().contains("go-gin"));
    }

    #[test]
    fn test_rejects_reserved_parameter() {
        let yaml = "name: x\nversion: 1.0.0\nkind: rust-axum\nparameters:\n  - name: muppet_name\n";
        let err = parse_manifest_yaml(yaml, FileTree::new(), TemplateSource::Embedded).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_rejects_invalid_pattern() {
        let yaml = "name: x\nversion: 1.0.0\nkind: rust-axum\nparameters:\n  - name: port\n    pattern: '('\n";
        let err = parse_manifest_yaml(yaml, FileTree::new(), TemplateSource::Embedded).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_rejects_undeclared_feature_files() {
        let yaml = "name: x\nversion: 1.0.0\nkind: rust-axum\nfeature_files:\n  metrics: [a.txt]\n";
        let err = parse_manifest_yaml(yaml, FileTree::new(), TemplateSource::Embedded).unwrap_err();
        assert!(err.to_string().contains("metrics"));
    }
}
