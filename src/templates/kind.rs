//! Template kinds.
//!
//! A closed set of frameworks a muppet can be generated from. The kind is
//! read from the template manifest and supplies the framework specifics:
//! default parameter values, the health-check path, the build command, the
//! container port and the package layout derived from the muppet name.
//!
//! # Examples
//!
//! ```
//! use muppets::templates::TemplateKind;
//!
//! let kind: TemplateKind = "java-micronaut".parse().unwrap();
//! assert_eq!(kind, TemplateKind::JavaMicronaut);
//! assert_eq!(kind.health_check_path(), "/health");
//! assert_eq!(kind.to_string(), "java-micronaut");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::utils::{to_package_segment, to_snake_case};

/// Framework family of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    /// Java with the Micronaut framework, built with Gradle
    JavaMicronaut,
    /// Rust with the Axum web framework
    RustAxum,
    /// Python with FastAPI
    PythonFastapi,
}

impl FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "java-micronaut" => Ok(Self::JavaMicronaut),
            "rust-axum" => Ok(Self::RustAxum),
            "python-fastapi" => Ok(Self::PythonFastapi),
            _ => Err(format!("Unknown template kind: {s}")),
        }
    }
}

impl TemplateKind {
    /// Returns the kind identifier as a string slice
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaMicronaut => "java-micronaut",
            Self::RustAxum => "rust-axum",
            Self::PythonFastapi => "python-fastapi",
        }
    }

    /// Returns the implementation language
    pub fn language(&self) -> &'static str {
        match self {
            Self::JavaMicronaut => "java",
            Self::RustAxum => "rust",
            Self::PythonFastapi => "python",
        }
    }

    /// Fallback values for parameters the manifest declares without a default
    pub fn default_parameters(&self) -> BTreeMap<&'static str, &'static str> {
        match self {
            Self::JavaMicronaut => [("java_package", "com.example"), ("java_version", "21")]
                .into_iter()
                .collect(),
            Self::RustAxum => [("rust_edition", "2021"), ("port", "3000")]
                .into_iter()
                .collect(),
            Self::PythonFastapi => [("python_version", "3.12"), ("port", "8000")]
                .into_iter()
                .collect(),
        }
    }

    /// HTTP path that answers 200 when the service is healthy
    pub fn health_check_path(&self) -> &'static str {
        match self {
            Self::JavaMicronaut => "/health",
            Self::RustAxum => "/healthz",
            Self::PythonFastapi => "/health",
        }
    }

    /// Command that builds the materialized project from its root
    pub fn build_command(&self) -> &'static str {
        match self {
            Self::JavaMicronaut => "./gradlew --no-daemon build",
            Self::RustAxum => "cargo build --release",
            Self::PythonFastapi => "python3 -m compileall -q .",
        }
    }

    /// Port the service listens on inside its container
    pub fn container_port(&self) -> u16 {
        match self {
            Self::JavaMicronaut => 8080,
            Self::RustAxum => 3000,
            Self::PythonFastapi => 8000,
        }
    }

    /// Source directory for the muppet's package, relative to the project root
    ///
    /// `params` holds the resolved template parameters.
    pub fn package_path(&self, muppet_name: &str, params: &BTreeMap<String, String>) -> String {
        match self {
            Self::JavaMicronaut => {
                let base = params
                    .get("java_package")
                    .map(String::as_str)
                    .unwrap_or("com.example");
                format!(
                    "src/main/java/{}/{}",
                    base.replace('.', "/"),
                    to_package_segment(muppet_name)
                )
            }
            Self::RustAxum => "src".to_string(),
            Self::PythonFastapi => to_snake_case(muppet_name),
        }
    }

    /// Fully qualified package or module name for the muppet
    pub fn package_name(&self, muppet_name: &str, params: &BTreeMap<String, String>) -> String {
        match self {
            Self::JavaMicronaut => {
                let base = params
                    .get("java_package")
                    .map(String::as_str)
                    .unwrap_or("com.example");
                format!("{}.{}", base, to_package_segment(muppet_name))
            }
            Self::RustAxum | Self::PythonFastapi => to_snake_case(muppet_name),
        }
    }

    /// Returns an iterator over all template kinds
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::JavaMicronaut, Self::RustAxum, Self::PythonFastapi].into_iter()
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_str() {
        assert_eq!(
            "java-micronaut".parse::<TemplateKind>().unwrap(),
            TemplateKind::JavaMicronaut
        );
        assert_eq!(
            "RUST-AXUM".parse::<TemplateKind>().unwrap(),
            TemplateKind::RustAxum
        );
        assert_eq!(
            "python-fastapi".parse::<TemplateKind>().unwrap(),
            TemplateKind::PythonFastapi
        );
        assert!("go-gin".parse::<TemplateKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_serde() {
        for kind in TemplateKind::all() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_all_kinds_are_distinct() {
        let kinds: HashSet<_> = TemplateKind::all().collect();
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn test_java_package_layout() {
        let mut params = BTreeMap::new();
        params.insert("java_package".to_string(), "com.acme".to_string());

        let kind = TemplateKind::JavaMicronaut;
        assert_eq!(
            kind.package_path("billing-svc", &params),
            "src/main/java/com/acme/billingsvc"
        );
        assert_eq!(kind.package_name("billing-svc", &params), "com.acme.billingsvc");
        assert_eq!(
            kind.package_path("billing-svc", &BTreeMap::new()),
            "src/main/java/com/example/billingsvc"
        );
    }

    #[test]
    fn test_python_and_rust_layout() {
        let params = BTreeMap::new();
        assert_eq!(
            TemplateKind::PythonFastapi.package_path("billing-svc", &params),
            "billing_svc"
        );
        assert_eq!(TemplateKind::RustAxum.package_path("billing-svc", &params), "src");
        assert_eq!(
            TemplateKind::RustAxum.package_name("billing-svc", &params),
            "billing_svc"
        );
    }

    #[test]
    fn test_framework_specifics() {
        assert_eq!(TemplateKind::JavaMicronaut.container_port(), 8080);
        assert_eq!(TemplateKind::RustAxum.health_check_path(), "/healthz");
        assert!(TemplateKind::RustAxum.build_command().starts_with("cargo"));
        assert_eq!(
            TemplateKind::JavaMicronaut.default_parameters()["java_package"],
            "com.example"
        );
        assert_eq!(TemplateKind::PythonFastapi.language(), "python");
    }
}
