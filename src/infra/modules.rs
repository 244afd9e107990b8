//! Per-muppet module graph rendering
//!
//! The module graph (networking, compute service, container registry,
//! monitoring, outputs) is compiled into the binary and rendered with the
//! muppet's identity and the sizing of its environment.

use rust_embed::RustEmbed;
use serde::Serialize;
use tera::{Context, Tera};

use crate::infra::ProvisionError;
use crate::lifecycle::Environment;
use crate::templates::FileTree;

#[derive(RustEmbed)]
#[folder = "infrastructure/"]
struct InfrastructureModules;

/// Resource sizing per environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSizing {
    pub cpu: u32,
    pub memory: u32,
    pub desired_count: u32,
    pub subnet_count: u32,
    pub vpc_cidr: &'static str,
    pub log_retention_days: u32,
    pub alarm_evaluation_periods: u32,
    pub retained_images: u32,
    pub container_insights: &'static str,
    pub force_delete_registry: bool,
}

impl EnvironmentSizing {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self {
                cpu: 256,
                memory: 512,
                desired_count: 1,
                subnet_count: 2,
                vpc_cidr: "10.10.0.0/16",
                log_retention_days: 7,
                alarm_evaluation_periods: 5,
                retained_images: 10,
                container_insights: "disabled",
                force_delete_registry: true,
            },
            Environment::Staging => Self {
                cpu: 512,
                memory: 1024,
                desired_count: 2,
                subnet_count: 2,
                vpc_cidr: "10.20.0.0/16",
                log_retention_days: 14,
                alarm_evaluation_periods: 3,
                retained_images: 20,
                container_insights: "enabled",
                force_delete_registry: true,
            },
            Environment::Production => Self {
                cpu: 1024,
                memory: 2048,
                desired_count: 3,
                subnet_count: 3,
                vpc_cidr: "10.30.0.0/16",
                log_retention_days: 90,
                alarm_evaluation_periods: 2,
                retained_images: 50,
                container_insights: "enabled",
                force_delete_registry: false,
            },
        }
    }
}

/// Inputs to module rendering
#[derive(Debug, Clone)]
pub struct ModuleParameters {
    pub muppet_name: String,
    pub environment: Environment,
    pub region: String,
    /// Full name of the muppet's source repository
    pub repository: String,
    pub container_port: u16,
    pub health_path: String,
}

/// Rendered configuration files, ready to be written to a working directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedModuleGraph {
    pub files: FileTree,
}

impl RenderedModuleGraph {
    pub fn content_hash(&self) -> String {
        self.files.content_hash()
    }
}

/// Render the embedded module graph for one muppet environment
pub fn render_module_graph(
    params: &ModuleParameters,
) -> Result<RenderedModuleGraph, ProvisionError> {
    let sizing = EnvironmentSizing::for_environment(params.environment);

    let mut context = Context::from_serialize(&sizing)
        .map_err(|e| ProvisionError::Render(e.to_string()))?;
    context.insert("muppet_name", &params.muppet_name);
    context.insert("environment", params.environment.as_str());
    context.insert("region", &params.region);
    context.insert("repository", &params.repository);
    context.insert("container_port", &params.container_port);
    context.insert("health_path", &params.health_path);

    let mut files = FileTree::new();
    let mut names: Vec<_> = InfrastructureModules::iter()
        .filter(|name| name.ends_with(".tf.tera"))
        .collect();
    names.sort();

    for name in names {
        let Some(file) = InfrastructureModules::get(name.as_ref()) else {
            continue;
        };
        let source = std::str::from_utf8(file.data.as_ref())
            .map_err(|e| ProvisionError::Render(format!("{name}: {e}")))?;
        let rendered = Tera::one_off(source, &context, false)
            .map_err(|e| ProvisionError::Render(format!("{name}: {e}")))?;
        let target = name.trim_end_matches(".tera").to_string();
        files.insert(target, rendered);
    }

    if files.is_empty() {
        return Err(ProvisionError::Render(
            "no infrastructure modules embedded".to_string(),
        ));
    }
    Ok(RenderedModuleGraph { files })
}
