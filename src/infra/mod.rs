//! Infrastructure provisioning
//!
//! Renders the per-muppet module graph, drives the infrastructure engine
//! through plan and apply, and extracts structured outputs.

pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod modules;
pub mod outputs;
pub mod terraform;

pub use coordinator::ProvisioningCoordinator;
pub use engine::{InfraConfig, InfraIdentity, InfrastructureEngine, PlanSummary};
pub use errors::{EngineError, ProvisionError};
pub use modules::{EnvironmentSizing, ModuleParameters, RenderedModuleGraph, render_module_graph};
pub use outputs::InfraOutputs;
pub use terraform::TerraformEngine;
