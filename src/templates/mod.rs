//! Template instantiation engine.
//!
//! Templates are immutable blueprints (manifest + file tree) loaded once at
//! startup into a read-only [`TemplateRegistry`]. [`instantiate`] turns a
//! template plus muppet parameters into a materialized [`FileTree`],
//! substituting placeholders in both paths and contents.

pub mod embedded;
pub mod engine;
pub mod errors;
pub mod kind;
pub mod manifest;
pub mod registry;
pub mod tree;

pub use engine::{InstantiationRequest, instantiate, unresolved_placeholders};
pub use errors::InstantiationError;
pub use kind::TemplateKind;
pub use manifest::{ParameterSpec, ParameterType, Template, TemplateSource, parse_manifest_yaml};
pub use registry::TemplateRegistry;
pub use tree::{FileEntry, FileTree};
