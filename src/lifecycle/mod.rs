//! Lifecycle orchestration
//!
//! The [`Orchestrator`] owns the per-muppet state machine and is the only
//! writer of [`LifecycleRecord`]s and pipeline history, all of which live in
//! the [`SqliteStore`]. Operations on one muppet are serialized through the
//! [`LockTable`]; a caller deadline travels in the [`OperationContext`].

pub mod context;
pub mod locks;
pub mod orchestrator;
pub mod record;
pub mod spec;
pub mod state;
pub mod store;

pub use context::OperationContext;
pub use locks::{LockMode, LockTable, MuppetGuard};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use record::{
    DeletionSummary, ErrorDetail, InfraRef, LifecycleRecord, RepositoryRef, TemplateRef,
    Transition,
};
pub use spec::{Environment, MuppetSpec, ValidationError, parse_parameters, validate_name};
pub use state::{LifecycleState, Step};
pub use store::{SqliteStore, StoreError};
