//! Application layer - wires components from configuration and exposes the
//! operator use cases that sit outside the lifecycle state machine

pub mod dto;
pub mod services;
pub mod verify_template;

pub use dto::*;
pub use services::{build_orchestrator, build_verifier, load_registry};
pub use verify_template::VerifyTemplateUseCase;
