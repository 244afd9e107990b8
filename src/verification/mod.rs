//! Verification engine
//!
//! Runs a fixed checklist against either a freshly instantiated template
//! (structural, build, container) or a deployed muppet (reachability,
//! health) and reports per-check outcomes. Every check carries its own
//! timeout; a check that runs out of time fails with detail `"timeout"`.

pub mod config;
pub mod engine;
pub mod probe;
pub mod report;

pub use config::VerificationConfig;
pub use engine::{TemplateChecks, VerificationEngine};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeError, ProbeResponse};
pub use report::{CheckOutcome, CheckResult, TargetKind, VerificationReport};
