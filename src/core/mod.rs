//! Shared building blocks for the lifecycle service.
//!
//! Configuration, the crate-wide error taxonomy, retry and concurrency
//! primitives, the shell command executor and string helpers used when
//! deriving identifiers from muppet names.

pub mod config;
pub mod error;
pub mod gate;
pub mod retry;
pub mod shell;
pub mod utils;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use gate::CallGate;
pub use retry::{RetryPolicy, Retryable};
pub use shell::{CommandExecutor, CommandResult, ShellCommandExecutor};
