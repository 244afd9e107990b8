//! CI/CD pipeline version history
//!
//! Every set of workflow files pushed to a muppet's repository is recorded
//! as an immutable, numbered [`PipelineVersion`]. Rolling back appends a new
//! version carrying an older version's content.

pub mod errors;
pub mod manager;
pub mod version;

pub use errors::PipelineError;
pub use manager::{PipelineVersionManager, labels};
pub use version::PipelineVersion;
