//! Source-control side of a muppet.
//!
//! [`SourceControlProvider`] is the consumed provider contract, implemented
//! for GitHub by [`GitHubProvider`]. [`RepositoryManager`] layers the
//! idempotency rules, retries and outbound concurrency limits on top.

pub mod errors;
pub mod github;
pub mod manager;
pub mod provider;

pub use errors::RepositoryError;
pub use github::GitHubProvider;
pub use manager::{RepositoryManager, RepositorySettings};
pub use provider::{
    BranchProtection, Collaborator, CollaboratorRole, CommitOutcome, CommitSet, NewRepository,
    Principal, RepositoryInfo, SourceControlProvider,
};
