//! Muppets lifecycle library
//!
//! Provisions and manages "muppets" (templated microservices) by
//! coordinating a source-control provider, an infrastructure-as-code engine
//! and a container platform, keeping one durable lifecycle record per muppet.
#![deny(unsafe_code)]

pub mod application;
pub mod core;
pub mod infra;
pub mod lifecycle;
pub mod pipelines;
pub mod repository;
pub mod templates;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::error::{Error, ErrorKind, Result};
