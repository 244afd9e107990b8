//! Caller-supplied deadline for a lifecycle operation

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::{Error, Result};
use crate::lifecycle::Step;

/// Deadline shared by every step of one operation
///
/// When the deadline passes, the in-flight step's future is dropped, which
/// cancels the external call it was making (child processes are killed,
/// HTTP requests aborted).
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
}

impl OperationContext {
    /// No deadline
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::with_timeout).unwrap_or_default()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Run one step, mapping an expired deadline to `Cancelled`
    pub async fn run<T, E, F>(&self, step: Step, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        Error: From<E>,
    {
        let Some(deadline) = self.deadline else {
            return fut.await.map_err(Error::from);
        };
        if Instant::now() >= deadline {
            return Err(Error::Cancelled { step });
        }
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                tracing::warn!(step = %step, "Deadline reached, cancelling step");
                Err(Error::Cancelled { step })
            }
        }
    }
}
