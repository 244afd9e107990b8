//! Per-muppet mutual exclusion
//!
//! Operations on the same muppet are serialized; different muppets run in
//! parallel. A second caller is either rejected or queued, depending on
//! the configured [`LockMode`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::{Error, Result};

/// Behaviour when a muppet is already locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Fail fast with `OperationInProgress`
    #[default]
    Reject,
    /// Wait for the running operation to finish
    Block,
}

/// Held while an operation runs; dropping it releases the muppet
#[derive(Debug)]
pub struct MuppetGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl MuppetGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Process-scoped table of per-muppet locks
#[derive(Debug, Default)]
pub struct LockTable {
    mode: LockMode,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    fn entry(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `name` according to the table's mode
    pub async fn acquire(&self, name: &str) -> Result<MuppetGuard> {
        let lock = self.entry(name);
        let guard = match self.mode {
            LockMode::Reject => lock
                .try_lock_owned()
                .map_err(|_| Error::OperationInProgress(name.to_string()))?,
            LockMode::Block => {
                if lock.try_lock().is_err() {
                    tracing::info!(muppet = %name, "Waiting for running operation to finish");
                }
                lock.lock_owned().await
            }
        };
        tracing::trace!(muppet = %name, "Acquired muppet lock");
        Ok(MuppetGuard {
            name: name.to_string(),
            _guard: guard,
        })
    }

    /// True when an operation currently holds `name`
    pub fn is_locked(&self, name: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
