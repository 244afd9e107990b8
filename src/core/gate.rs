//! Bounded concurrency for outbound calls.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps the number of in-flight calls to one external system.
///
/// Sized independently of the number of muppets so that many parallel
/// lifecycle operations still respect the provider's rate limits.
#[derive(Debug, Clone)]
pub struct CallGate {
    name: &'static str,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl CallGate {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `fut` once a permit is free; the permit is released when the
    /// future completes or is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = match self.permits.acquire().await {
            Ok(permit) => Some(permit),
            Err(_) => None,
        };
        tracing::trace!(gate = self.name, "Acquired outbound call permit");
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_bounds_concurrency() {
        let gate = CallGate::new("test", 2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                gate.run(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let gate = CallGate::new("test", 0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.name(), "test");
    }
}
