//! Background history writes.
//!
//! Non-blocking registrations hand their writes to a [`WriteSupervisor`]
//! instead of awaiting them inside the hook phase. The supervisor runs each
//! write as a detached Tokio task, logs failures, and counts them; the
//! triggering operation never observes the outcome.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::error;

use crate::error::TemporaError;

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    failed: AtomicU64,
    idle: Notify,
}

/// Decrements the in-flight count when a write finishes or is dropped.
struct InFlight(Arc<Counters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Tracks fire-and-forget history writes.
///
/// Cheap to clone; clones share counters.
#[derive(Debug, Clone, Default)]
pub struct WriteSupervisor {
    counters: Arc<Counters>,
}

impl WriteSupervisor {
    /// A supervisor with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `write` in the background. Must be called within a Tokio runtime.
    pub fn spawn<F>(&self, label: String, write: F)
    where
        F: Future<Output = Result<(), TemporaError>> + Send + 'static,
    {
        self.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.counters));
        tokio::spawn(async move {
            if let Err(e) = write.await {
                guard.0.failed.fetch_add(1, Ordering::Relaxed);
                error!(write = %label, error = %e, "Background history write failed");
            }
        });
    }

    /// Record a failure that happened outside a spawned write.
    pub fn report_failure(&self, label: &str, error: &TemporaError) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        error!(write = %label, error = %error, "Background history write failed");
    }

    /// Writes started but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    /// Writes that failed so far.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Wait until no write is in flight.
    pub async fn settle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn settle_waits_for_every_write() {
        let supervisor = WriteSupervisor::new();
        for delay in [5_u64, 15, 25] {
            supervisor.spawn("test".to_owned(), async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(())
            });
        }
        assert_eq!(supervisor.in_flight(), 3);

        supervisor.settle().await;
        assert_eq!(supervisor.in_flight(), 0);
        assert_eq!(supervisor.failed(), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let supervisor = WriteSupervisor::new();
        supervisor.spawn("test".to_owned(), async {
            Err(TemporaError::Storage("disk full".to_owned()))
        });
        supervisor.report_failure("test", &TemporaError::Storage("offline".to_owned()));

        supervisor.settle().await;
        assert_eq!(supervisor.failed(), 2);
    }

    #[tokio::test]
    async fn settle_returns_immediately_when_idle() {
        WriteSupervisor::new().settle().await;
    }
}
