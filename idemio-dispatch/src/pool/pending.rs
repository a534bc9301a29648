use crate::logger::{self, Component};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// A wait group counting units of work that have been started but not yet finished.
///
/// `enter` must be called before the unit is handed to another context and `leave` exactly
/// once when it is done. The caller whose `leave` brings the count to zero is told so and is
/// responsible for whatever happens on idle.
#[derive(Debug, Default)]
pub struct PendingWork {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one unit as finished. Returns `true` if this was the last outstanding unit.
    pub fn leave(&self) -> bool {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(1) => {
                self.idle.notify_waiters();
                true
            }
            Ok(_) => false,
            Err(_) => {
                logger::error(
                    Component::WorkerPool,
                    None,
                    "Pending work left without a matching enter",
                );
                false
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once the count is zero.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}
