use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::expiry_manager::{ExpiryConfig, HistoryExpiryManager};
use crate::readers::VisitReader;

/// Round-robin queue of readers still owed a background batch.
///
/// A reader whose batch came back full goes to the back of the line;
/// a drained reader drops out until the next round.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    readers: Vec<VisitReader>,
    queue: VecDeque<VisitReader>,
}

impl WorkQueue {
    pub fn new(readers: Vec<VisitReader>) -> Self {
        let mut work = Self {
            readers,
            queue: VecDeque::new(),
        };
        work.refill();
        work
    }

    /// Replaces the readers and starts a fresh round.
    pub fn reset(&mut self, readers: Vec<VisitReader>) {
        self.readers = readers;
        self.queue.clear();
        self.refill();
    }

    fn refill(&mut self) {
        debug_assert!(self.queue.is_empty());
        self.queue.extend(self.readers.iter().copied());
    }

    /// Delay before the next batch. An exhausted round is refilled and
    /// waits the long delay; otherwise the short one.
    pub fn next_delay(&mut self, config: &ExpiryConfig) -> Duration {
        if self.queue.is_empty() {
            self.refill();
            config.empty_delay
        } else {
            config.expiration_delay
        }
    }

    pub fn pop(&mut self) -> Option<VisitReader> {
        self.queue.pop_front()
    }

    pub fn requeue(&mut self, reader: VisitReader) {
        self.queue.push_back(reader);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn pending(&self) -> Vec<VisitReader> {
        self.queue.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Runs archive batches until the manager goes away, the schedule is
/// replaced, or the task is aborted.
pub(crate) fn spawn_archive_task(
    manager: Weak<HistoryExpiryManager>,
    generation: u64,
    first_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;

            let Some(manager) = manager.upgrade() else {
                debug!("Expiry manager dropped, stopping archive task");
                break;
            };

            // Store work and the bookmark wait are blocking.
            let next = tokio::task::spawn_blocking(move || {
                if let Err(e) = manager.do_archive_iteration(generation) {
                    warn!("Archive iteration failed: {}", e);
                }
                manager.schedule_archive(generation)
            })
            .await;

            delay = match next {
                Ok(Some(delay)) => delay,
                Ok(None) => {
                    debug!("Archive schedule {} superseded, stopping", generation);
                    break;
                }
                Err(e) => {
                    warn!("Archive iteration panicked: {}", e);
                    break;
                }
            };
        }
    })
}
