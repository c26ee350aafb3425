use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::{oneshot, Notify};

/// Collects prefixes awaiting release.
///
/// Enqueueing never blocks on the release itself. Prefixes enqueued between two drains are
/// coalesced, so each prefix is released at most once per batch.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReleaseQueue(Arc<Shared>);

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Pending>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct Pending {
    prefixes: Vec<String>,
    seen: HashSet<String>,
    reasons: BTreeSet<&'static str>,
    flushes: Vec<oneshot::Sender<()>>,

    /// Set once the worker has stopped. Flushes fail immediately.
    closed: bool,
}

/// A drained set of pending releases.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub prefixes: Vec<String>,
    pub reasons: BTreeSet<&'static str>,
    flushes: Vec<oneshot::Sender<()>>,
}

// === impl ReleaseQueue ===

impl ReleaseQueue {
    /// Adds prefixes to the pending batch and wakes the worker. Returns the number of prefixes
    /// that were not already pending.
    pub(crate) fn enqueue(
        &self,
        prefixes: impl IntoIterator<Item = String>,
        reason: &'static str,
    ) -> usize {
        let added = {
            let mut pending = self.0.pending.lock();
            let mut added = 0;
            for prefix in prefixes {
                if pending.seen.insert(prefix.clone()) {
                    pending.prefixes.push(prefix);
                    added += 1;
                }
            }
            pending.reasons.insert(reason);
            added
        };
        self.0.notify.notify_one();
        added
    }

    /// Asks the worker to process the pending batch immediately. The returned receiver completes
    /// once every prefix pending at the time of the call has been processed, or fails if the
    /// worker is gone.
    pub(crate) fn flush(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.0.pending.lock();
            if pending.closed {
                return rx;
            }
            pending.flushes.push(tx);
        }
        self.0.notify.notify_one();
        rx
    }

    /// Marks the worker as stopped, failing every outstanding and future flush.
    pub(crate) fn close(&self) {
        let flushes = {
            let mut pending = self.0.pending.lock();
            pending.closed = true;
            std::mem::take(&mut pending.flushes)
        };
        drop(flushes);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.pending.lock().prefixes.len()
    }

    pub(crate) fn flush_requested(&self) -> bool {
        !self.0.pending.lock().flushes.is_empty()
    }

    /// Waits until the queue has been updated.
    pub(crate) async fn notified(&self) {
        self.0.notify.notified().await
    }

    /// Atomically takes everything that is pending.
    pub(crate) fn take(&self) -> Batch {
        let mut pending = self.0.pending.lock();
        let closed = pending.closed;
        let Pending {
            prefixes,
            reasons,
            flushes,
            ..
        } = std::mem::replace(
            &mut *pending,
            Pending {
                closed,
                ..Pending::default()
            },
        );
        Batch {
            prefixes,
            reasons,
            flushes,
        }
    }
}

// === impl Batch ===

impl Batch {
    /// Notifies flush callers that this batch has been processed.
    pub(crate) fn complete(self) {
        for tx in self.flushes {
            let _ = tx.send(());
        }
    }
}
