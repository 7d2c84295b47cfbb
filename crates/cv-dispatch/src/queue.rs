//! Bounded work queue shared by fetch loops and workers
//!
//! A bounded mpsc channel carries the entries; a counter of unfinished entries
//! lets the dispatcher wait until every enqueued message has been fully
//! handled (not merely dequeued) before it stops the workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, Mutex, Notify};

use cv_common::RawMessage;

use crate::route::Route;

/// One message paired with the route it was fetched from
#[derive(Debug)]
pub struct QueueEntry {
    pub message: RawMessage,
    pub route: Arc<Route>,
}

pub struct WorkQueue {
    tx: mpsc::Sender<QueueEntry>,
    rx: Mutex<mpsc::Receiver<QueueEntry>>,
    unfinished: AtomicUsize,
    drained: Notify,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx,
            rx: Mutex::new(rx),
            unfinished: AtomicUsize::new(0),
            drained: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries enqueued but not yet marked done (queued plus in progress)
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }

    /// Enqueue an entry, waiting while the queue is full.
    ///
    /// The slot is reserved before the entry is counted, so a put abandoned
    /// while waiting leaves the count untouched.
    pub async fn put(&self, entry: QueueEntry) -> Result<(), SendError<QueueEntry>> {
        let permit = match self.tx.reserve().await {
            Ok(permit) => permit,
            Err(_) => return Err(SendError(entry)),
        };

        self.unfinished.fetch_add(1, Ordering::AcqRel);
        permit.send(entry);
        Ok(())
    }

    /// Take the next entry, waiting while the queue is empty.
    ///
    /// The returned [`TaskDone`] marks the entry finished when dropped.
    pub async fn get(&self) -> Option<(QueueEntry, TaskDone<'_>)> {
        let entry = self.rx.lock().await.recv().await?;
        Some((entry, TaskDone { queue: self }))
    }

    /// Wait until every enqueued entry has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn task_done(&self) {
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Marks a dequeued entry as done when dropped
///
/// An entry whose processing failed stays unfinished: use [`TaskDone::abandon`],
/// and a guard dropped while its task is panicking is not counted either. The
/// queue then never drains, so the failure cannot be mistaken for a clean finish.
#[must_use = "dropping the guard marks the entry as done"]
pub struct TaskDone<'a> {
    queue: &'a WorkQueue,
}

impl TaskDone<'_> {
    /// Leave the entry unfinished
    pub fn abandon(self) {
        std::mem::forget(self);
    }
}

impl Drop for TaskDone<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.queue.task_done();
        }
    }
}
