//! Host task scheduling
//!
//! Notification and I/O threads must never run consumer callbacks inline:
//! a blocking consumer would stall the protocol loop and back up the
//! device. Instead, work is posted to a [`HostScheduler`] and drained on
//! whatever execution context the consumer prefers.

use std::sync::Arc;

/// A unit of deferred consumer work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Posts callbacks to run later on the consumer's execution context.
pub trait HostScheduler: Send + Sync {
    /// Queue a task. Must not block the caller; dropping the task under
    /// backpressure is preferable to stalling a protocol thread.
    fn schedule(&self, task: Task);
}

/// Channel-backed scheduler: protocol threads enqueue, the consumer drains.
///
/// The bounded channel gives backpressure a defined behavior: when the
/// consumer falls behind, new tasks are dropped with a warning rather than
/// blocking the notification loop.
pub struct ChannelScheduler {
    tx: flume::Sender<Task>,
}

impl ChannelScheduler {
    /// Create a scheduler and the receiver the consumer drains.
    pub fn new(capacity: usize) -> (Arc<Self>, TaskReceiver) {
        let (tx, rx) = flume::bounded(capacity);
        (Arc::new(Self { tx }), TaskReceiver { rx })
    }
}

impl HostScheduler for ChannelScheduler {
    fn schedule(&self, task: Task) {
        if self.tx.try_send(task).is_err() {
            log::warn!("[Host] Scheduler queue full, dropping task");
        }
    }
}

/// Consumer end of a [`ChannelScheduler`].
pub struct TaskReceiver {
    rx: flume::Receiver<Task>,
}

impl TaskReceiver {
    /// Run every task queued so far. Non-blocking.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Block for one task, bounded by `timeout`, and run it.
    pub fn run_one(&self, timeout: std::time::Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }
}

/// Runs tasks immediately on the calling thread.
///
/// Only suitable for tests and tools where the inversion does not matter.
pub struct InlineScheduler;

impl HostScheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_channel_scheduler_defers_work() {
        let (scheduler, receiver) = ChannelScheduler::new(16);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            scheduler.schedule(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // Nothing runs until the consumer drains.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(receiver.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_channel_scheduler_drops_when_full() {
        let (scheduler, receiver) = ChannelScheduler::new(1);
        scheduler.schedule(Box::new(|| {}));
        scheduler.schedule(Box::new(|| panic!("should have been dropped")));
        assert_eq!(receiver.run_pending(), 1);
    }

    #[test]
    fn test_inline_scheduler_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineScheduler.schedule(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
