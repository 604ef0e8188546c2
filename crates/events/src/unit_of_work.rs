//! Unit of work: buffers after-commit callbacks for one transaction.
//!
//! The storage adapter owns the unit; the core only registers callbacks via
//! [`UnitOfWork::on_commit`]. Callbacks run exactly once on [`commit`](UnitOfWork::commit)
//! and never run if the unit is rolled back or dropped.

use std::sync::Mutex;

/// Deferred work scheduled for after a successful commit.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct UnitOfWork {
    callbacks: Mutex<Vec<Callback>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_commit(&self, callback: Callback) {
        self.lock().push(callback);
    }

    /// Number of callbacks waiting for commit.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run every buffered callback in registration order; returns how many ran.
    pub fn commit(self) -> usize {
        let callbacks = self.take();
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    /// Discard buffered callbacks; returns how many were dropped.
    pub fn rollback(self) -> usize {
        self.take().len()
    }

    fn take(&self) -> Vec<Callback> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Callback>> {
        self.callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Callback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn commit_runs_callbacks_once_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let uow = UnitOfWork::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            uow.on_commit(Box::new(move || order.lock().unwrap().push(i)));
        }
        assert_eq!(uow.pending(), 3);

        assert_eq!(uow.commit(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn rollback_and_drop_discard_callbacks() {
        let counter = Arc::new(AtomicUsize::new(0));

        let uow = UnitOfWork::new();
        uow.on_commit(counting(&counter));
        assert_eq!(uow.rollback(), 1);

        let uow = UnitOfWork::new();
        uow.on_commit(counting(&counter));
        drop(uow);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
