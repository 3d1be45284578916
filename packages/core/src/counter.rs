//! The process counter: a reference-counted barrier over in-flight deliveries.
//!
//! Every multicast (`send`, listener wakes during removal, the free phase of a
//! cancellation) hands each dispatched listener one unit on a shared counter.
//! The unit is released when that listener's `process` call finishes, on
//! whichever worker it ran. When the counter drains, the registered callback
//! fires exactly once - this is what lets `send` return an event that
//! completes only after every handler has returned.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct ProcessCounter {
    pending: AtomicUsize,
    on_zero: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ProcessCounter {
    pub fn new(initial: usize, on_zero: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicUsize::new(initial),
            on_zero: Mutex::new(Some(Box::new(on_zero))),
        })
    }

    /// Reserve `n` more units before dispatching that many deliveries.
    pub fn add(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::AcqRel);
    }

    /// Release one unit; runs the zero-callback when the last unit drains.
    pub fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(callback) = self.on_zero.lock().take() {
                callback();
            }
        }
    }
}
