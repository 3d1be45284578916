//! Thread-local bookkeeping: which frame is executing and which pool worker
//! owns the current thread.
//!
//! Both pieces of state are per-thread by design. The frame stack is pushed
//! and popped around every body step so that nested sends cannot corrupt the
//! current-frame pointer; the worker context lives for the duration of a
//! `run` on its thread.

use std::cell::RefCell;
use std::sync::Arc;

use crate::frame::Frame;
use crate::pool::Pool;

thread_local! {
    static FRAMES: RefCell<Vec<Arc<Frame>>> = RefCell::new(Vec::new());
    static WORKER: RefCell<Option<WorkerContext>> = RefCell::new(None);
}

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub pool: Arc<Pool>,
    pub index: usize,
}

/// The frame whose body is executing on this thread, if any.
///
/// New frames, combinators, and primitives attach themselves to this frame.
pub fn current_frame() -> Option<Arc<Frame>> {
    FRAMES.with(|stack| stack.borrow().last().cloned())
}

/// Pushes a frame onto the current-frame stack.
pub(crate) fn push_frame(frame: Arc<Frame>) {
    FRAMES.with(|stack| stack.borrow_mut().push(frame));
}

/// Pops a frame off the current-frame stack.
pub(crate) fn pop_frame() {
    FRAMES.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// Runs `f` with `frame` as the current frame, restoring the previous one.
pub(crate) fn with_frame<R>(frame: Arc<Frame>, f: impl FnOnce() -> R) -> R {
    push_frame(frame);
    let out = f();
    pop_frame();
    out
}

pub(crate) fn install_worker(context: WorkerContext) {
    WORKER.with(|slot| *slot.borrow_mut() = Some(context));
}

pub(crate) fn uninstall_worker() {
    WORKER.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) fn worker_context() -> Option<WorkerContext> {
    WORKER.with(|slot| slot.borrow().clone())
}

/// Index of the pool worker driving this thread, if one is.
pub(crate) fn current_worker() -> Option<usize> {
    WORKER.with(|slot| slot.borrow().as_ref().map(|context| context.index))
}

pub(crate) fn current_pool() -> Option<Arc<Pool>> {
    WORKER.with(|slot| slot.borrow().as_ref().map(|context| context.pool.clone()))
}
