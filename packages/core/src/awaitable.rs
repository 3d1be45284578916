//! The base contract for everything a frame can suspend on.
//!
//! An awaitable tracks a display name, an optional parent frame, a monotonic
//! `removed` flag, a stored result, and a set of listeners. Listeners are
//! *non-owning* weak references: ownership flows strictly parent to child, so
//! a listener edge can never keep a subtree alive or form a cycle.
//!
//! The shared `process`/`finalize_remove` machinery lives here as provided
//! trait methods; concrete awaitables only supply their `step` transition.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::combinator::{All, Any};
use crate::counter::ProcessCounter;
use crate::error::{val, Error, Outcome};
use crate::event::Event;
use crate::frame::Frame;
use crate::pool;
use crate::runtime;

/// Shared handle to any awaitable.
pub type AwaitableRef = Arc<dyn Awaitable>;

/// A handler consulted when a frame body fails with nobody listening.
/// Returns `true` when the error was handled.
pub type ExceptionHandler = Arc<dyn Fn(&AwaitableRef, &Error) -> bool + Send + Sync>;

/// Message delivered into [`Awaitable::step`].
pub enum StepInput {
    /// First step of a frame body.
    Start,
    /// A listened-to awaitable produced a result or failed.
    Wake {
        sender: AwaitableRef,
        outcome: Outcome,
    },
}

/// Result of a [`Awaitable::step`] transition.
pub enum StepResult {
    /// Still active.
    Continue,
    /// Finished: store the outcome and remove.
    Complete(Outcome),
}

/// State common to every awaitable.
pub struct AwaitableCore {
    name: String,
    this: Weak<dyn Awaitable>,
    parent: Mutex<Option<Weak<Frame>>>,
    removed: AtomicBool,
    result: Mutex<Option<Outcome>>,
    listeners: Mutex<Vec<Weak<dyn Awaitable>>>,
    affinity: Option<usize>,
    exception_handler: Mutex<Option<ExceptionHandler>>,
}

impl AwaitableCore {
    pub(crate) fn new(
        name: impl Into<String>,
        this: Weak<dyn Awaitable>,
        parent: Option<Weak<Frame>>,
        affinity: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            this,
            parent: Mutex::new(parent),
            removed: AtomicBool::new(false),
            result: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            affinity,
            exception_handler: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// The stored result; `Ok(none)` while empty (silent termination).
    pub fn result(&self) -> Outcome {
        self.result
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(crate::error::none()))
    }

    /// Worker this awaitable is pinned to, if any.
    pub fn affinity(&self) -> Option<usize> {
        self.affinity
    }

    pub(crate) fn this(&self) -> Option<AwaitableRef> {
        self.this.upgrade()
    }

    /// Transition to removed; `true` when this call made the transition.
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }

    /// Store a result unless one is already present (first completion wins).
    pub(crate) fn set_result(&self, outcome: Outcome) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
    }

    /// Overwrite the result; used by multi-shot events on refire.
    pub(crate) fn replace_result(&self, outcome: Outcome) {
        *self.result.lock() = Some(outcome);
    }

    pub(crate) fn parent_frame(&self) -> Option<Arc<Frame>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn clear_parent(&self) {
        *self.parent.lock() = None;
    }

    /// Register a listener. Returns `false` when the awaitable is already
    /// removed, in which case the caller takes the stored result instead.
    pub(crate) fn add_listener(&self, listener: &AwaitableRef) -> bool {
        let mut listeners = self.listeners.lock();
        if self.is_removed() {
            return false;
        }
        if !listeners.iter().any(|known| same_weak(known, listener)) {
            listeners.push(Arc::downgrade(listener));
        }
        true
    }

    pub(crate) fn remove_listener(&self, listener: &AwaitableRef) {
        self.listeners
            .lock()
            .retain(|known| !same_weak(known, listener));
    }

    /// Drain the listener set for delivery.
    pub(crate) fn take_listeners(&self) -> Vec<AwaitableRef> {
        self.listeners
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Copy of the listener set, left in place.
    pub(crate) fn listeners_snapshot(&self) -> Vec<AwaitableRef> {
        self.listeners
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn has_listeners(&self) -> bool {
        self.listeners.lock().iter().any(|weak| weak.strong_count() > 0)
    }

    pub(crate) fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.exception_handler.lock().clone()
    }

    pub(crate) fn set_exception_handler(&self, handler: ExceptionHandler) {
        *self.exception_handler.lock() = Some(handler);
    }
}

/// Identity comparison over fat pointers.
pub(crate) fn same_awaitable(a: &AwaitableRef, b: &AwaitableRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn same_weak(a: &Weak<dyn Awaitable>, b: &AwaitableRef) -> bool {
    a.as_ptr() as *const () == Arc::as_ptr(b) as *const ()
}

/// Anything a frame can await.
pub trait Awaitable: Send + Sync + 'static {
    fn core(&self) -> &AwaitableCore;

    /// Component-specific transition consuming one wake.
    fn step(&self, input: StepInput) -> StepResult;

    /// Whether a frame suspending on this awaitable counts as settled.
    ///
    /// Plain events have no readiness notion and report `true`; frames and
    /// combinators derive it.
    fn is_ready(&self) -> bool {
        true
    }

    /// Called when an awaited child first becomes ready; combinators and
    /// frames use it to propagate readiness through listener edges.
    fn notify_ready(&self) {}

    /// Hook run while finalizing removal, before listeners wake.
    fn on_remove(&self) {}

    /// Downcast hook for hierarchy walks.
    fn as_frame(&self) -> Option<Arc<Frame>> {
        None
    }

    /// Removal driven by an owning frame's teardown. Non-frames detach and
    /// wake their listeners; frames skip their (already finished) free phase
    /// and run stage 2 of the removal protocol.
    fn teardown(&self) {
        self.finalize_remove(None, true);
    }

    /// User-facing removal. The returned single-shot event carries `true`
    /// when this call performed the removal and `false` otherwise.
    fn remove(&self) -> Arc<Event> {
        let performed = self.finalize_remove(None, true);
        Event::fired(
            format!("{}.removed", self.core().name()),
            Ok(val(performed)),
        )
    }

    /// Deliver one wake: run `step`, then store/propagate per its result.
    ///
    /// Exactly one unit of `counter` is released once this listener's handler
    /// has returned. The sender's counter gates only this first hop: a
    /// completed listener wakes its own listeners ungated, so a `send` gate
    /// never waits on unrelated frames further down the cascade.
    fn process(&self, input: StepInput, counter: Option<&Arc<ProcessCounter>>, blocking: bool) {
        if self.core().is_removed() {
            // late wake of something already gone still settles the barrier
            if let Some(counter) = counter {
                counter.done();
            }
            return;
        }
        match self.step(input) {
            StepResult::Continue => {
                if let Some(counter) = counter {
                    counter.done();
                }
            }
            StepResult::Complete(outcome) => {
                self.core().set_result(outcome.clone());
                if let Err(error) = &outcome {
                    if !self.core().has_listeners() {
                        self.handle_unobserved_error(error);
                    }
                }
                self.finalize_remove(None, blocking);
                if let Some(counter) = counter {
                    counter.done();
                }
            }
        }
    }

    /// Shared removal tail: mark removed, detach from the parent, wake every
    /// listener exactly once with the stored result. `counter`, when
    /// supplied, gates exactly those wakes (one hop) and owes one unit for
    /// this call. Returns `true` when this call made the transition.
    fn finalize_remove(&self, counter: Option<&Arc<ProcessCounter>>, blocking: bool) -> bool {
        if !self.core().mark_removed() {
            if let Some(counter) = counter {
                counter.done();
            }
            return false;
        }
        trace!(name = %self.core().name(), "removed");
        if let (Some(parent), Some(this)) = (self.core().parent_frame(), self.core().this()) {
            parent.forget_child(&this);
        }
        self.core().clear_parent();
        self.on_remove();
        self.wake_listeners(counter, blocking);
        true
    }

    /// Wake the drained listener set with the stored result.
    fn wake_listeners(&self, counter: Option<&Arc<ProcessCounter>>, blocking: bool) {
        let listeners = self.core().take_listeners();
        if let Some(sender) = self.core().this() {
            let outcome = self.core().result();
            for listener in listeners {
                dispatch_wake(&sender, listener, outcome.clone(), counter, blocking);
            }
        }
        if let Some(counter) = counter {
            counter.done();
        }
    }

    /// Walk the exception-handler chain for a failure nobody awaits; an
    /// unhandled error stops the pool.
    fn handle_unobserved_error(&self, error: &Error) {
        let mut node = self.core().this();
        while let Some(current) = node {
            if let Some(handler) = current.core().exception_handler() {
                if handler(&current, error) {
                    debug!(frame = %current.core().name(), %error, "error handled");
                    return;
                }
            }
            node = current
                .core()
                .parent_frame()
                .map(|frame| frame as AwaitableRef);
        }
        if let Some(pool) = runtime::current_pool() {
            pool.store_error(error.clone());
        } else {
            warn!(%error, "unhandled error outside a running loop");
        }
    }
}

/// Deliver one listener wake, honouring affinity and the blocking mode.
///
/// Blocking wakes run on the current thread when the listener has no foreign
/// affinity; everything else is enqueued on the listener's worker (or the
/// shared queue when unpinned).
pub(crate) fn dispatch_wake(
    sender: &AwaitableRef,
    listener: AwaitableRef,
    outcome: Outcome,
    counter: Option<&Arc<ProcessCounter>>,
    blocking: bool,
) {
    if let Some(counter) = counter {
        counter.add(1);
    }
    trace!(
        from = %sender.core().name(),
        to = %listener.core().name(),
        "wake"
    );
    let affinity = listener.core().affinity();
    let local = affinity.is_none() || affinity == runtime::current_worker();
    if blocking && local {
        listener.process(
            StepInput::Wake {
                sender: sender.clone(),
                outcome,
            },
            counter,
            true,
        );
    } else {
        let sender = sender.clone();
        let counter = counter.cloned();
        let job = Box::new(move || {
            listener.process(
                StepInput::Wake { sender, outcome },
                counter.as_ref(),
                true,
            );
        });
        if let Err(error) = pool::enqueue(Duration::ZERO, job, affinity) {
            warn!(%error, "dropped a listener wake");
        }
    }
}

/// Sugar available on every awaitable handle.
pub trait AwaitableExt: Awaitable {
    /// The shared handle to this awaitable.
    fn handle(&self) -> AwaitableRef {
        self.core().this().expect("awaitable is being dropped")
    }

    /// Suspend the current frame body on this awaitable.
    ///
    /// Resolves immediately with the stored result when already removed.
    fn wait(&self) -> WaitFuture {
        WaitFuture::new(self.handle())
    }

    /// Conjunction: every operand's result, in input order.
    fn and(&self, other: &dyn Awaitable) -> Arc<All> {
        All::new(vec![self.handle(), other.handle()])
    }

    /// Disjunction: the first operand to produce a value.
    fn or(&self, other: &dyn Awaitable) -> Arc<Any> {
        Any::new(vec![self.handle(), other.handle()])
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn removed(&self) -> bool {
        self.core().is_removed()
    }

    fn result(&self) -> Outcome {
        self.core().result()
    }
}

impl<T: Awaitable + ?Sized> AwaitableExt for T {}

impl fmt::Display for dyn Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.core().name())
    }
}

impl fmt::Debug for dyn Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaitable")
            .field("name", &self.core().name())
            .field("removed", &self.core().is_removed())
            .finish()
    }
}

impl PartialEq for dyn Awaitable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            self.core() as *const AwaitableCore,
            other.core() as *const AwaitableCore,
        )
    }
}

impl Eq for dyn Awaitable {}

// Awaitables order by name, with identity as the tie-break.
impl Ord for dyn Awaitable {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.core()
            .name()
            .cmp(other.core().name())
            .then_with(|| {
                (self.core() as *const AwaitableCore as usize)
                    .cmp(&(other.core() as *const AwaitableCore as usize))
            })
    }
}

impl PartialOrd for dyn Awaitable {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// The suspension point: awaiting this inside a frame body parks the frame
/// as a listener of the target until the target produces a result.
pub struct WaitFuture {
    target: AwaitableRef,
    registered: Option<Arc<Frame>>,
    finished: bool,
}

impl WaitFuture {
    pub(crate) fn new(target: AwaitableRef) -> Self {
        Self {
            target,
            registered: None,
            finished: false,
        }
    }
}

impl Future for WaitFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(frame) = runtime::current_frame() else {
            this.finished = true;
            return Poll::Ready(Err(Error::invalid_operation(
                "awaited outside a frame body",
            )));
        };
        if let Some(outcome) = frame.take_delivery(&this.target) {
            this.finished = true;
            return Poll::Ready(outcome);
        }
        if this.registered.is_some() {
            // already listed; nothing to do until the target wakes us
            return Poll::Pending;
        }
        if this.target.core().is_removed() {
            this.finished = true;
            return Poll::Ready(this.target.core().result());
        }
        let listener: AwaitableRef = frame.clone();
        if !this.target.core().add_listener(&listener) {
            this.finished = true;
            return Poll::Ready(this.target.core().result());
        }
        trace!(frame = %frame.core().name(), target = %this.target.core().name(), "await");
        frame.set_active_child(this.target.clone());
        this.registered = Some(frame);
        Poll::Pending
    }
}

impl Drop for WaitFuture {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(frame) = self.registered.take() {
            let listener: AwaitableRef = frame;
            self.target.core().remove_listener(&listener);
        }
    }
}
