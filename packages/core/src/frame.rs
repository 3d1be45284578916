//! Frames: hierarchical suspendable tasks.
//!
//! A frame owns its child frames, combinators, and primitives; tearing a
//! frame down cascades through all of them in LIFO order. The body is an
//! async computation stepped explicitly by the scheduler: a delivered message
//! is placed in the frame's slot and the body is polled once, yielding either
//! a new awaited target, a result, or an error.
//!
//! Cancellation is cooperative. `remove` first runs the *free* phase: the
//! frame's `free` event (and every descendant frame's) fires with a shared
//! [`FreeArgs`], and any handler may veto the attempt. Only an unvetoed
//! attempt proceeds to the destructive stage behind the per-frame removal
//! lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::task::noop_waker;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::awaitable::{
    same_awaitable, Awaitable, AwaitableCore, AwaitableRef, ExceptionHandler, StepInput,
    StepResult,
};
use crate::counter::ProcessCounter;
use crate::error::{none, val, AnyValue, Error, Outcome};
use crate::event::Event;
use crate::pool;
use crate::primitive::Primitive;
use crate::runtime;

/// The root frame class; every other class descends from it.
pub static FRAME: FrameClass = FrameClass::root("Frame");

/// The class of frames with no worker affinity.
pub static PFRAME: FrameClass = FrameClass::subclass("PFrame", &FRAME);

/// A frame class: a named node in a static single-inheritance hierarchy.
///
/// Classes exist so auxiliary objects ([`Primitive`]) can bind to the nearest
/// ancestor frame of a declared class. Declare one as a `static` and hand out
/// `&'static` references:
///
/// ```
/// use frameflow_core::{FrameClass, FRAME};
/// static MY_FRAME: FrameClass = FrameClass::subclass("MyFrame", &FRAME);
/// assert!(MY_FRAME.is_subclass_of(&FRAME));
/// ```
pub struct FrameClass {
    name: &'static str,
    parent: Option<&'static FrameClass>,
}

impl FrameClass {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn subclass(name: &'static str, parent: &'static FrameClass) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Walks the parent chain; a class is a subclass of itself.
    pub fn is_subclass_of(&'static self, other: &'static FrameClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if std::ptr::eq(class, other) {
                return true;
            }
            current = class.parent;
        }
        false
    }
}

/// Arguments of a `free` firing. Handlers veto the removal attempt by
/// calling [`FreeArgs::cancel`].
#[derive(Default)]
pub struct FreeArgs {
    cancel: AtomicBool,
}

impl FreeArgs {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// When a freshly created frame's body takes its first step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Startup {
    /// First step dispatched through the event loop (the default).
    Delayed,
    /// First step taken synchronously inside the factory call.
    Immediate,
}

#[derive(Clone, Copy)]
enum AffinityMode {
    /// Pin to the creating worker (the default for frames).
    Inherit,
    /// No affinity: any worker may step the body (PFrame).
    Any,
    /// Pin to an explicit worker.
    Worker(usize),
}

pub(crate) type BodyFuture = Pin<Box<dyn Future<Output = Outcome> + Send + 'static>>;

#[derive(Default)]
struct FrameState {
    body: Option<BodyFuture>,
    slot: Option<(AwaitableRef, Outcome)>,
    active_child: Option<AwaitableRef>,
    children: Vec<AwaitableRef>,
    primitives: Vec<Arc<Primitive>>,
    running_on: Option<usize>,
    close_deferred: bool,
}

/// A hierarchical suspendable task; the node of the frame tree.
pub struct Frame {
    core: AwaitableCore,
    this: Weak<Frame>,
    class: &'static FrameClass,
    state: Mutex<FrameState>,
    // serializes body polls; a frame's body is stepped by one worker at a time
    step_lock: Mutex<()>,
    // serializes the destructive stage of removal
    removal: Mutex<()>,
    freeing: AtomicBool,
    ready_fired: AtomicBool,
    ready: Arc<Event>,
    free: Arc<Event>,
}

impl Frame {
    /// Fires once, when this frame first settles: either suspended on a
    /// ready awaitable or terminated.
    pub fn ready(&self) -> Arc<Event> {
        self.ready.clone()
    }

    /// Fires during each removal attempt, before the frame is destroyed,
    /// carrying a [`FreeArgs`] payload.
    pub fn free(&self) -> Arc<Event> {
        self.free.clone()
    }

    pub fn class(&self) -> &'static FrameClass {
        self.class
    }

    /// Install the handler consulted when this frame (or a descendant with no
    /// handler of its own) fails with nobody listening.
    pub fn set_exception_handler(
        &self,
        handler: impl Fn(&AwaitableRef, &Error) -> bool + Send + Sync + 'static,
    ) {
        let handler: ExceptionHandler = Arc::new(handler);
        self.core.set_exception_handler(handler);
    }

    pub(crate) fn arc(&self) -> Arc<Frame> {
        self.this.upgrade().expect("frame is being dropped")
    }

    pub(crate) fn add_child(&self, child: AwaitableRef) {
        self.state.lock().children.push(child);
    }

    pub(crate) fn forget_child(&self, child: &AwaitableRef) {
        self.state
            .lock()
            .children
            .retain(|known| !same_awaitable(known, child));
    }

    pub(crate) fn add_primitive(&self, primitive: Arc<Primitive>) {
        self.state.lock().primitives.push(primitive);
    }

    pub(crate) fn forget_primitive(&self, primitive: &Primitive) {
        self.state
            .lock()
            .primitives
            .retain(|known| !std::ptr::eq(Arc::as_ptr(known), primitive as *const Primitive));
    }

    pub(crate) fn parent_frame(&self) -> Option<Arc<Frame>> {
        self.core.parent_frame()
    }

    /// Take the message delivered for an await of `target`, if one is staged.
    pub(crate) fn take_delivery(&self, target: &AwaitableRef) -> Option<Outcome> {
        let mut state = self.state.lock();
        match &state.slot {
            Some((sender, _)) if same_awaitable(sender, target) => {
                state.slot.take().map(|(_, outcome)| outcome)
            }
            _ => None,
        }
    }

    pub(crate) fn set_active_child(&self, child: AwaitableRef) {
        self.state.lock().active_child = Some(child);
    }

    /// Emit `ready` (once) and push readiness through the listener edges.
    fn fire_ready(&self) {
        if self.ready_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(frame = %self.core.name(), "ready");
        self.ready.fire(Ok(none()), None, true);
        for listener in self.core.listeners_snapshot() {
            listener.notify_ready();
        }
    }

    /// Descendant frames in post-order (children before parents).
    fn collect_frames(&self, out: &mut Vec<Arc<Frame>>) {
        let children = self.state.lock().children.clone();
        for child in children {
            if let Some(frame) = child.as_frame() {
                frame.collect_frames(out);
                out.push(frame);
            }
        }
    }

    /// Stage 1 of removal: the cancellable free phase.
    fn begin_remove(&self, done: Arc<Event>) {
        if self.core.is_removed() {
            done.fire(Ok(val(false)), None, true);
            return;
        }
        if self.freeing.swap(true, Ordering::AcqRel) {
            // a free phase is already in flight; contend for stage 2 directly
            self.finish_remove(Some(done), false);
            return;
        }

        let mut frames = Vec::new();
        self.collect_frames(&mut frames);
        for frame in &frames {
            frame.freeing.store(true, Ordering::Release);
        }
        frames.push(self.arc());

        let args = Arc::new(FreeArgs::default());
        let payload: AnyValue = args.clone();
        let this = self.arc();
        let marked = frames.clone();
        let counter = ProcessCounter::new(1, move || {
            if args.cancelled() {
                for frame in &marked {
                    frame.freeing.store(false, Ordering::Release);
                }
                done.fire(Ok(val(false)), None, true);
            } else if this.core.is_removed() {
                // a free handler already removed the frame
                done.fire(Ok(val(true)), None, true);
            } else {
                this.finish_remove(Some(done), false);
            }
        });

        // the free emission is pinned to each frame's worker
        for frame in &frames {
            counter.add(1);
            let affinity = frame.core.affinity();
            if affinity.is_none() || affinity == runtime::current_worker() {
                frame.free.fire(Ok(payload.clone()), Some(&counter), true);
            } else {
                let free = frame.free.clone();
                let payload = payload.clone();
                let gate = counter.clone();
                let dispatched = pool::enqueue(
                    Duration::ZERO,
                    Box::new(move || free.fire(Ok(payload), Some(&gate), true)),
                    affinity,
                );
                if dispatched.is_err() {
                    counter.done();
                }
            }
        }
        counter.done();
    }

    /// Stage 2 of removal: the destructive phase behind the removal lock.
    fn finish_remove(&self, done: Option<Arc<Event>>, wait_for_lock: bool) {
        let guard = if wait_for_lock {
            Some(self.removal.lock())
        } else {
            self.removal.try_lock()
        };
        let Some(guard) = guard else {
            if let Some(done) = done {
                done.fire(Ok(val(false)), None, true);
            }
            return;
        };
        if self.core.is_removed() {
            if let Some(done) = done {
                done.fire(Ok(val(false)), None, true);
            }
            return;
        }
        // cascades through children, primitives, and the body via on_remove
        let performed = self.finalize_remove(None, true);
        drop(guard);
        if let Some(done) = done {
            done.fire(Ok(val(performed)), None, true);
        }
    }

    /// Drop the body, deferring when it is mid-poll on some worker.
    fn close_body(&self) {
        let mut state = self.state.lock();
        match state.running_on {
            // mid-step (possibly on this very worker, closing from within):
            // the stepping worker's epilogue performs the close
            Some(_) => state.close_deferred = true,
            None => {
                let body = state.body.take();
                drop(state);
                drop(body);
            }
        }
    }
}

impl Awaitable for Frame {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    fn step(&self, input: StepInput) -> StepResult {
        let _step = self.step_lock.lock();
        if self.core.is_removed() {
            return StepResult::Complete(self.core.result());
        }
        let mut body = {
            let mut state = self.state.lock();
            match state.body.take() {
                Some(body) => {
                    state.running_on = runtime::current_worker();
                    if let StepInput::Wake { sender, outcome } = input {
                        state.slot = Some((sender, outcome));
                    }
                    body
                }
                None => return StepResult::Continue,
            }
        };

        trace!(frame = %self.core.name(), "step");
        runtime::push_frame(self.arc());
        let waker = noop_waker();
        let mut task_context = Context::from_waker(&waker);
        let poll = body.as_mut().poll(&mut task_context);
        runtime::pop_frame();

        match poll {
            Poll::Ready(outcome) => {
                {
                    let mut state = self.state.lock();
                    state.running_on = None;
                    state.active_child = None;
                    state.slot = None;
                    state.close_deferred = false;
                }
                drop(body);
                self.fire_ready();
                StepResult::Complete(outcome)
            }
            Poll::Pending => {
                let target = {
                    let mut state = self.state.lock();
                    state.running_on = None;
                    state.slot = None;
                    let target = state.active_child.clone();
                    if state.close_deferred {
                        state.close_deferred = false;
                        drop(state);
                        drop(body);
                    } else {
                        state.body = Some(body);
                    }
                    target
                };
                if let Some(target) = target {
                    if target.core().is_removed() || target.is_ready() {
                        self.fire_ready();
                    }
                }
                StepResult::Continue
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready_fired.load(Ordering::Acquire)
    }

    fn notify_ready(&self) {
        self.fire_ready();
    }

    fn as_frame(&self) -> Option<Arc<Frame>> {
        Some(self.arc())
    }

    /// Cascade during `finalize_remove`: children LIFO, primitives LIFO,
    /// then the body.
    fn on_remove(&self) {
        loop {
            let child = self.state.lock().children.pop();
            let Some(child) = child else { break };
            child.teardown();
        }
        loop {
            let primitive = self.state.lock().primitives.pop();
            let Some(primitive) = primitive else { break };
            primitive.remove();
        }
        self.close_body();
    }

    /// Teardown driven by an owning frame: the free phase already ran (or is
    /// bypassed by completion), so go straight to the destructive stage.
    fn teardown(&self) {
        self.freeing.store(true, Ordering::Release);
        self.finish_remove(None, true);
    }

    fn remove(&self) -> Arc<Event> {
        let done = Event::single_shot(format!("{}.remove", self.core.name()));
        self.begin_remove(done.clone());
        done
    }
}

/// A reusable frame constructor: a name, a class, startup/affinity options,
/// and an async body. Calling [`spawn`](FrameFactory::spawn) inside a running
/// loop creates a new frame under the current one.
pub struct FrameFactory<A> {
    name: &'static str,
    class: &'static FrameClass,
    startup: Startup,
    affinity: AffinityMode,
    body: Arc<dyn Fn(Arc<Frame>, A) -> BodyFuture + Send + Sync>,
}

impl<A> Clone for FrameFactory<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            class: self.class,
            startup: self.startup,
            affinity: self.affinity,
            body: self.body.clone(),
        }
    }
}

impl<A: Send + 'static> FrameFactory<A> {
    /// Bind the factory to a frame class (the default is the root `FRAME`).
    pub fn with_class(mut self, class: &'static FrameClass) -> Self {
        self.class = class;
        self
    }

    /// Step the body synchronously inside the factory call instead of
    /// through the loop.
    pub fn immediate(mut self) -> Self {
        self.startup = Startup::Immediate;
        self
    }

    /// Drop the worker affinity: the body may be stepped by any worker.
    pub fn unpinned(mut self) -> Self {
        self.affinity = AffinityMode::Any;
        self
    }

    /// Pin the body to an explicit worker.
    pub fn pinned_to(mut self, worker: usize) -> Self {
        self.affinity = AffinityMode::Worker(worker);
        self
    }

    /// Create a frame running this factory's body.
    ///
    /// Requires a running loop. The new frame becomes a child of the current
    /// frame, when there is one.
    pub fn spawn(&self, args: A) -> Result<Arc<Frame>, Error> {
        if runtime::worker_context().is_none() {
            return Err(Error::invalid_operation(
                "frames can only be created inside a running event loop",
            ));
        }
        let parent = runtime::current_frame();
        let affinity = match self.affinity {
            AffinityMode::Inherit => runtime::current_worker(),
            AffinityMode::Any => None,
            AffinityMode::Worker(index) => Some(index),
        };
        let name = self.name;
        let class = self.class;
        let frame = Arc::<Frame>::new_cyclic(|this| {
            let dyn_this: Weak<dyn Awaitable> = this.clone();
            Frame {
                core: AwaitableCore::new(
                    name,
                    dyn_this,
                    parent.as_ref().map(Arc::downgrade),
                    affinity,
                ),
                this: this.clone(),
                class,
                state: Mutex::new(FrameState::default()),
                step_lock: Mutex::new(()),
                removal: Mutex::new(()),
                freeing: AtomicBool::new(false),
                ready_fired: AtomicBool::new(false),
                ready: Event::single_shot(format!("{name}.ready")),
                free: Event::new(format!("{name}.free"), false),
            }
        });
        debug!(frame = name, "created");
        if let Some(parent) = &parent {
            parent.add_child(frame.clone() as AwaitableRef);
        }

        let body = runtime::with_frame(frame.clone(), || (self.body)(frame.clone(), args));
        frame.state.lock().body = Some(body);

        match self.startup {
            Startup::Immediate => frame.process(StepInput::Start, None, true),
            Startup::Delayed => {
                let target = frame.clone();
                pool::enqueue(
                    Duration::ZERO,
                    Box::new(move || target.process(StepInput::Start, None, true)),
                    frame.core.affinity(),
                )?;
            }
        }
        Ok(frame)
    }
}

/// Define a worker-pinned frame factory from an async body.
///
/// ```ignore
/// let wait = frame("wait", |_this, (seconds, tag): (f64, String)| async move {
///     sleep(seconds)?.wait().await?;
///     Ok(val(tag))
/// });
/// let child = wait.spawn((0.1, "first".into()))?;
/// ```
pub fn frame<A, F, Fut>(name: &'static str, body: F) -> FrameFactory<A>
where
    A: Send + 'static,
    F: Fn(Arc<Frame>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    FrameFactory {
        name,
        class: &FRAME,
        startup: Startup::Delayed,
        affinity: AffinityMode::Inherit,
        body: Arc::new(move |frame, args| -> BodyFuture { Box::pin(body(frame, args)) }),
    }
}

/// Define a frame factory with no worker affinity (a PFrame).
pub fn pframe<A, F, Fut>(name: &'static str, body: F) -> FrameFactory<A>
where
    A: Send + 'static,
    F: Fn(Arc<Frame>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    frame(name, body).unpinned().with_class(&PFRAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_CLASS: FrameClass = FrameClass::subclass("TestFrame", &FRAME);
    static OTHER_ROOT: FrameClass = FrameClass::root("Detached");

    #[test]
    fn class_hierarchy_walks_to_the_root() {
        assert!(TEST_CLASS.is_subclass_of(&TEST_CLASS));
        assert!(TEST_CLASS.is_subclass_of(&FRAME));
        assert!(PFRAME.is_subclass_of(&FRAME));
        assert!(!FRAME.is_subclass_of(&TEST_CLASS));
        assert!(!TEST_CLASS.is_subclass_of(&OTHER_ROOT));
    }

    #[test]
    fn spawning_outside_a_loop_is_refused() {
        let factory = frame("orphan", |_frame, ()| async { Ok(none()) });
        assert!(matches!(
            factory.spawn(()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn free_args_latch() {
        let args = FreeArgs::default();
        assert!(!args.cancelled());
        args.cancel();
        assert!(args.cancelled());
    }
}
