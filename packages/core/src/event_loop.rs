//! The pluggable event-loop contract and the built-in timer-queue backend.
//!
//! One loop instance drives one worker thread. The pool (see [`crate::pool`])
//! mints a sibling instance per extra worker and coordinates them through a
//! shared queue; everything a backend must provide is the five operations
//! below plus the thread spawn/join hooks. Concrete integrations (UI toolkit
//! loops, OS async primitives, timer wheels) implement this trait and reuse
//! the whole scheduler unchanged.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Outcome;
use crate::frame::FrameFactory;

/// A unit of work dispatched through an event loop.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A cooperatively-driven callback loop owning one worker thread.
pub trait EventLoop: Send + Sync + Sized + 'static {
    /// Schedule `job` to run on this loop after `delay`.
    ///
    /// Only called from the loop's own thread. A zero delay means "as soon as
    /// the loop becomes idle"; a positive delay is monotonic wall-clock time.
    fn post(&self, delay: Duration, job: Job);

    /// Thread-safe variant of [`post`](EventLoop::post): callable from any
    /// thread, the job still runs on this loop's thread.
    fn invoke(&self, delay: Duration, job: Job);

    /// Block the current thread dispatching jobs until [`stop`](EventLoop::stop).
    fn enter(&self);

    /// Make [`enter`](EventLoop::enter) return once the current job finishes.
    fn stop(&self);

    /// Drop all pending jobs.
    fn clear(&self);

    /// Mint a fresh loop instance for an additional pool worker.
    fn sibling(&self) -> Self;

    /// Worker-thread creation hook; override to veneer custom threading.
    fn spawn_thread(&self, body: Job) -> JoinHandle<()> {
        thread::Builder::new()
            .name("frameflow-worker".into())
            .spawn(body)
            .expect("failed to spawn a worker thread")
    }

    /// Worker-thread teardown hook.
    fn join_thread(&self, handle: JoinHandle<()>) {
        let _ = handle.join();
    }

    /// Run `factory`'s frame as the main frame of a fresh worker pool.
    ///
    /// Blocks until the main frame removes itself, then returns its result or
    /// the first unhandled error. `num_threads == 0` uses the processor's
    /// available parallelism; the calling thread becomes worker 0. Refuses
    /// re-entry when a loop is already running on the calling thread.
    fn run<A: Send + 'static>(
        self,
        factory: &FrameFactory<A>,
        args: A,
        num_threads: usize,
    ) -> Outcome {
        crate::pool::run(self, factory, args, num_threads)
    }
}

struct TimerEntry {
    at: Instant,
    seq: u64,
    job: Job,
}

// Reversed ordering turns the max-heap into an earliest-deadline queue;
// the sequence number keeps equal deadlines FIFO.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

#[derive(Default)]
struct TimerState {
    queue: BinaryHeap<TimerEntry>,
    seq: u64,
    stopped: bool,
}

/// The built-in backend: a monotonic timer queue parked on a condvar.
///
/// Suitable for headless services and tests; GUI embeddings would instead
/// implement [`EventLoop`] over their toolkit's native loop.
pub struct TimerLoop {
    state: Mutex<TimerState>,
    notify: Condvar,
}

impl TimerLoop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            notify: Condvar::new(),
        }
    }

    fn push(&self, delay: Duration, job: Job) {
        let mut state = self.state.lock();
        let seq = state.seq;
        state.seq += 1;
        state.queue.push(TimerEntry {
            at: Instant::now() + delay,
            seq,
            job,
        });
        self.notify.notify_all();
    }
}

impl Default for TimerLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for TimerLoop {
    fn post(&self, delay: Duration, job: Job) {
        self.push(delay, job);
    }

    fn invoke(&self, delay: Duration, job: Job) {
        self.push(delay, job);
    }

    // `stopped` latches: a loop stopped before its worker thread even gets
    // here must not resurrect and strand the pool's join
    fn enter(&self) {
        loop {
            let mut state = self.state.lock();
            if state.stopped {
                break;
            }
            let now = Instant::now();
            match state.queue.peek().map(|entry| entry.at) {
                Some(at) if at <= now => {
                    if let Some(entry) = state.queue.pop() {
                        drop(state);
                        (entry.job)();
                    }
                }
                Some(at) => {
                    self.notify.wait_until(&mut state, at);
                }
                None => {
                    self.notify.wait(&mut state);
                }
            }
        }
    }

    fn stop(&self) {
        self.state.lock().stopped = true;
        self.notify.notify_all();
    }

    fn clear(&self) {
        self.state.lock().queue.clear();
    }

    fn sibling(&self) -> Self {
        Self::new()
    }
}
