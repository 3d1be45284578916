//! The worker pool: one event loop per worker, one shared queue for unpinned
//! work, and the `run` orchestration that hosts a main frame.
//!
//! Worker 0 is the thread that called `run`; the remaining workers each own a
//! sibling instance of the same loop backend. Pinned work is posted straight
//! to its worker's loop. Unpinned immediate work goes through the shared
//! injector queue and wakes one idle worker; unpinned delayed work parks on
//! the last worker's timer and re-enters the queue when due.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::awaitable::{Awaitable, AwaitableCore, AwaitableRef, StepInput, StepResult};
use crate::error::{none, Error, Outcome};
use crate::event_loop::{EventLoop, Job};
use crate::frame::{Frame, FrameFactory};
use crate::runtime::{self, WorkerContext};

/// The object-safe slice of [`EventLoop`] the pool stores per worker.
pub(crate) trait LoopHandle: Send + Sync {
    fn post(&self, delay: Duration, job: Job);
    fn invoke(&self, delay: Duration, job: Job);
    fn stop(&self);
    fn clear(&self);
}

impl<L: EventLoop> LoopHandle for L {
    fn post(&self, delay: Duration, job: Job) {
        EventLoop::post(self, delay, job);
    }

    fn invoke(&self, delay: Duration, job: Job) {
        EventLoop::invoke(self, delay, job);
    }

    fn stop(&self) {
        EventLoop::stop(self);
    }

    fn clear(&self) {
        EventLoop::clear(self);
    }
}

pub(crate) struct Worker {
    pub(crate) event_loop: Arc<dyn LoopHandle>,
    idle: AtomicBool,
}

pub(crate) struct Pool {
    workers: Vec<Worker>,
    queue: Injector<Job>,
    result: Mutex<Option<Outcome>>,
    // keeps the main frame and its watcher alive for the duration of a run
    main: Mutex<Option<(Arc<Frame>, AwaitableRef)>>,
}

impl Pool {
    /// Dispatch a callback per the affinity rules.
    pub(crate) fn enqueue(pool: &Arc<Pool>, delay: Duration, job: Job, affinity: Option<usize>) {
        if pool.workers.len() == 1 {
            pool.dispatch_to(0, delay, job);
            return;
        }
        if let Some(index) = affinity {
            pool.dispatch_to(index, delay, job);
            return;
        }
        if delay > Duration::ZERO {
            // park the delay on the last worker, then requeue as immediate work
            let requeue = Arc::clone(pool);
            let last = pool.workers.len() - 1;
            pool.workers[last].event_loop.invoke(
                delay,
                Box::new(move || Pool::enqueue(&requeue, Duration::ZERO, job, None)),
            );
            return;
        }
        pool.queue.push(job);
        Pool::wake_idle_worker(pool);
    }

    fn dispatch_to(&self, index: usize, delay: Duration, job: Job) {
        let worker = &self.workers[index];
        if runtime::current_worker() == Some(index) {
            worker.event_loop.post(delay, job);
        } else {
            worker.event_loop.invoke(delay, job);
        }
    }

    fn wake_idle_worker(pool: &Arc<Pool>) {
        for (index, worker) in pool.workers.iter().enumerate() {
            if worker.idle.swap(false, Ordering::AcqRel) {
                let woken = Arc::clone(pool);
                worker
                    .event_loop
                    .invoke(Duration::ZERO, Box::new(move || Pool::dequeue(&woken, index)));
                return;
            }
        }
    }

    /// Run one shared-queue job, then repost or go idle.
    fn dequeue(pool: &Arc<Pool>, index: usize) {
        let job = loop {
            match pool.queue.steal() {
                Steal::Success(job) => break Some(job),
                Steal::Retry => continue,
                Steal::Empty => break None,
            }
        };
        if let Some(job) = job {
            job();
        }
        let worker = &pool.workers[index];
        worker.idle.store(true, Ordering::Release);
        // reclaim ourselves if work arrived while we were mid-job
        if !pool.queue.is_empty() && worker.idle.swap(false, Ordering::AcqRel) {
            let repost = Arc::clone(pool);
            worker
                .event_loop
                .post(Duration::ZERO, Box::new(move || Pool::dequeue(&repost, index)));
        }
    }

    /// Record the run's outcome (first writer wins) and stop every worker.
    pub(crate) fn finish(&self, outcome: Outcome) {
        {
            let mut slot = self.result.lock();
            if slot.is_none() {
                *slot = Some(outcome);
            }
        }
        self.stop_all();
    }

    pub(crate) fn store_error(&self, error: Error) {
        debug!(%error, "stopping the pool on an unhandled error");
        self.finish(Err(error));
    }

    fn stop_all(&self) {
        for worker in &self.workers {
            worker.event_loop.stop();
        }
    }
}

/// Dispatch through the pool of the current thread.
pub(crate) fn enqueue(delay: Duration, job: Job, affinity: Option<usize>) -> Result<(), Error> {
    match runtime::current_pool() {
        Some(pool) => {
            Pool::enqueue(&pool, delay, job, affinity);
            Ok(())
        }
        None => Err(Error::invalid_operation(
            "no event loop is running on this thread",
        )),
    }
}

/// Listener attached to the main frame: captures its outcome and shuts the
/// pool down.
struct MainWatch {
    core: AwaitableCore,
    pool: Weak<Pool>,
}

impl MainWatch {
    fn create(pool: &Arc<Pool>, name: &str) -> AwaitableRef {
        let pool = Arc::downgrade(pool);
        let watch: Arc<MainWatch> = Arc::<MainWatch>::new_cyclic(|this| {
            let this: Weak<dyn Awaitable> = this.clone();
            MainWatch {
                core: AwaitableCore::new(format!("{name}.watch"), this, None, None),
                pool,
            }
        });
        watch
    }
}

impl Awaitable for MainWatch {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    fn step(&self, input: StepInput) -> StepResult {
        match input {
            StepInput::Wake { outcome, .. } => {
                if let Some(pool) = self.pool.upgrade() {
                    pool.finish(outcome.clone());
                }
                StepResult::Complete(outcome)
            }
            StepInput::Start => StepResult::Continue,
        }
    }
}

pub(crate) fn run<L: EventLoop, A: Send + 'static>(
    event_loop: L,
    factory: &FrameFactory<A>,
    args: A,
    num_threads: usize,
) -> Outcome {
    if runtime::worker_context().is_some() {
        return Err(Error::invalid_operation(
            "an event loop is already running on this thread",
        ));
    }
    let threads = if num_threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        num_threads
    };

    let first = Arc::new(event_loop);
    let mut instances: Vec<Arc<L>> = Vec::with_capacity(threads);
    instances.push(first.clone());
    for _ in 1..threads {
        instances.push(Arc::new(first.sibling()));
    }

    let workers = instances
        .iter()
        .map(|instance| Worker {
            event_loop: instance.clone() as Arc<dyn LoopHandle>,
            idle: AtomicBool::new(true),
        })
        .collect();
    let pool = Arc::new(Pool {
        workers,
        queue: Injector::new(),
        result: Mutex::new(None),
        main: Mutex::new(None),
    });
    debug!(threads, "starting worker pool");

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(threads - 1);
    for (index, instance) in instances.iter().enumerate().skip(1) {
        let instance = instance.clone();
        let pool = pool.clone();
        handles.push(first.spawn_thread(Box::new(move || {
            runtime::install_worker(WorkerContext { pool, index });
            instance.enter();
            runtime::uninstall_worker();
        })));
    }

    runtime::install_worker(WorkerContext {
        pool: pool.clone(),
        index: 0,
    });

    // the main frame must be constructed inside the running loop
    {
        let spawn_pool = pool.clone();
        let factory = factory.clone();
        pool.workers[0].event_loop.post(
            Duration::ZERO,
            Box::new(move || match factory.spawn(args) {
                Ok(main) => {
                    if main.core().is_removed() {
                        spawn_pool.finish(main.core().result());
                        return;
                    }
                    let watch = MainWatch::create(&spawn_pool, main.core().name());
                    if main.core().add_listener(&watch) {
                        *spawn_pool.main.lock() = Some((main, watch));
                    } else {
                        spawn_pool.finish(main.core().result());
                    }
                }
                Err(error) => spawn_pool.store_error(error),
            }),
        );
    }

    first.enter();

    // shutdown: stop and join the daemon workers, then drop pending work
    pool.stop_all();
    for handle in handles {
        first.join_thread(handle);
    }
    for worker in &pool.workers {
        worker.event_loop.clear();
    }
    loop {
        match pool.queue.steal() {
            Steal::Success(_) | Steal::Retry => continue,
            Steal::Empty => break,
        }
    }
    pool.main.lock().take();
    runtime::uninstall_worker();

    let outcome = pool.result.lock().take();
    if outcome.is_none() {
        warn!("event loop stopped before the main frame finished");
    }
    outcome.unwrap_or_else(|| Ok(none()))
}
