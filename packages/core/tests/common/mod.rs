#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use frameflow_core::prelude::*;
use frameflow_core::Outcome;

pub type Shared<T> = Arc<Mutex<T>>;

/// Timestamped log for asserting program flow, in the spirit of timed log
/// assertions: every entry records the seconds elapsed since the fixture was
/// created.
pub struct Log {
    start: Instant,
    entries: Mutex<Vec<(f64, String)>>,
}

impl Log {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, message: impl Into<String>) {
        let at = self.start.elapsed().as_secs_f64();
        self.entries.lock().unwrap().push((at, message.into()));
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn assert_messages(&self, expected: &[&str]) {
        assert_eq!(self.messages(), expected);
    }

    /// Seconds at which `message` was first logged.
    pub fn time_of(&self, message: &str) -> f64 {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(_, logged)| logged == message)
            .map(|(at, _)| *at)
            .unwrap_or_else(|| panic!("message {message:?} was never logged"))
    }

    /// Assert `message` was logged within `[at, at + slack]` seconds.
    pub fn assert_logged_around(&self, message: &str, at: f64, slack: f64) {
        let logged = self.time_of(message);
        assert!(
            logged >= at - 0.005 && logged <= at + slack,
            "expected {message:?} around {at}s, got {logged}s"
        );
    }
}

/// A frame that sleeps, logs its tag, and completes with `"some result"`.
pub fn wait_factory(log: &Arc<Log>) -> FrameFactory<(f64, &'static str)> {
    let log = log.clone();
    frame(
        "wait",
        move |_this, (seconds, tag): (f64, &'static str)| {
            let log = log.clone();
            async move {
                sleep(seconds)?.wait().await?;
                log.push(tag);
                Ok(val("some result"))
            }
        },
    )
}

/// Surface the scheduler's trace output when FRAMEFLOW_TEST_LOG is set.
pub fn init_tracing() {
    if std::env::var_os("FRAMEFLOW_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }
}

/// Run `factory` as the main frame on a fresh single-threaded loop.
pub fn run_single<A: Send + 'static>(factory: &FrameFactory<A>, args: A) -> Outcome {
    init_tracing();
    TimerLoop::new().run(factory, args, 1)
}
