//! Time-based awaitables layered on [`Event`]: `sleep`, `hold`, `animate`.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::awaitable::{Awaitable, AwaitableCore, AwaitableExt, StepInput, StepResult};
use crate::error::{none, Error};
use crate::event::Event;
use crate::pool;

/// A single-shot event that fires after `seconds` of monotonic time.
///
/// Rejects negative (or non-finite) durations.
pub fn sleep(seconds: f64) -> Result<Arc<Event>, Error> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::invalid_argument(format!(
            "sleep duration must be non-negative, got {seconds}"
        )));
    }
    let event = Event::single_shot(format!("sleep({seconds})"));
    event.post(none(), Duration::from_secs_f64(seconds))?;
    Ok(event)
}

/// An awaitable that never completes on its own; a frame suspended on it is
/// only released when the frame itself is torn down.
pub struct Hold {
    core: AwaitableCore,
}

impl Hold {
    pub fn new() -> Arc<Self> {
        Arc::<Self>::new_cyclic(|this| {
            let this: Weak<dyn Awaitable> = this.clone();
            Self {
                core: AwaitableCore::new("hold()", this, None, None),
            }
        })
    }
}

impl Awaitable for Hold {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    // hold can't be raised
    fn step(&self, _input: StepInput) -> StepResult {
        StepResult::Continue
    }
}

/// See [`Hold`].
pub fn hold() -> Arc<Hold> {
    Hold::new()
}

/// A single-shot event driving `callback(progress)` with `progress` in
/// `[0, 1]` every `interval` seconds for `seconds` total. The final
/// `callback(1.0)` is guaranteed before the event fires.
pub fn animate(
    seconds: f64,
    callback: impl Fn(f64) + Send + Sync + 'static,
    interval: f64,
) -> Result<Arc<Event>, Error> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::invalid_argument(format!(
            "animation duration must be non-negative, got {seconds}"
        )));
    }
    if !interval.is_finite() || interval <= 0.0 {
        return Err(Error::invalid_argument(format!(
            "animation interval must be positive, got {interval}"
        )));
    }
    let event = Event::single_shot(format!("animate({seconds})"));
    let ticker = Ticker {
        event: Arc::downgrade(&event),
        callback: Arc::new(callback),
        start: Instant::now(),
        seconds,
        interval,
    };
    ticker.schedule()?;
    Ok(event)
}

struct Ticker {
    event: Weak<Event>,
    callback: Arc<dyn Fn(f64) + Send + Sync>,
    start: Instant,
    seconds: f64,
    interval: f64,
}

impl Ticker {
    fn schedule(self) -> Result<(), Error> {
        let remaining = (self.seconds - self.start.elapsed().as_secs_f64()).max(0.0);
        let delay = Duration::from_secs_f64(remaining.min(self.interval));
        pool::enqueue(delay, Box::new(move || self.tick()), None)
    }

    fn tick(self) {
        let Some(event) = self.event.upgrade() else {
            return;
        };
        if event.removed() {
            return;
        }
        let progress = if self.seconds <= 0.0 {
            1.0
        } else {
            (self.start.elapsed().as_secs_f64() / self.seconds).min(1.0)
        };
        (self.callback)(progress);
        if progress >= 1.0 {
            event.fire(Ok(none()), None, true);
        } else {
            drop(event);
            if let Err(error) = self.schedule() {
                warn!(%error, "animate ticker dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_sleep_is_rejected() {
        assert!(matches!(sleep(-1.0), Err(Error::InvalidArgument(_))));
        assert!(matches!(sleep(f64::NAN), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn animate_validates_arguments() {
        assert!(matches!(
            animate(-0.1, |_| {}, 0.02),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            animate(0.1, |_| {}, 0.0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn hold_never_completes_from_a_step() {
        let held = hold();
        assert!(matches!(
            held.step(StepInput::Start),
            StepResult::Continue
        ));
        assert!(!held.removed());
    }
}
