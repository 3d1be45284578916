//! The multicast event: an awaitable that produces values (or errors) for
//! every listener at once.
//!
//! A single-shot event is destroyed by its first firing. A multi-shot event
//! survives: its listener set is cleared, the result is replaced, and frames
//! can re-await it for the next firing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::trace;

use crate::awaitable::{Awaitable, AwaitableCore, StepInput, StepResult};
use crate::counter::ProcessCounter;
use crate::error::{none, AnyValue, Error, Outcome};
use crate::pool;

pub struct Event {
    core: AwaitableCore,
    this: Weak<Event>,
    single_shot: bool,
}

impl Event {
    /// A new event. Single-shot events are removed by their first firing;
    /// multi-shot events persist and can be re-posted.
    pub fn new(name: impl Into<String>, single_shot: bool) -> Arc<Self> {
        let name = name.into();
        Arc::<Self>::new_cyclic(|this| {
            let dyn_this: Weak<dyn Awaitable> = this.clone();
            Self {
                core: AwaitableCore::new(name, dyn_this, None, None),
                this: this.clone(),
                single_shot,
            }
        })
    }

    pub fn single_shot(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, true)
    }

    /// An event that already fired with `outcome`; awaiting it returns
    /// synchronously. Used for the results of synchronous removals.
    pub(crate) fn fired(name: impl Into<String>, outcome: Outcome) -> Arc<Self> {
        let event = Self::single_shot(name);
        event.core.set_result(outcome);
        event.core.mark_removed();
        event
    }

    /// Synchronous multicast: deliver `args` to every listener, blockingly on
    /// this worker where affinity allows. The returned single-shot event
    /// fires once every listener's handler has returned, so a sender can
    /// `send(..).wait()` to resume exactly after all handlers finished.
    pub fn send(&self, args: AnyValue) -> Arc<Event> {
        self.send_outcome(Ok(args))
    }

    pub(crate) fn send_outcome(&self, outcome: Outcome) -> Arc<Event> {
        let gate = Event::single_shot(format!("{}.sent", self.core.name()));
        let gate_handle = gate.clone();
        let counter = ProcessCounter::new(1, move || {
            gate_handle.fire(Ok(none()), None, true);
        });
        self.fire(outcome, Some(&counter), true);
        gate
    }

    /// Deliver `args` through the event loop after `delay`.
    pub fn post(&self, args: AnyValue, delay: Duration) -> Result<(), Error> {
        let event = self.this.clone();
        pool::enqueue(
            delay,
            Box::new(move || {
                if let Some(event) = event.upgrade() {
                    event.fire(Ok(args), None, true);
                }
            }),
            None,
        )
    }

    /// Produce a result and wake the listeners. Owes one unit of `counter`.
    pub(crate) fn fire(&self, outcome: Outcome, counter: Option<&Arc<ProcessCounter>>, blocking: bool) {
        if self.core.is_removed() {
            if let Some(counter) = counter {
                counter.done();
            }
            return;
        }
        trace!(event = %self.core.name(), "fire");
        if self.single_shot {
            self.core.set_result(outcome);
            self.finalize_remove(counter, blocking);
        } else {
            self.core.replace_result(outcome);
            self.wake_listeners(counter, blocking);
        }
    }

    pub fn is_single_shot(&self) -> bool {
        self.single_shot
    }
}

impl Awaitable for Event {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    // events are producers; they never listen, so a step is a no-op
    fn step(&self, _input: StepInput) -> StepResult {
        StepResult::Continue
    }
}
