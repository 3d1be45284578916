//! `all` and `any`: aggregation and selection over a set of awaitables.
//!
//! Combinators are awaitables themselves: they register as listeners on their
//! operands and as children of the frame that constructed them. They own
//! nothing - the listener edges are reverse pointers, and the operands keep
//! their creating frame as parent, so the frame's LIFO teardown covers both
//! the combinator and its operands.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::awaitable::{Awaitable, AwaitableCore, AwaitableRef, StepInput, StepResult};
use crate::error::{none, val, AnyValue, Outcome};
use crate::runtime;

fn ptr_key(awaitable: &AwaitableRef) -> usize {
    Arc::as_ptr(awaitable) as *const () as usize
}

fn joined_names(inputs: &[AwaitableRef]) -> String {
    inputs
        .iter()
        .map(|input| input.core().name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The result of an [`Any`]: the winning operand and its value.
pub struct Selected {
    pub source: AwaitableRef,
    pub value: AnyValue,
}

/// Conjunction: completes once every operand has, with the results in input
/// order (`Vec<AnyValue>`). A failing operand short-circuits the whole
/// combinator with its error.
pub struct All {
    core: AwaitableCore,
    state: Mutex<AllState>,
}

struct AllState {
    // operand identity -> every input position it occupies
    pending: FxHashMap<usize, SmallVec<[usize; 2]>>,
    children: Vec<AwaitableRef>,
    results: Vec<Option<AnyValue>>,
}

impl All {
    pub fn new(inputs: Vec<AwaitableRef>) -> Arc<Self> {
        let name = format!("all({})", joined_names(&inputs));
        let parent = runtime::current_frame();

        let mut results: Vec<Option<AnyValue>> = vec![None; inputs.len()];
        let mut pending: FxHashMap<usize, SmallVec<[usize; 2]>> = FxHashMap::default();
        let mut failed: Option<Outcome> = None;
        for (index, input) in inputs.iter().enumerate() {
            if input.core().is_removed() {
                match input.core().result() {
                    Ok(value) => results[index] = Some(value),
                    Err(error) => failed = failed.or(Some(Err(error))),
                }
            } else {
                pending.entry(ptr_key(input)).or_default().push(index);
            }
        }
        let settled = pending.is_empty();

        let combinator = Arc::<Self>::new_cyclic(|this| {
            let this: Weak<dyn Awaitable> = this.clone();
            Self {
                core: AwaitableCore::new(
                    name,
                    this,
                    parent.as_ref().map(Arc::downgrade),
                    None,
                ),
                state: Mutex::new(AllState {
                    pending,
                    children: inputs,
                    results,
                }),
            }
        });

        if let Some(error) = failed {
            combinator.core.set_result(error);
            combinator.core.mark_removed();
            return combinator;
        }
        if settled {
            let collected = combinator.collect_results();
            combinator.core.set_result(Ok(collected));
            combinator.core.mark_removed();
            return combinator;
        }

        if let Some(parent) = &parent {
            parent.add_child(combinator.clone() as AwaitableRef);
        }
        Self::register_on_children(&combinator);
        combinator
    }

    fn collect_results(&self) -> AnyValue {
        let state = self.state.lock();
        val(state
            .results
            .iter()
            .map(|slot| slot.clone().unwrap_or_else(none))
            .collect::<Vec<AnyValue>>())
    }

    fn register_on_children(this: &Arc<Self>) {
        let listener = this.clone() as AwaitableRef;
        let pending: Vec<AwaitableRef> = {
            let state = this.state.lock();
            state
                .children
                .iter()
                .filter(|child| state.pending.contains_key(&ptr_key(child)))
                .cloned()
                .collect()
        };
        for child in pending {
            if !child.core().add_listener(&listener) {
                // completed between inspection and registration
                this.process(
                    StepInput::Wake {
                        sender: child.clone(),
                        outcome: child.core().result(),
                    },
                    None,
                    true,
                );
            }
        }
    }
}

impl Awaitable for All {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    fn step(&self, input: StepInput) -> StepResult {
        let StepInput::Wake { sender, outcome } = input else {
            return StepResult::Continue;
        };
        match outcome {
            Err(error) => StepResult::Complete(Err(error)),
            Ok(value) => {
                let mut state = self.state.lock();
                if let Some(indices) = state.pending.remove(&ptr_key(&sender)) {
                    for index in indices {
                        state.results[index] = Some(value.clone());
                    }
                }
                if state.pending.is_empty() {
                    drop(state);
                    StepResult::Complete(Ok(self.collect_results()))
                } else {
                    StepResult::Continue
                }
            }
        }
    }

    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state
            .children
            .iter()
            .all(|child| child.core().is_removed() || child.is_ready())
    }

    fn notify_ready(&self) {
        if self.is_ready() {
            for listener in self.core.listeners_snapshot() {
                listener.notify_ready();
            }
        }
    }

    fn on_remove(&self) {
        let Some(this) = self.core.this() else { return };
        let mut state = self.state.lock();
        for child in state.children.drain(..) {
            child.core().remove_listener(&this);
        }
    }
}

/// Disjunction: completes with [`Selected`] on the first operand to produce a
/// value; errors short-circuit.
pub struct Any {
    core: AwaitableCore,
    state: Mutex<AnyState>,
}

struct AnyState {
    children: Vec<AwaitableRef>,
}

impl Any {
    pub fn new(inputs: Vec<AwaitableRef>) -> Arc<Self> {
        let name = format!("any({})", joined_names(&inputs));
        let parent = runtime::current_frame();

        let settled = inputs
            .iter()
            .find(|input| input.core().is_removed())
            .cloned();

        let combinator = Arc::<Self>::new_cyclic(|this| {
            let this: Weak<dyn Awaitable> = this.clone();
            Self {
                core: AwaitableCore::new(
                    name,
                    this,
                    parent.as_ref().map(Arc::downgrade),
                    None,
                ),
                state: Mutex::new(AnyState { children: inputs }),
            }
        });

        if let Some(winner) = settled {
            let outcome = match winner.core().result() {
                Ok(value) => Ok(val(Selected {
                    source: winner,
                    value,
                })),
                Err(error) => Err(error),
            };
            combinator.core.set_result(outcome);
            combinator.core.mark_removed();
            return combinator;
        }

        if let Some(parent) = &parent {
            parent.add_child(combinator.clone() as AwaitableRef);
        }
        Self::register_on_children(&combinator);
        combinator
    }

    fn register_on_children(this: &Arc<Self>) {
        let listener = this.clone() as AwaitableRef;
        let children: Vec<AwaitableRef> = this.state.lock().children.clone();
        let mut seen = Vec::new();
        for child in children {
            let key = ptr_key(&child);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if !child.core().add_listener(&listener) {
                this.process(
                    StepInput::Wake {
                        sender: child.clone(),
                        outcome: child.core().result(),
                    },
                    None,
                    true,
                );
                return;
            }
        }
    }
}

impl Awaitable for Any {
    fn core(&self) -> &AwaitableCore {
        &self.core
    }

    fn step(&self, input: StepInput) -> StepResult {
        let StepInput::Wake { sender, outcome } = input else {
            return StepResult::Continue;
        };
        match outcome {
            Err(error) => StepResult::Complete(Err(error)),
            Ok(value) => StepResult::Complete(Ok(val(Selected {
                source: sender,
                value,
            }))),
        }
    }

    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state
            .children
            .iter()
            .any(|child| child.core().is_removed() || child.is_ready())
    }

    fn notify_ready(&self) {
        if self.is_ready() {
            for listener in self.core.listeners_snapshot() {
                listener.notify_ready();
            }
        }
    }

    fn on_remove(&self) {
        let Some(this) = self.core.this() else { return };
        let mut state = self.state.lock();
        for child in state.children.drain(..) {
            child.core().remove_listener(&this);
        }
    }
}

/// Aggregate every input; see [`All`].
pub fn all(inputs: impl IntoIterator<Item = AwaitableRef>) -> Arc<All> {
    All::new(inputs.into_iter().collect())
}

/// Select the first input to finish; see [`Any`].
pub fn any(inputs: impl IntoIterator<Item = AwaitableRef>) -> Arc<Any> {
    Any::new(inputs.into_iter().collect())
}
