//! Core functionality for frameflow: a hierarchical, structured-concurrency
//! scheduler built from composable *frames* and awaitable *events*.
//!
//! A [`Frame`] is a suspendable task and a node in a strict parent/child
//! tree: it owns its child frames, its combinators, and its primitives, and
//! tearing it down cascades through all of them. Frames suspend on
//! [`Awaitable`]s - multicast [`Event`]s, timers, other frames, or the
//! [`All`]/[`Any`] combinators - and are resumed by the worker pool behind a
//! pluggable [`EventLoop`].
//!
//! ```no_run
//! use frameflow_core::prelude::*;
//!
//! let hello = frame("hello", |_this, ()| async move {
//!     sleep(0.1)?.wait().await?;
//!     Ok(val("done"))
//! });
//! let result = TimerLoop::new().run(&hello, (), 1)?;
//! # Ok::<(), frameflow_core::Error>(())
//! ```

pub(crate) mod awaitable;
pub(crate) mod combinator;
pub(crate) mod counter;
pub(crate) mod error;
pub(crate) mod event;
pub(crate) mod event_loop;
pub(crate) mod frame;
pub(crate) mod pool;
pub(crate) mod primitive;
pub(crate) mod runtime;
pub(crate) mod timed;

pub(crate) mod innerlude {
    pub use crate::awaitable::{
        Awaitable, AwaitableCore, AwaitableExt, AwaitableRef, ExceptionHandler, StepInput,
        StepResult, WaitFuture,
    };
    pub use crate::combinator::{all, any, All, Any, Selected};
    pub use crate::counter::ProcessCounter;
    pub use crate::error::{none, val, AnyValue, AnyValueExt, Error, Outcome};
    pub use crate::event::Event;
    pub use crate::event_loop::{EventLoop, Job, TimerLoop};
    pub use crate::frame::{
        frame, pframe, Frame, FrameClass, FrameFactory, FreeArgs, Startup, FRAME, PFRAME,
    };
    pub use crate::primitive::Primitive;
    pub use crate::runtime::current_frame;
    pub use crate::timed::{animate, hold, sleep, Hold};
}

pub use crate::innerlude::{
    all, animate, any, current_frame, frame, hold, none, pframe, sleep, val, All, Any, AnyValue,
    AnyValueExt, Awaitable, AwaitableCore, AwaitableExt, AwaitableRef, Error, Event, EventLoop,
    ExceptionHandler, Frame, FrameClass, FrameFactory, FreeArgs, Hold, Job, Outcome,
    Primitive, ProcessCounter, Selected, Startup, StepInput, StepResult, TimerLoop, WaitFuture,
    FRAME, PFRAME,
};

pub mod prelude {
    pub use crate::innerlude::{
        all, animate, any, current_frame, frame, hold, none, pframe, sleep, val, AnyValue,
        AnyValueExt, Awaitable, AwaitableExt, AwaitableRef, Error, Event, EventLoop, Frame,
        FrameClass, FrameFactory, FreeArgs, Outcome, Selected, TimerLoop, FRAME,
    };
}
