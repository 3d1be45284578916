//! frameflow: a hierarchical, structured-concurrency frame scheduler.
//!
//! This crate re-exports the full [`frameflow_core`] surface; most programs
//! only need the prelude:
//!
//! ```no_run
//! use frameflow::prelude::*;
//!
//! let main = frame("main", |_this, ()| async move {
//!     sleep(0.25)?.wait().await?;
//!     Ok(none())
//! });
//! TimerLoop::new().run(&main, (), 1)?;
//! # Ok::<(), frameflow::Error>(())
//! ```

pub use frameflow_core::*;

pub mod prelude {
    pub use frameflow_core::prelude::*;
}
