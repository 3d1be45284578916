//! Primitives: auxiliary objects whose lifetime is bound to the nearest
//! ancestor frame of a declared class.
//!
//! A primitive registers with the first frame up the current-frame chain
//! whose class descends from the declared owner class. When that frame is
//! torn down, its primitives are removed in LIFO order; an optional cleanup
//! hook runs on removal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Error;
use crate::frame::{Frame, FrameClass};
use crate::runtime;

pub struct Primitive {
    name: String,
    owner: Weak<Frame>,
    removed: AtomicBool,
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Primitive {
    /// Bind a primitive to the nearest ancestor frame of `owner_class`.
    ///
    /// Fails when no frame of that class encloses the caller.
    pub fn new(
        name: impl Into<String>,
        owner_class: &'static FrameClass,
    ) -> Result<Arc<Self>, Error> {
        Self::build(name.into(), owner_class, None)
    }

    /// Like [`new`](Primitive::new), with a hook run once on removal.
    pub fn with_cleanup(
        name: impl Into<String>,
        owner_class: &'static FrameClass,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Self>, Error> {
        Self::build(name.into(), owner_class, Some(Box::new(cleanup)))
    }

    fn build(
        name: String,
        owner_class: &'static FrameClass,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Arc<Self>, Error> {
        let mut current = runtime::current_frame();
        while let Some(frame) = current {
            if frame.class().is_subclass_of(owner_class) {
                let primitive = Arc::new(Self {
                    name,
                    owner: Arc::downgrade(&frame),
                    removed: AtomicBool::new(false),
                    cleanup: Mutex::new(cleanup),
                });
                frame.add_primitive(primitive.clone());
                trace!(primitive = %primitive.name, owner = owner_class.name(), "bound");
                return Ok(primitive);
            }
            current = frame.parent_frame();
        }
        Err(Error::invalid_operation(format!(
            "{} can't be created outside a {} frame",
            name,
            owner_class.name()
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Detach from the owner and run the cleanup hook. Idempotent.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(primitive = %self.name, "removed");
        if let Some(owner) = self.owner.upgrade() {
            owner.forget_primitive(self);
        }
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
    }
}
