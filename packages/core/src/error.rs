//! Error taxonomy and the dynamically-typed values that flow through awaitables.
//!
//! Frame bodies and events traffic in [`AnyValue`] payloads so one scheduler can
//! carry arbitrary user data, the same way event payloads are erased behind
//! `dyn Any` boxes elsewhere in the ecosystem. Every result delivered to a
//! listener is an [`Outcome`]: either a value or a cloneable [`Error`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A dynamically-typed, shareable value produced by an awaitable.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// The result of an awaitable: a value on success, an error on failure.
///
/// Errors are `Clone` because a single failure fans out to every listener.
pub type Outcome = Result<AnyValue, Error>;

/// Wrap a concrete value into an [`AnyValue`].
pub fn val<T: Any + Send + Sync>(value: T) -> AnyValue {
    Arc::new(value)
}

/// The "no value" payload, used for silent termination and bare event firings.
pub fn none() -> AnyValue {
    Arc::new(())
}

/// Downcast helpers for [`AnyValue`] payloads.
pub trait AnyValueExt {
    /// Borrow the payload as `T`, if that is what it holds.
    fn get<T: Any>(&self) -> Option<&T>;

    /// Whether this is the unit payload produced by [`none`].
    fn is_none(&self) -> bool;
}

impl AnyValueExt for AnyValue {
    fn get<T: Any>(&self) -> Option<&T> {
        (**self).downcast_ref::<T>()
    }

    fn is_none(&self) -> bool {
        self.get::<()>().is_some()
    }
}

/// Errors raised by the scheduler core or by user frame bodies.
#[derive(Clone, thiserror::Error)]
pub enum Error {
    /// A precondition was violated: a loop is already running on this thread,
    /// a frame factory was called with no running loop, or a primitive was
    /// created outside its owner frame class.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A bad argument, such as a negative sleep duration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An error raised by a frame body. The payload travels verbatim to every
    /// listener of the failing frame.
    #[error("{message}")]
    User {
        /// Human-readable description of the failure.
        message: String,
        /// Arbitrary value attached by the raising body.
        payload: AnyValue,
    },
}

impl Error {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Raise a user error with just a message.
    pub fn user(message: impl Into<String>) -> Self {
        Error::User {
            message: message.into(),
            payload: none(),
        }
    }

    /// Raise a user error carrying a typed payload.
    pub fn raise<T: Any + Send + Sync>(message: impl Into<String>, payload: T) -> Self {
        Error::User {
            message: message.into(),
            payload: val(payload),
        }
    }

    /// The payload of a user error, if this is one.
    pub fn payload(&self) -> Option<&AnyValue> {
        match self {
            Error::User { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidOperation(msg) => f.debug_tuple("InvalidOperation").field(msg).finish(),
            Error::InvalidArgument(msg) => f.debug_tuple("InvalidArgument").field(msg).finish(),
            Error::User { message, .. } => f
                .debug_struct("User")
                .field("message", message)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let err = Error::raise("boom", 42usize);
        assert_eq!(err.payload().and_then(|p| p.get::<usize>()), Some(&42));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn unit_payload_is_none() {
        assert!(none().is_none());
        assert!(!val("x").is_none());
    }
}
