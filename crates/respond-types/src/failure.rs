//! Failure values carried through the pipeline.
//!
//! A [`Failure`] is a cheap-to-clone, type-erased handle over any
//! `std::error::Error`. It remembers the concrete type it was built from so
//! exception mappers can be looked up by type, and so callers can
//! `downcast_ref` back to the original error.
//!
//! The wrapper types in this module mirror the ways a failure reaches the
//! pipeline:
//!
//! - [`ExecutionError`] -- what awaiting a failed future yields; the
//!   processor unwraps it before inspecting the cause.
//! - [`MappableError`] -- an application failure explicitly marked for
//!   exception mapping; the resolver unwraps it.
//! - [`WebApplicationError`] -- a failure that already knows its response.
//! - [`CancelledError`] -- what awaiting a cancelled future yields.

use std::any::{Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::response::Response;

/// Boxed error returned by fallible user callbacks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ── Failure ──────────────────────────────────────────────────────────────

/// A shared, type-erased pipeline failure.
#[derive(Clone)]
pub struct Failure {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Failure {
    /// Wrap a concrete error.
    ///
    /// Wrapping a `Failure` returns a clone of it rather than nesting.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        if let Some(existing) = (&error as &dyn Any).downcast_ref::<Failure>() {
            return existing.clone();
        }
        Self {
            inner: Arc::new(error),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// A failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// `TypeId` of the concrete error this failure was built from.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the concrete error, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the concrete error is of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Borrow the concrete error as `E`, if it is one.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Borrow the underlying error.
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Whether both handles point at the same underlying error.
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type", &self.type_name)
            .field("error", &self.inner)
            .finish()
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Plain message failure behind [`Failure::msg`].
#[derive(Error, Debug)]
#[error("{0}")]
struct MessageError(String);

// ── Wrappers ─────────────────────────────────────────────────────────────

/// The upstream computation finished with a failure.
#[derive(Error, Debug, Clone)]
#[error("execution failed: {cause}")]
pub struct ExecutionError {
    #[source]
    cause: Failure,
}

impl ExecutionError {
    /// Wrap the failure of an upstream computation.
    pub fn new(cause: Failure) -> Self {
        Self { cause }
    }

    /// The underlying failure.
    pub fn cause(&self) -> &Failure {
        &self.cause
    }
}

/// An application failure marked for exception mapping.
#[derive(Error, Debug, Clone)]
#[error("mappable failure: {cause}")]
pub struct MappableError {
    #[source]
    cause: Failure,
}

impl MappableError {
    /// Mark `cause` for exception mapping.
    pub fn new(cause: Failure) -> Self {
        Self { cause }
    }

    /// The underlying failure.
    pub fn cause(&self) -> &Failure {
        &self.cause
    }
}

/// A failure that natively carries the response to send.
#[derive(Error, Debug, Clone)]
#[error("web application error (status {})", .response.status)]
pub struct WebApplicationError {
    response: Response,
}

impl WebApplicationError {
    /// Fail with the given response.
    pub fn new(response: Response) -> Self {
        Self { response }
    }

    /// Fail with an empty response of the given status.
    pub fn with_status(status: u16) -> Self {
        Self::new(Response::new(status))
    }

    /// The response this failure carries.
    pub fn response(&self) -> &Response {
        &self.response
    }
}

/// The computation was cancelled before producing a result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation was cancelled")]
pub struct CancelledError;
