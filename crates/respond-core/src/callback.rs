//! Completion callbacks.
//!
//! An [`InvocationCallback`] is notified once per request with the same
//! terminal outcome that was committed to the processor's future. Both
//! handlers are fallible; the processor logs their errors and never lets
//! them leak into the committed result.

use respond_types::{BoxError, Failure, Response};

/// Receiver of a request's terminal outcome.
pub trait InvocationCallback: Send + Sync {
    /// The request produced `response`.
    fn on_success(&self, response: &Response) -> Result<(), BoxError>;

    /// The request failed with `failure`.
    fn on_failure(&self, failure: &Failure) -> Result<(), BoxError>;
}

/// Callback that ignores both outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl InvocationCallback for NoopCallback {
    fn on_success(&self, _response: &Response) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_failure(&self, _failure: &Failure) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Callback built from a pair of closures.
pub struct FnCallback<S, F> {
    success: S,
    failure: F,
}

impl<S, F> FnCallback<S, F>
where
    S: Fn(&Response) -> Result<(), BoxError> + Send + Sync,
    F: Fn(&Failure) -> Result<(), BoxError> + Send + Sync,
{
    /// Create a callback from success and failure handlers.
    pub fn new(success: S, failure: F) -> Self {
        Self { success, failure }
    }
}

impl<S, F> InvocationCallback for FnCallback<S, F>
where
    S: Fn(&Response) -> Result<(), BoxError> + Send + Sync,
    F: Fn(&Failure) -> Result<(), BoxError> + Send + Sync,
{
    fn on_success(&self, response: &Response) -> Result<(), BoxError> {
        (self.success)(response)
    }

    fn on_failure(&self, failure: &Failure) -> Result<(), BoxError> {
        (self.failure)(failure)
    }
}
