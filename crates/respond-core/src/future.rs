//! Single-assignment response future.
//!
//! [`ResponseFuture`] is a write-once cell that is either pending,
//! completed with an [`Outcome`], or cancelled. Any number of clones can
//! wait on it; exactly one completion (or cancellation) wins and every
//! later attempt is reported back to the caller as an error.
//!
//! Backed by a `tokio::sync::watch` channel: completion is a conditional
//! in-place modification of the current value, so the check-and-set is
//! atomic and waiters are woken without holding any lock across `.await`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use respond_types::{
    CancelledError, ExecutionError, Failure, RespondError, Response, Result,
};

/// The terminal result of a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The request produced a response.
    Response(Response),
    /// The request failed.
    Failure(Failure),
}

impl Outcome {
    /// The response, if this outcome is one.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Response(resp) => Some(resp),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure, if this outcome is one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Response(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }
}

impl From<Response> for Outcome {
    fn from(resp: Response) -> Self {
        Outcome::Response(resp)
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Pending,
    Completed(Outcome),
    Cancelled,
}

impl Slot {
    fn is_terminal(&self) -> bool {
        !matches!(self, Slot::Pending)
    }

    fn state(&self) -> &'static str {
        match self {
            Slot::Pending => "pending",
            Slot::Completed(Outcome::Response(_)) => "completed with a response",
            Slot::Completed(Outcome::Failure(_)) => "completed with a failure",
            Slot::Cancelled => "cancelled",
        }
    }

    /// What a waiter observes. `None` while pending.
    fn resolve(&self) -> Option<std::result::Result<Response, Failure>> {
        match self {
            Slot::Pending => None,
            Slot::Completed(Outcome::Response(resp)) => Some(Ok(resp.clone())),
            Slot::Completed(Outcome::Failure(cause)) => {
                Some(Err(Failure::new(ExecutionError::new(cause.clone()))))
            }
            Slot::Cancelled => Some(Err(Failure::new(CancelledError))),
        }
    }
}

/// A cloneable, single-assignment future of a [`Response`].
#[derive(Clone)]
pub struct ResponseFuture {
    tx: Arc<watch::Sender<Slot>>,
}

impl ResponseFuture {
    /// Create a pending future.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// A future already completed with `response`.
    pub fn completed(response: Response) -> Self {
        let fut = Self::new();
        fut.tx.send_replace(Slot::Completed(Outcome::Response(response)));
        fut
    }

    /// A future already failed with `failure`.
    pub fn failed(failure: Failure) -> Self {
        let fut = Self::new();
        fut.tx.send_replace(Slot::Completed(Outcome::Failure(failure)));
        fut
    }

    fn transition(&self, next: Slot) -> Result<()> {
        let mut previous = "pending";
        let applied = self.tx.send_if_modified(|slot| {
            if slot.is_terminal() {
                previous = slot.state();
                false
            } else {
                *slot = next;
                true
            }
        });
        if applied {
            Ok(())
        } else {
            Err(RespondError::AlreadyCompleted { state: previous })
        }
    }

    /// Complete with `outcome`. Fails if the future is already done.
    pub fn complete(&self, outcome: Outcome) -> Result<()> {
        self.transition(Slot::Completed(outcome))
    }

    /// Complete with a response. Fails if the future is already done.
    pub fn set(&self, response: Response) -> Result<()> {
        self.complete(Outcome::Response(response))
    }

    /// Complete with a failure. Fails if the future is already done.
    pub fn set_failure(&self, failure: Failure) -> Result<()> {
        self.complete(Outcome::Failure(failure))
    }

    /// Cancel the future. Returns `false` if it was already done.
    pub fn cancel(&self) -> bool {
        self.transition(Slot::Cancelled).is_ok()
    }

    /// Whether the future is completed or cancelled.
    pub fn is_done(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// Whether the future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.tx.borrow(), Slot::Cancelled)
    }

    /// The committed outcome, if any. `None` while pending or when cancelled.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.tx.borrow() {
            Slot::Completed(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Non-blocking [`get`](Self::get): `None` while pending.
    pub fn try_get(&self) -> Option<std::result::Result<Response, Failure>> {
        self.tx.borrow().resolve()
    }

    /// Wait for the future to finish.
    ///
    /// A failed future yields an [`ExecutionError`] wrapping the committed
    /// cause; a cancelled one yields a [`CancelledError`].
    pub async fn get(&self) -> std::result::Result<Response, Failure> {
        let mut rx = self.tx.subscribe();
        let slot = rx
            .wait_for(Slot::is_terminal)
            .await
            .map_err(|_| Failure::new(CancelledError))?;
        match slot.resolve() {
            Some(result) => result,
            None => Err(Failure::new(CancelledError)),
        }
    }

    /// [`get`](Self::get) bounded by `timeout`; `None` if it elapsed first.
    pub async fn get_timeout(
        &self,
        timeout: Duration,
    ) -> Option<std::result::Result<Response, Failure>> {
        tokio::time::timeout(timeout, self.get()).await.ok()
    }
}

impl Default for ResponseFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("state", &self.tx.borrow().state())
            .finish()
    }
}
