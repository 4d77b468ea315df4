//! Per-request collaborator lookup.
//!
//! The processor never holds its per-request collaborators directly; it
//! asks a [`Factory`] for each one at the moment it is needed. Any
//! `Fn() -> T` closure is a factory.
//!
//! [`ScopedInvocation`] and [`ScopedResponding`] resolve the per-request
//! collaborators from the current request scope, which lets one processor
//! builder serve every request.

use std::sync::Arc;

use respond_types::Failure;

use crate::future::ResponseFuture;
use crate::scope::ScopeInstance;
use crate::stage::{DefaultRespondingContext, RespondingContext};

/// Produces a collaborator on demand.
pub trait Factory<T>: Send + Sync {
    /// Obtain the collaborator.
    fn get(&self) -> T;
}

impl<T, F> Factory<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn get(&self) -> T {
        self()
    }
}

/// Factory that hands out clones of one shared value.
pub struct Shared<T>(pub T);

impl<T: Clone + Send + Sync> Factory<T> for Shared<T> {
    fn get(&self) -> T {
        self.0.clone()
    }
}

/// Access to the in-flight request-to-response transformation.
pub trait InvocationContext: Send + Sync {
    /// Handle on the transformation's eventual response.
    fn inflected_response(&self) -> ResponseFuture;
}

impl InvocationContext for ResponseFuture {
    fn inflected_response(&self) -> ResponseFuture {
        self.clone()
    }
}

/// Boxed factory for the invocation context.
pub type InvocationContextFactory = Arc<dyn Factory<Arc<dyn InvocationContext>>>;

/// Boxed factory for the responding context.
pub type RespondingContextFactory = Arc<dyn Factory<Arc<dyn RespondingContext>>>;

// ── Scope-backed factories ───────────────────────────────────────────────

/// Resolves the inflected response stored in the current request scope.
///
/// Requests put their [`ResponseFuture`] into the scope instance before the
/// processor runs. Without one, the invocation resolves to a failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScopedInvocation;

impl Factory<Arc<dyn InvocationContext>> for ScopedInvocation {
    fn get(&self) -> Arc<dyn InvocationContext> {
        match ScopeInstance::current().and_then(|scope| scope.get::<ResponseFuture>()) {
            Some(inflected) => Arc::new(inflected),
            None => Arc::new(ResponseFuture::failed(Failure::msg(
                "no inflected response in the current request scope",
            ))),
        }
    }
}

/// Resolves the responding context stored in the current request scope.
///
/// Falls back to an empty context, i.e. no response stages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScopedResponding;

impl ScopedResponding {
    /// Install a fresh responding context in `scope` and return it.
    pub fn install(scope: &ScopeInstance) -> Arc<dyn RespondingContext> {
        let ctx: Arc<dyn RespondingContext> = Arc::new(DefaultRespondingContext::new());
        scope.put(Arc::clone(&ctx));
        ctx
    }
}

impl Factory<Arc<dyn RespondingContext>> for ScopedResponding {
    fn get(&self) -> Arc<dyn RespondingContext> {
        ScopeInstance::current()
            .and_then(|scope| scope.get::<Arc<dyn RespondingContext>>())
            .unwrap_or_else(|| Arc::new(DefaultRespondingContext::new()))
    }
}
