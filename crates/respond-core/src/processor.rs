//! The response processor: one request's outcome, committed exactly once.
//!
//! A [`ResponseProcessor`] waits for the in-flight request-to-response
//! transformation, runs its result through the response stage chain,
//! maps failures to responses and commits exactly one terminal
//! [`Outcome`] to its [`ResponseFuture`] and to the completion callback.
//!
//! # Flow
//!
//! 1. Resolve the inflected response. If it is already cancelled, cancel
//!    this processor's future and stop: no mapping, no callback.
//! 2. A failed transformation is unwrapped and mapped. A failing mapper
//!    commits the mapping failure; an unmapped failure commits the cause.
//! 3. The response runs through the stage chain. A stage failure is mapped
//!    and the chain runs again with the mapped response, from the failed
//!    stage's [`ResumePoint`], at most [`MAX_REMAP_ATTEMPTS`] times. A
//!    failure after that is committed as-is.
//! 4. The scope instance is released once, whichever way step 1-3 ended.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, error, warn};

use respond_types::config::PipelineConfig;
use respond_types::{BoxError, ExecutionError, Failure, RespondError, Response, Result};

use crate::callback::InvocationCallback;
use crate::context::{
    Factory, InvocationContextFactory, RespondingContextFactory, ScopedInvocation,
    ScopedResponding, Shared,
};
use crate::future::{Outcome, ResponseFuture};
use crate::mapping::{ExceptionMappers, map_exception};
use crate::scope::{ReleaseGuard, RequestScope, ScopeInstance};
use crate::stage::{ResumePoint, run_chain};
use crate::staging::{self, StagingContext};

/// How many times a stage-chain failure may be mapped and the chain rerun.
pub const MAX_REMAP_ATTEMPTS: usize = 1;

/// Boxed factory for the staging context.
pub type StagingContextFactory = Arc<dyn Factory<Arc<dyn StagingContext>>>;

/// Boxed factory for the exception mappers. `None` disables mapping.
pub type ExceptionMappersFactory = Arc<dyn Factory<Option<Arc<ExceptionMappers>>>>;

// ── Builder ──────────────────────────────────────────────────────────────

/// Holds the shared collaborators and builds one processor per request.
#[derive(Clone)]
pub struct ResponseProcessorBuilder {
    request_scope: RequestScope,
    invocation_ctx: InvocationContextFactory,
    responding_ctx: RespondingContextFactory,
    staging_ctx: StagingContextFactory,
    exception_mappers: ExceptionMappersFactory,
    config: PipelineConfig,
}

impl ResponseProcessorBuilder {
    /// A builder resolving the invocation and responding contexts from the
    /// current request scope, tracing stages, and mapping nothing.
    pub fn new(request_scope: RequestScope) -> Self {
        let config = PipelineConfig::default();
        Self {
            request_scope,
            invocation_ctx: Arc::new(ScopedInvocation),
            responding_ctx: Arc::new(ScopedResponding),
            staging_ctx: Arc::new(Shared(staging::from_config(&config))),
            exception_mappers: Arc::new(Shared(None::<Arc<ExceptionMappers>>)),
            config,
        }
    }

    /// Apply pipeline settings. Replaces the staging context factory.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.staging_ctx = Arc::new(Shared(staging::from_config(&config)));
        self.config = config;
        self
    }

    /// Override how the invocation context is obtained.
    pub fn with_invocation_context(mut self, factory: InvocationContextFactory) -> Self {
        self.invocation_ctx = factory;
        self
    }

    /// Override how the responding context is obtained.
    pub fn with_responding_context(mut self, factory: RespondingContextFactory) -> Self {
        self.responding_ctx = factory;
        self
    }

    /// Override how the staging context is obtained.
    pub fn with_staging_context(mut self, factory: StagingContextFactory) -> Self {
        self.staging_ctx = factory;
        self
    }

    /// Share one exception mapper registry across all requests.
    pub fn with_exception_mappers(self, mappers: Arc<ExceptionMappers>) -> Self {
        self.with_exception_mappers_factory(Arc::new(Shared(Some(mappers))))
    }

    /// Override how the exception mappers are obtained.
    pub fn with_exception_mappers_factory(mut self, factory: ExceptionMappersFactory) -> Self {
        self.exception_mappers = factory;
        self
    }

    /// Build a processor for one request, reporting to `callback`.
    pub fn build(&self, callback: Arc<dyn InvocationCallback>) -> ResponseProcessor {
        ResponseProcessor {
            request_scope: self.request_scope.clone(),
            scope_instance: OnceLock::new(),
            callback,
            invocation_ctx: Arc::clone(&self.invocation_ctx),
            responding_ctx: Arc::clone(&self.responding_ctx),
            staging_ctx: Arc::clone(&self.staging_ctx),
            exception_mappers: Arc::clone(&self.exception_mappers),
            future: ResponseFuture::new(),
            triggered: AtomicBool::new(false),
            catch_callback_panics: self.config.catch_callback_panics,
        }
    }
}

// ── Processor ────────────────────────────────────────────────────────────

/// Drives one request's result to a single terminal outcome.
pub struct ResponseProcessor {
    request_scope: RequestScope,
    scope_instance: OnceLock<Arc<ScopeInstance>>,
    callback: Arc<dyn InvocationCallback>,
    invocation_ctx: InvocationContextFactory,
    responding_ctx: RespondingContextFactory,
    staging_ctx: StagingContextFactory,
    exception_mappers: ExceptionMappersFactory,
    future: ResponseFuture,
    triggered: AtomicBool,
    catch_callback_panics: bool,
}

impl ResponseProcessor {
    /// Attach the request's scope instance. The processor takes over one
    /// reference and releases it after [`trigger`](Self::trigger).
    pub fn set_scope_instance(&self, instance: Arc<ScopeInstance>) -> Result<()> {
        self.scope_instance
            .set(instance)
            .map_err(|_| RespondError::ScopeAlreadyAttached)
    }

    /// The attached scope instance, if any.
    pub fn scope_instance(&self) -> Option<&Arc<ScopeInstance>> {
        self.scope_instance.get()
    }

    /// Handle on this processor's outcome.
    pub fn future(&self) -> ResponseFuture {
        self.future.clone()
    }

    /// Run the pipeline and commit its outcome.
    ///
    /// Pipeline failures never surface here; they are committed to the
    /// future and the callback. `Err` is returned only for misuse: no scope
    /// instance attached, or a second trigger.
    pub async fn trigger(&self) -> Result<()> {
        let instance = self
            .scope_instance
            .get()
            .cloned()
            .ok_or(RespondError::ScopeNotAttached)?;
        if self.triggered.swap(true, Ordering::AcqRel) {
            return Err(RespondError::AlreadyTriggered);
        }

        let _release = ReleaseGuard::new(Arc::clone(&instance));
        let span = debug_span!("response_processor", scope = %instance.id());
        self.request_scope
            .run_in_scope(&instance, |_scope| self.process())
            .instrument(span)
            .await;
        Ok(())
    }

    /// Schedule [`trigger`](Self::trigger) on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.trigger().await })
    }

    async fn process(&self) {
        let inflected = self.invocation_ctx.get().inflected_response();
        if inflected.is_cancelled() {
            debug!("request processing cancelled; cancelling response future");
            self.future.cancel();
            return;
        }

        let response = match inflected.get().await {
            Ok(response) => response,
            Err(failure) => {
                let cause = unwrap_execution(failure);
                debug!(error = %cause, "request-to-response transformation finished with a failure");
                match self.map_exception(&cause) {
                    Ok(Some(mapped)) => mapped,
                    Ok(None) => return self.commit(Outcome::Failure(cause)),
                    Err(mapping_failure) => return self.commit(Outcome::Failure(mapping_failure)),
                }
            }
        };

        let outcome = self.run_responders(response);
        self.commit(outcome);
    }

    /// Run the stage chain, mapping and rerunning after at most
    /// [`MAX_REMAP_ATTEMPTS`] stage failures.
    fn run_responders(&self, response: Response) -> Outcome {
        let Some(head) = self.responding_ctx.get().create_stage_chain() else {
            return Outcome::Response(response);
        };
        let staging = self.staging_ctx.get();

        let mut input = response;
        let mut start = Some(head);
        let mut remaps = 0;
        loop {
            let failed = match run_chain(input, start, staging.as_ref()) {
                Ok(response) => return Outcome::Response(response),
                Err(failed) => failed,
            };
            debug!(
                stage = %failed.stage,
                error = %failed.failure,
                attempt = remaps + 1,
                "responder chain execution finished with a failure"
            );
            if remaps == MAX_REMAP_ATTEMPTS {
                return Outcome::Failure(failed.failure);
            }
            remaps += 1;

            match self.map_exception(&failed.failure) {
                Ok(Some(mapped)) => {
                    input = mapped;
                    start = match failed.resume {
                        ResumePoint::Restart => self.responding_ctx.get().create_stage_chain(),
                        ResumePoint::At(stage) => Some(stage),
                        ResumePoint::End => None,
                    };
                }
                Ok(None) => return Outcome::Failure(failed.failure),
                Err(mapping_failure) => return Outcome::Failure(mapping_failure),
            }
        }
    }

    fn map_exception(&self, failure: &Failure) -> std::result::Result<Option<Response>, Failure> {
        let mappers = self.exception_mappers.get();
        map_exception(failure, mappers.as_deref())
    }

    fn commit(&self, outcome: Outcome) {
        if let Err(err) = self.future.complete(outcome.clone()) {
            if self.future.is_cancelled() {
                debug!("response future cancelled before commit; outcome dropped");
            } else {
                error!(error = %err, "response future completed outside of the processor");
            }
            return;
        }
        self.notify_callback(&outcome);
    }

    fn notify_callback(&self, outcome: &Outcome) {
        let (method, result) = match outcome {
            Outcome::Response(response) => (
                "on_success",
                self.invoke_callback(|| self.callback.on_success(response)),
            ),
            Outcome::Failure(failure) => (
                "on_failure",
                self.invoke_callback(|| self.callback.on_failure(failure)),
            ),
        };
        if let Err(err) = result {
            warn!(method, error = %err, "callback method invocation failed");
        }
    }

    fn invoke_callback<F>(&self, call: F) -> std::result::Result<(), BoxError>
    where
        F: FnOnce() -> std::result::Result<(), BoxError>,
    {
        if !self.catch_callback_panics {
            return call();
        }
        match std::panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(result) => result,
            Err(payload) => Err(format!("callback panicked: {}", panic_message(&*payload)).into()),
        }
    }
}

impl std::fmt::Debug for ResponseProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseProcessor")
            .field("scope_instance", &self.scope_instance.get())
            .field("future", &self.future)
            .field("triggered", &self.triggered.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

fn unwrap_execution(failure: Failure) -> Failure {
    if let Some(execution) = failure.downcast_ref::<ExecutionError>() {
        return execution.cause().clone();
    }
    failure
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NoopCallback;

    fn processor() -> ResponseProcessor {
        let inflected = ResponseFuture::completed(Response::ok());
        ResponseProcessorBuilder::new(RequestScope::new())
            .with_invocation_context(Arc::new(move || {
                Arc::new(inflected.clone()) as Arc<dyn crate::context::InvocationContext>
            }))
            .build(Arc::new(NoopCallback))
    }

    #[tokio::test]
    async fn trigger_without_scope_is_rejected() {
        let p = processor();
        assert!(matches!(p.trigger().await, Err(RespondError::ScopeNotAttached)));
        assert!(!p.future().is_done());
    }

    #[tokio::test]
    async fn scope_can_only_be_attached_once() {
        let scope = RequestScope::new();
        let p = processor();
        p.set_scope_instance(scope.create_instance()).unwrap();
        let second = scope.create_instance();
        assert!(matches!(
            p.set_scope_instance(Arc::clone(&second)),
            Err(RespondError::ScopeAlreadyAttached)
        ));
        second.release();
    }

    #[tokio::test]
    async fn second_trigger_is_rejected() {
        let scope = RequestScope::new();
        let p = processor();
        let instance = scope.create_instance();
        p.set_scope_instance(Arc::clone(&instance)).unwrap();
        p.trigger().await.unwrap();
        assert!(matches!(p.trigger().await, Err(RespondError::AlreadyTriggered)));
        assert_eq!(instance.references(), 0);
        assert_eq!(p.future().try_get().unwrap().unwrap().status, 200);
    }

    #[test]
    fn unwrap_execution_strips_one_layer() {
        let cause = Failure::msg("inner");
        let wrapped = Failure::new(ExecutionError::new(cause.clone()));
        assert!(unwrap_execution(wrapped).ptr_eq(&cause));
        assert!(unwrap_execution(cause.clone()).ptr_eq(&cause));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
