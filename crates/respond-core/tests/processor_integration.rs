//! End-to-end behaviour of the response processor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use respond_core::callback::InvocationCallback;
use respond_core::context::{RespondingContextFactory, ScopedResponding};
use respond_core::stage::Transformation;
use respond_core::{
    Continuation, ExceptionMappers, Outcome, RequestScope, Responder, RespondingContext,
    ResponseFuture, ResponseProcessor, ResponseProcessorBuilder, ResumePoint, ScopeInstance,
};
use respond_types::config::PipelineConfig;
use respond_types::{
    BoxError, CancelledError, ExecutionError, Failure, MappableError, Pair, Response,
    WebApplicationError,
};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("illegal state")]
struct IllegalState;

#[derive(Error, Debug)]
#[error("unsupported operation")]
struct Unsupported;

#[derive(Error, Debug)]
#[error("second failure")]
struct SecondFailure;

// ── Test doubles ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Recording {
    successes: Mutex<Vec<Response>>,
    failures: Mutex<Vec<Failure>>,
    fail_with_error: bool,
    panic: bool,
}

impl Recording {
    fn erroring() -> Self {
        Self {
            fail_with_error: true,
            ..Self::default()
        }
    }

    fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    fn successes(&self) -> Vec<Response> {
        self.successes.lock().unwrap().clone()
    }

    fn failures(&self) -> Vec<Failure> {
        self.failures.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.successes().len() + self.failures().len()
    }

    fn finish(&self) -> Result<(), BoxError> {
        if self.panic {
            panic!("callback blew up");
        }
        if self.fail_with_error {
            return Err("callback refused".into());
        }
        Ok(())
    }
}

impl InvocationCallback for Recording {
    fn on_success(&self, response: &Response) -> Result<(), BoxError> {
        self.successes.lock().unwrap().push(response.clone());
        self.finish()
    }

    fn on_failure(&self, failure: &Failure) -> Result<(), BoxError> {
        self.failures.lock().unwrap().push(failure.clone());
        self.finish()
    }
}

/// One request: its scope instance, upstream future and staged transformations.
struct Request {
    scope: RequestScope,
    instance: Arc<ScopeInstance>,
}

impl Request {
    fn new(scope: &RequestScope, upstream: ResponseFuture) -> Self {
        let instance = scope.create_instance();
        instance.put(upstream);
        Self {
            scope: scope.clone(),
            instance,
        }
    }

    /// Install `stages` so they run in the given order.
    fn with_stages(self, stages: Vec<(&str, Transformation)>) -> Self {
        let responding = ScopedResponding::install(&self.instance);
        for (name, transformation) in stages.into_iter().rev() {
            responding.push(name, transformation);
        }
        self
    }

    fn processor(
        &self,
        builder: &ResponseProcessorBuilder,
        callback: Arc<dyn InvocationCallback>,
    ) -> ResponseProcessor {
        let processor = builder.build(callback);
        processor
            .set_scope_instance(Arc::clone(&self.instance))
            .unwrap();
        processor
    }

    fn assert_released(&self) {
        assert_eq!(self.instance.references(), 0);
        assert_eq!(self.scope.live_instances(), 0);
    }
}

/// Fails on a 200 response, tags any other.
struct FailsOnOk {
    applied: AtomicUsize,
    resume: fn() -> ResumePoint,
}

impl FailsOnOk {
    fn new(resume: fn() -> ResumePoint) -> Arc<Self> {
        Arc::new(Self {
            applied: AtomicUsize::new(0),
            resume,
        })
    }

    fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl Responder for FailsOnOk {
    fn apply(&self, response: Response) -> Result<Continuation, Failure> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        if response.status == 200 {
            return Err(Failure::new(IllegalState));
        }
        Ok(Pair::of(response.with_header("X-Retried", "yes"), None))
    }

    fn resume_point(&self) -> ResumePoint {
        (self.resume)()
    }

    fn name(&self) -> &str {
        "fails-on-ok"
    }
}

/// Responding context that always builds the same chain.
struct FixedChain(Arc<dyn Responder>);

impl RespondingContext for FixedChain {
    fn push(&self, _name: &str, _transformation: Transformation) {}

    fn create_stage_chain(&self) -> Option<Arc<dyn Responder>> {
        Some(Arc::clone(&self.0))
    }
}

fn fixed_chain_factory(head: Arc<dyn Responder>) -> RespondingContextFactory {
    let ctx: Arc<dyn RespondingContext> = Arc::new(FixedChain(head));
    Arc::new(move || Arc::clone(&ctx))
}

fn stage<F>(f: F) -> Transformation
where
    F: Fn(Response) -> Result<Response, Failure> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn tag(value: &'static str) -> Transformation {
    stage(move |resp: Response| Ok(resp.with_header("X-Stage", value)))
}

fn mappers() -> Arc<ExceptionMappers> {
    Arc::new(
        ExceptionMappers::new()
            .with::<IllegalState, _>(|_| Ok(Response::new(503)))
            .with::<Unsupported, _>(|_| Err(Failure::msg("mapper failed"))),
    )
}

fn builder(scope: &RequestScope) -> ResponseProcessorBuilder {
    ResponseProcessorBuilder::new(scope.clone()).with_exception_mappers(mappers())
}

// ── Success paths ────────────────────────────────────────────────────────

#[tokio::test]
async fn success_without_stages_commits_upstream_response() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().get().await.unwrap();
    assert_eq!(out, Response::new(200));
    assert_eq!(callback.successes(), vec![Response::new(200)]);
    assert!(callback.failures().is_empty());
    request.assert_released();
}

#[tokio::test]
async fn stages_run_in_order_over_the_upstream_response() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![
            ("created", stage(|resp: Response| Ok(resp.with_status(201)))),
            ("tag", tag("done")),
        ]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out.status, 201);
    assert_eq!(out.header("X-Stage"), Some("done"));
    assert_eq!(callback.calls(), 1);
    request.assert_released();
}

#[tokio::test]
async fn pending_upstream_is_awaited() {
    let scope = RequestScope::new();
    let upstream = ResponseFuture::new();
    let request = Request::new(&scope, upstream.clone());
    let callback = Arc::new(Recording::default());
    let processor = Arc::new(request.processor(&builder(&scope), callback.clone()));

    let handle = Arc::clone(&processor).spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!processor.future().is_done());

    upstream.set(Response::new(202)).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(processor.future().get().await.unwrap().status, 202);
    assert_eq!(callback.successes().len(), 1);
    request.assert_released();
}

// ── Upstream failures ────────────────────────────────────────────────────

#[tokio::test]
async fn mapped_upstream_failure_runs_through_stages() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::failed(Failure::new(IllegalState)))
        .with_stages(vec![("tag", tag("after-mapping"))]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out.status, 503);
    assert_eq!(out.header("X-Stage"), Some("after-mapping"));
    assert_eq!(callback.successes().len(), 1);
    assert!(callback.failures().is_empty());
    request.assert_released();
}

#[tokio::test]
async fn unmapped_upstream_failure_is_committed_unwrapped() {
    let scope = RequestScope::new();
    let cause = Failure::msg("database down");
    let request = Request::new(&scope, ResponseFuture::failed(cause.clone()));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    match processor.future().outcome() {
        Some(Outcome::Failure(committed)) => {
            assert!(committed.ptr_eq(&cause));
            assert!(!committed.is::<ExecutionError>());
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].ptr_eq(&cause));
    assert!(callback.successes().is_empty());
    request.assert_released();
}

#[tokio::test]
async fn failing_mapper_commits_the_mapping_failure() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::failed(Failure::new(Unsupported)));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].to_string(), "mapper failed");
    request.assert_released();
}

#[tokio::test]
async fn web_application_failure_contributes_its_response() {
    let scope = RequestScope::new();
    let carried = Response::new(409).with_body(serde_json::json!({ "reason": "conflict" }));
    let upstream = ResponseFuture::failed(Failure::new(WebApplicationError::new(carried.clone())));
    let request = Request::new(&scope, upstream);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    assert_eq!(processor.future().try_get().unwrap().unwrap(), carried);
    assert_eq!(callback.successes(), vec![carried]);
    request.assert_released();
}

#[tokio::test]
async fn mappable_wrapper_is_mapped_by_its_cause() {
    let scope = RequestScope::new();
    let wrapped = Failure::new(MappableError::new(Failure::new(IllegalState)));
    let request = Request::new(&scope, ResponseFuture::failed(wrapped));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    assert_eq!(processor.future().try_get().unwrap().unwrap().status, 503);
    request.assert_released();
}

#[tokio::test]
async fn without_mappers_every_failure_is_terminal() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::failed(Failure::new(IllegalState)));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&ResponseProcessorBuilder::new(scope.clone()), callback.clone());

    processor.trigger().await.unwrap();

    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is::<IllegalState>());
    request.assert_released();
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_during_the_wait_is_mapped_like_a_failure() {
    let scope = RequestScope::new();
    let upstream = ResponseFuture::new();
    let request = Request::new(&scope, upstream.clone());
    let builder = ResponseProcessorBuilder::new(scope.clone()).with_exception_mappers(Arc::new(
        ExceptionMappers::new().with::<CancelledError, _>(|_| Ok(Response::new(499))),
    ));
    let callback = Arc::new(Recording::default());
    let processor = Arc::new(request.processor(&builder, callback.clone()));

    let handle = Arc::clone(&processor).spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(upstream.cancel());
    handle.await.unwrap().unwrap();

    let fut = processor.future();
    assert!(!fut.is_cancelled());
    assert_eq!(fut.get().await.unwrap(), Response::new(499));
    assert_eq!(callback.successes(), vec![Response::new(499)]);
    assert!(callback.failures().is_empty());
    request.assert_released();
}

#[tokio::test]
async fn cancelled_upstream_cancels_without_callback() {
    let scope = RequestScope::new();
    let upstream = ResponseFuture::new();
    upstream.cancel();
    let request = Request::new(&scope, upstream).with_stages(vec![("tag", tag("never"))]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let fut = processor.future();
    assert!(fut.is_cancelled());
    assert!(fut.outcome().is_none());
    let err = fut.get().await.unwrap_err();
    assert!(err.is::<CancelledError>());
    assert_eq!(callback.calls(), 0);
    request.assert_released();
}

#[tokio::test]
async fn externally_cancelled_future_skips_the_callback() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    assert!(processor.future().cancel());
    processor.trigger().await.unwrap();

    assert!(processor.future().is_cancelled());
    assert_eq!(callback.calls(), 0);
    request.assert_released();
}

// ── Stage failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn failing_stage_is_mapped_and_chain_resumes() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![
            ("stage1", stage(|_| Err(Failure::new(IllegalState)))),
            ("stage2", tag("stage2")),
        ]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out.status, 503);
    assert_eq!(out.header("X-Stage"), Some("stage2"));
    assert_eq!(callback.successes(), vec![out]);
    assert!(callback.failures().is_empty());
    request.assert_released();
}

#[tokio::test]
async fn second_stage_failure_is_committed_without_remapping() {
    let scope = RequestScope::new();
    let mapped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&mapped);
    let registry = ExceptionMappers::new()
        .with::<IllegalState, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(503))
        })
        .with::<SecondFailure, _>(|_| Ok(Response::new(500)));
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![
            ("first", stage(|_| Err(Failure::new(IllegalState)))),
            ("second", stage(|_| Err(Failure::new(SecondFailure)))),
            ("third", tag("unreachable")),
        ]);
    let callback = Arc::new(Recording::default());
    let builder = ResponseProcessorBuilder::new(scope.clone()).with_exception_mappers(Arc::new(registry));
    let processor = request.processor(&builder, callback.clone());

    processor.trigger().await.unwrap();

    assert_eq!(mapped.load(Ordering::SeqCst), 1);
    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is::<SecondFailure>());
    assert!(callback.successes().is_empty());
    match processor.future().outcome() {
        Some(Outcome::Failure(f)) => assert!(f.is::<SecondFailure>()),
        other => panic!("expected a failure, got {other:?}"),
    }
    request.assert_released();
}

#[tokio::test]
async fn failing_custom_responder_reruns_the_chain() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let responder = FailsOnOk::new(|| ResumePoint::Restart);
    let builder = ResponseProcessorBuilder::new(scope.clone())
        .with_exception_mappers(mappers())
        .with_responding_context(fixed_chain_factory(responder.clone()));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder, callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out.status, 503);
    assert_eq!(out.header("X-Retried"), Some("yes"));
    assert_eq!(responder.applied(), 2);
    assert_eq!(callback.successes(), vec![out]);
    request.assert_released();
}

#[tokio::test]
async fn responder_may_end_the_chain_after_mapping() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let responder = FailsOnOk::new(|| ResumePoint::End);
    let builder = ResponseProcessorBuilder::new(scope.clone())
        .with_exception_mappers(mappers())
        .with_responding_context(fixed_chain_factory(responder.clone()));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder, callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out, Response::new(503));
    assert_eq!(responder.applied(), 1);
    request.assert_released();
}

#[tokio::test]
async fn unmapped_stage_failure_is_committed() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![("boom", stage(|_| Err(Failure::msg("stage exploded"))))]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].to_string(), "stage exploded");
    request.assert_released();
}

#[tokio::test]
async fn failing_mapper_during_stage_recovery_is_committed() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![("unsupported", stage(|_| Err(Failure::new(Unsupported))))]);
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let failures = callback.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].to_string(), "mapper failed");
    request.assert_released();
}

// ── Callback failures ────────────────────────────────────────────────────

#[tokio::test]
async fn callback_error_does_not_change_the_outcome() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let callback = Arc::new(Recording::erroring());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    assert_eq!(processor.future().try_get().unwrap().unwrap().status, 200);
    assert_eq!(callback.successes().len(), 1);
    request.assert_released();
}

#[tokio::test]
async fn callback_panic_is_contained() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::failed(Failure::msg("upstream")));
    let callback = Arc::new(Recording::panicking());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    assert!(processor.future().outcome().unwrap().failure().is_some());
    assert_eq!(callback.failures().len(), 1);
    request.assert_released();
}

#[tokio::test]
async fn uncaught_callback_panic_still_releases_the_scope() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let callback = Arc::new(Recording::panicking());
    let builder = builder(&scope).with_config(PipelineConfig {
        catch_callback_panics: false,
        ..PipelineConfig::default()
    });
    let processor = Arc::new(request.processor(&builder, callback.clone()));

    let joined = Arc::clone(&processor).spawn().await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(processor.future().try_get().unwrap().unwrap().status, 200);
    request.assert_released();
}

// ── Scope ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stages_see_the_request_scope() {
    #[derive(Clone)]
    struct TenantId(&'static str);

    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)))
        .with_stages(vec![(
            "tenant",
            stage(|resp: Response| {
                let tenant = ScopeInstance::current()
                    .and_then(|s| s.get::<TenantId>())
                    .ok_or_else(|| Failure::msg("no tenant"))?;
                Ok(resp.with_header("X-Tenant", tenant.0))
            }),
        )]);
    request.instance.put(TenantId("acme"));
    let callback = Arc::new(Recording::default());
    let processor = request.processor(&builder(&scope), callback.clone());

    processor.trigger().await.unwrap();

    let out = processor.future().try_get().unwrap().unwrap();
    assert_eq!(out.header("X-Tenant"), Some("acme"));
    request.assert_released();
}

#[tokio::test]
async fn extra_scope_reference_outlives_the_processor() {
    let scope = RequestScope::new();
    let request = Request::new(&scope, ResponseFuture::completed(Response::new(200)));
    let held = request.instance.reference();
    let processor = request.processor(&builder(&scope), Arc::new(Recording::default()));

    processor.trigger().await.unwrap();

    assert_eq!(held.references(), 1);
    assert_eq!(scope.live_instances(), 1);
    assert!(held.release());
    request.assert_released();
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let scope = RequestScope::new();
    let builder = builder(&scope);
    let mut running = Vec::new();

    for i in 0..16u16 {
        let upstream = if i % 2 == 0 {
            ResponseFuture::completed(Response::new(200 + i))
        } else {
            ResponseFuture::failed(Failure::new(IllegalState))
        };
        let request = Request::new(&scope, upstream);
        let callback = Arc::new(Recording::default());
        let processor = Arc::new(request.processor(&builder, callback.clone()));
        running.push((i, Arc::clone(&processor).spawn(), processor, callback));
    }

    for (i, handle, processor, callback) in running {
        handle.await.unwrap().unwrap();
        let expected = if i % 2 == 0 { 200 + i } else { 503 };
        assert_eq!(processor.future().get().await.unwrap().status, expected);
        assert_eq!(callback.calls(), 1);
    }
    assert_eq!(scope.live_instances(), 0);
}
