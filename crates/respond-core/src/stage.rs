//! Response stages and the stage-chain executor.
//!
//! A [`Responder`] turns a response into a [`Continuation`]: the next
//! response paired with the stage to run next, or `None` to end the chain.
//! Because every stage picks its own successor, a chain may end early or
//! branch; [`run_chain`] just follows whatever successor it is handed.
//!
//! [`RespondingContext`] is the per-request registry that response
//! transformations are pushed into while a request is processed; it builds
//! the chain once processing reaches the response side.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use respond_types::{Failure, Pair, Response};

use crate::staging::StagingContext;

/// The response produced by a stage, paired with the stage to run next.
pub type Continuation = Pair<Response, Option<Arc<dyn Responder>>>;

/// A fallible response transformation.
pub type Transformation = Arc<dyn Fn(Response) -> Result<Response, Failure> + Send + Sync>;

/// One stage of the response chain.
pub trait Responder: Send + Sync {
    /// Transform `response` and pick the successor.
    fn apply(&self, response: Response) -> Result<Continuation, Failure>;

    /// Where the chain continues if this stage fails and its failure is
    /// mapped to a response. Defaults to a freshly built chain.
    fn resume_point(&self) -> ResumePoint {
        ResumePoint::Restart
    }

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "responder"
    }
}

/// Where a chain continues after a failed stage's failure was mapped.
#[derive(Clone)]
pub enum ResumePoint {
    /// Build the chain again and run it from its head.
    Restart,
    /// Continue at the given stage.
    At(Arc<dyn Responder>),
    /// End the chain with the mapped response.
    End,
}

impl fmt::Debug for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumePoint::Restart => f.write_str("Restart"),
            ResumePoint::At(stage) => f.debug_tuple("At").field(&stage.name()).finish(),
            ResumePoint::End => f.write_str("End"),
        }
    }
}

// ── LinkedStage ──────────────────────────────────────────────────────────

/// A transformation with a fixed successor.
pub struct LinkedStage {
    name: String,
    transform: Transformation,
    next: Option<Arc<dyn Responder>>,
}

impl LinkedStage {
    /// A terminal stage applying `transform`.
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Response) -> Result<Response, Failure> + Send + Sync + 'static,
    {
        Self::from_transformation(name, Arc::new(transform))
    }

    /// A terminal stage applying an already shared transformation.
    pub fn from_transformation(name: impl Into<String>, transform: Transformation) -> Self {
        Self {
            name: name.into(),
            transform,
            next: None,
        }
    }

    /// Builder method to set the successor.
    pub fn with_next(mut self, next: Arc<dyn Responder>) -> Self {
        self.next = Some(next);
        self
    }
}

impl Responder for LinkedStage {
    fn apply(&self, response: Response) -> Result<Continuation, Failure> {
        let response = (self.transform)(response)?;
        Ok(Pair::of(response, self.next.clone()))
    }

    fn resume_point(&self) -> ResumePoint {
        match &self.next {
            Some(next) => ResumePoint::At(Arc::clone(next)),
            None => ResumePoint::End,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Link named transformations so they run in iteration order.
pub fn chain<I, S>(stages: I) -> Option<Arc<dyn Responder>>
where
    I: IntoIterator<Item = (S, Transformation)>,
    I::IntoIter: DoubleEndedIterator,
    S: Into<String>,
{
    stages.into_iter().rev().fold(None, |next, (name, transform)| {
        let stage = LinkedStage::from_transformation(name, transform);
        let stage = match next {
            Some(next) => stage.with_next(next),
            None => stage,
        };
        Some(Arc::new(stage) as Arc<dyn Responder>)
    })
}

// ── RespondingContext ────────────────────────────────────────────────────

/// Per-request registry of response transformations.
pub trait RespondingContext: Send + Sync {
    /// Register a transformation. Later registrations run first.
    fn push(&self, name: &str, transformation: Transformation);

    /// Build the chain from everything pushed so far, `None` if empty.
    fn create_stage_chain(&self) -> Option<Arc<dyn Responder>>;
}

/// [`RespondingContext`] keeping the chain as a stack of linked stages.
#[derive(Default)]
pub struct DefaultRespondingContext {
    root: Mutex<Option<Arc<dyn Responder>>>,
}

impl DefaultRespondingContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RespondingContext for DefaultRespondingContext {
    fn push(&self, name: &str, transformation: Transformation) {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        let stage = LinkedStage::from_transformation(name, transformation);
        let stage = match root.take() {
            Some(next) => stage.with_next(next),
            None => stage,
        };
        *root = Some(Arc::new(stage));
    }

    fn create_stage_chain(&self) -> Option<Arc<dyn Responder>> {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Execution ────────────────────────────────────────────────────────────

/// A stage failed while the chain was running.
pub struct StageFailure {
    /// What the stage failed with.
    pub failure: Failure,
    /// Name of the failing stage.
    pub stage: String,
    /// Where to continue if the failure is mapped to a response.
    pub resume: ResumePoint,
}

impl fmt::Debug for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageFailure")
            .field("failure", &self.failure)
            .field("stage", &self.stage)
            .field("resume", &self.resume)
            .finish()
    }
}

/// Run `response` through the chain starting at `head`.
///
/// An absent head returns the response unchanged. The tracker is notified
/// before and after every stage, strictly in order.
pub fn run_chain(
    response: Response,
    head: Option<Arc<dyn Responder>>,
    tracker: &dyn StagingContext,
) -> Result<Response, StageFailure> {
    let mut continuation: Continuation = Pair::of(response, head);
    loop {
        let (response, next) = continuation.into_parts();
        let Some(stage) = next else {
            return Ok(response);
        };

        tracker.before_stage(stage.as_ref(), &response);
        continuation = stage.apply(response).map_err(|failure| {
            debug!(stage = stage.name(), error = %failure, "stage failed");
            StageFailure {
                failure,
                stage: stage.name().to_string(),
                resume: stage.resume_point(),
            }
        })?;
        tracker.after_stage(stage.as_ref(), continuation.left());
    }
}
