//! Observer hooks around stage execution.
//!
//! A [`StagingContext`] is told about every stage immediately before and
//! after it runs. Hooks cannot change the flow of the chain. A panicking
//! hook is an instrumentation bug and is not caught by the executor.

use std::sync::Arc;

use tracing::trace;

use respond_types::Response;
use respond_types::config::PipelineConfig;

use crate::stage::Responder;

/// Instrumentation hooks invoked around every stage.
pub trait StagingContext: Send + Sync {
    /// Called with the stage and its input response.
    fn before_stage(&self, stage: &dyn Responder, response: &Response);

    /// Called with the stage and the response it produced.
    fn after_stage(&self, stage: &dyn Responder, response: &Response);
}

/// Emits a `trace` event per hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStagingContext;

impl StagingContext for TracingStagingContext {
    fn before_stage(&self, stage: &dyn Responder, response: &Response) {
        trace!(stage = stage.name(), status = response.status, "entering response stage");
    }

    fn after_stage(&self, stage: &dyn Responder, response: &Response) {
        trace!(stage = stage.name(), status = response.status, "leaving response stage");
    }
}

/// Ignores every hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStagingContext;

impl StagingContext for NoopStagingContext {
    fn before_stage(&self, _stage: &dyn Responder, _response: &Response) {}

    fn after_stage(&self, _stage: &dyn Responder, _response: &Response) {}
}

/// The staging context selected by `config.trace_stages`.
pub fn from_config(config: &PipelineConfig) -> Arc<dyn StagingContext> {
    if config.trace_stages {
        Arc::new(TracingStagingContext)
    } else {
        Arc::new(NoopStagingContext)
    }
}
