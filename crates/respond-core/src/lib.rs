//! # respond-core
//!
//! The asynchronous response-processing pipeline.
//!
//! A [`ResponseProcessor`](processor::ResponseProcessor) takes the eventual
//! result of an in-flight request-to-response transformation, runs it
//! through the response [`stage`] chain, maps failures to responses via the
//! exception [`mapping`] registry, and commits exactly one terminal outcome
//! to a single-assignment [`future`] and a completion [`callback`].
//!
//! - **[`scope`]** -- request-scoped storage carried across `.await`
//! - **[`future`]** -- the single-assignment [`ResponseFuture`]
//! - **[`stage`]** -- responders, continuations and the chain executor
//! - **[`staging`]** -- before/after hooks around every stage
//! - **[`mapping`]** -- failure-to-response mappers
//! - **[`context`]** -- factories for per-request collaborators
//! - **[`processor`]** -- the orchestrator

pub mod callback;
pub mod context;
pub mod future;
pub mod mapping;
pub mod processor;
pub mod scope;
pub mod stage;
pub mod staging;

pub use callback::InvocationCallback;
pub use future::{Outcome, ResponseFuture};
pub use mapping::ExceptionMappers;
pub use processor::{MAX_REMAP_ATTEMPTS, ResponseProcessor, ResponseProcessorBuilder};
pub use scope::{RequestScope, ScopeInstance};
pub use stage::{Continuation, Responder, RespondingContext, ResumePoint};
pub use staging::StagingContext;
