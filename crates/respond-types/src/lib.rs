//! # respond-types
//!
//! Core type definitions for the respond response-processing pipeline.
//!
//! This crate is the foundation of the dependency graph -- every other
//! respond crate depends on it. It contains:
//!
//! - **[`error`]** -- [`RespondError`] for programming and configuration errors
//! - **[`failure`]** -- [`Failure`] and the wrapper failures the pipeline unwraps
//! - **[`response`]** -- the [`Response`] value flowing through the stages
//! - **[`collection`]** -- the immutable [`Pair`] used for stage continuations
//! - **[`config`]** -- pipeline and scenario configuration schema

pub mod collection;
pub mod config;
pub mod error;
pub mod failure;
pub mod response;

pub use collection::Pair;
pub use error::{RespondError, Result};
pub use failure::{
    BoxError, CancelledError, ExecutionError, Failure, MappableError, WebApplicationError,
};
pub use response::Response;
