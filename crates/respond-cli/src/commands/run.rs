//! `respond run` -- drive one request scenario through the pipeline.
//!
//! The scenario's upstream result becomes the inflected response of a fresh
//! request scope, its stages are registered on the request's responding
//! context and its mappers handle [`ScenarioError`]s by kind. The committed
//! outcome, together with the callback method that observed it, is printed
//! as JSON.
//!
//! # Example
//!
//! ```text
//! respond run --scenario scenario.json
//! RUST_LOG=respond_core=trace respond run --scenario scenario.json
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use clap::Args;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use respond_core::callback::InvocationCallback;
use respond_core::context::ScopedResponding;
use respond_core::stage::Transformation;
use respond_core::{ExceptionMappers, Outcome, RequestScope, ResponseFuture, ResponseProcessorBuilder};
use respond_types::config::{MapperSpec, ScenarioConfig, StageSpec, UpstreamSpec};
use respond_types::{BoxError, Failure, Response, WebApplicationError};

use super::load_scenario;

/// Arguments for the `respond run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the scenario JSON file.
    #[arg(short, long)]
    pub scenario: String,
}

/// Application failure raised by scenario upstreams and `fail` stages.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ScenarioError {
    /// Failure kind, the key mappers are looked up by.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// What `respond run` prints.
#[derive(Debug, Serialize)]
pub struct Report {
    /// `success`, `failure` or `cancelled`.
    pub outcome: &'static str,
    /// The committed response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    /// The committed failure's message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Callback method that observed the outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<&'static str>,
}

/// Run the run command.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let scenario = load_scenario(&args.scenario).await?;
    let report = execute(&scenario).await?;
    info!(outcome = report.outcome, "scenario finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Push `scenario` through a freshly built processor.
pub async fn execute(scenario: &ScenarioConfig) -> anyhow::Result<Report> {
    let scope = RequestScope::new();
    let instance = scope.create_instance();
    instance.put(upstream(&scenario.upstream));

    let responding = ScopedResponding::install(&instance);
    // Later pushes run first.
    for (idx, spec) in scenario.stages.iter().enumerate().rev() {
        responding.push(&stage_name(idx, spec), transformation(idx, spec));
    }

    let callback = Arc::new(Observed::default());
    let processor = ResponseProcessorBuilder::new(scope.clone())
        .with_config(scenario.pipeline.clone())
        .with_exception_mappers(Arc::new(mappers(&scenario.mappers)))
        .build(callback.clone());
    processor.set_scope_instance(instance)?;
    processor.trigger().await?;

    let future = processor.future();
    let callback = callback.method();
    let report = match future.outcome() {
        Some(Outcome::Response(response)) => Report {
            outcome: "success",
            response: Some(response),
            error: None,
            callback,
        },
        Some(Outcome::Failure(failure)) => Report {
            outcome: "failure",
            response: None,
            error: Some(failure.to_string()),
            callback,
        },
        None => Report {
            outcome: "cancelled",
            response: None,
            error: None,
            callback,
        },
    };
    Ok(report)
}

fn upstream(spec: &UpstreamSpec) -> ResponseFuture {
    match spec {
        UpstreamSpec::Response { response } => ResponseFuture::completed(response.clone()),
        UpstreamSpec::Error { kind, message } => ResponseFuture::failed(Failure::new(ScenarioError {
            kind: kind.clone(),
            message: message.clone(),
        })),
        UpstreamSpec::WebError { response } => {
            ResponseFuture::failed(Failure::new(WebApplicationError::new(response.clone())))
        }
        UpstreamSpec::Cancelled => {
            let future = ResponseFuture::new();
            future.cancel();
            future
        }
    }
}

fn stage_name(idx: usize, spec: &StageSpec) -> String {
    let kind = match spec {
        StageSpec::SetStatus { .. } => "set_status",
        StageSpec::SetHeader { .. } => "set_header",
        StageSpec::SetBody { .. } => "set_body",
        StageSpec::Fail { .. } => "fail",
    };
    format!("{idx}:{kind}")
}

fn transformation(idx: usize, spec: &StageSpec) -> Transformation {
    match spec.clone() {
        StageSpec::SetStatus { status } => Arc::new(move |resp: Response| Ok(resp.with_status(status))),
        StageSpec::SetHeader { name, value } => {
            Arc::new(move |resp: Response| Ok(resp.with_header(name.clone(), value.clone())))
        }
        StageSpec::SetBody { body } => Arc::new(move |resp: Response| Ok(resp.with_body(body.clone()))),
        StageSpec::Fail { kind, when_status } => Arc::new(move |resp: Response| {
            if when_status.is_some_and(|status| status != resp.status) {
                return Ok(resp);
            }
            Err(Failure::new(ScenarioError {
                kind: kind.clone(),
                message: format!("stage {idx} failed on status {}", resp.status),
            }))
        }),
    }
}

/// Mapper registry resolving [`ScenarioError`]s by kind.
///
/// A kind without a mapper is declined, leaving the failure unmapped.
fn mappers(specs: &[MapperSpec]) -> ExceptionMappers {
    if specs.is_empty() {
        return ExceptionMappers::new();
    }
    let table: HashMap<String, Response> = specs
        .iter()
        .map(|spec| (spec.kind.clone(), spec.to_response()))
        .collect();
    ExceptionMappers::new()
        .with_partial::<ScenarioError, _>(move |err| Ok(table.get(&err.kind).cloned()))
}

/// Remembers which callback method fired.
#[derive(Default)]
struct Observed {
    method: Mutex<Option<&'static str>>,
}

impl Observed {
    fn record(&self, method: &'static str) {
        *self.method.lock().unwrap_or_else(PoisonError::into_inner) = Some(method);
    }

    fn method(&self) -> Option<&'static str> {
        *self.method.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InvocationCallback for Observed {
    fn on_success(&self, _response: &Response) -> Result<(), BoxError> {
        self.record("on_success");
        Ok(())
    }

    fn on_failure(&self, _failure: &Failure) -> Result<(), BoxError> {
        self.record("on_failure");
        Ok(())
    }
}
