//! Configuration schema types.
//!
//! All structs accept both `snake_case` and `camelCase` field names in JSON
//! via `#[serde(alias)]`. Unknown fields are ignored.
//!
//! - [`PipelineConfig`] -- knobs for the response processor itself.
//! - [`ScenarioConfig`] -- a single request scenario driven by the CLI:
//!   the upstream result, the stages to run and the mappers to register.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{RespondError, Result};
use crate::response::Response;

fn default_true() -> bool {
    true
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Response processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Emit `trace` events around every stage.
    /// When false a no-op staging context is used.
    #[serde(default = "default_true", alias = "traceStages")]
    pub trace_stages: bool,

    /// Treat a panicking completion callback like a failing one
    /// (log and continue) instead of unwinding through the processor.
    #[serde(default = "default_true", alias = "catchCallbackPanics")]
    pub catch_callback_panics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trace_stages: true,
            catch_callback_panics: true,
        }
    }
}

// ── Scenario ─────────────────────────────────────────────────────────────

/// A request scenario: one upstream result pushed through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Processor settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// What the upstream transformation produced.
    pub upstream: UpstreamSpec,

    /// Response transformations, in registration order.
    #[serde(default)]
    pub stages: Vec<StageSpec>,

    /// Exception mappers keyed by failure kind.
    #[serde(default)]
    pub mappers: Vec<MapperSpec>,
}

/// Result of the upstream request-to-response transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamSpec {
    /// The transformation produced a response.
    Response {
        /// The produced response.
        response: Response,
    },
    /// The transformation failed with an application error.
    Error {
        /// Failure kind, matched against [`MapperSpec::kind`].
        kind: String,
        /// Human-readable message.
        #[serde(default)]
        message: String,
    },
    /// The transformation failed with an error that carries its own response.
    WebError {
        /// The response carried by the failure.
        response: Response,
    },
    /// The transformation was cancelled.
    Cancelled,
}

/// A single response transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    /// Replace the status code.
    SetStatus {
        /// New status code.
        status: u16,
    },
    /// Set a header.
    SetHeader {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
    /// Replace the body.
    SetBody {
        /// New body.
        body: serde_json::Value,
    },
    /// Fail with an application error of the given kind.
    Fail {
        /// Failure kind, matched against [`MapperSpec::kind`].
        kind: String,
        /// Fail only when the incoming status equals this value.
        #[serde(default, alias = "whenStatus")]
        when_status: Option<u16>,
    },
}

/// Maps failures of one kind to a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperSpec {
    /// Failure kind this mapper handles.
    pub kind: String,
    /// Status of the produced response.
    pub status: u16,
    /// Optional body of the produced response.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl MapperSpec {
    /// The response this mapper produces.
    pub fn to_response(&self) -> Response {
        let resp = Response::new(self.status);
        match &self.body {
            Some(body) => resp.with_body(body.clone()),
            None => resp,
        }
    }
}

impl ScenarioConfig {
    /// Parse a scenario from JSON text and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check status codes and mapper uniqueness.
    pub fn validate(&self) -> Result<()> {
        match &self.upstream {
            UpstreamSpec::Response { response } | UpstreamSpec::WebError { response } => {
                check_status(response.status, "upstream")?;
            }
            UpstreamSpec::Error { kind, .. } => check_kind(kind, "upstream")?,
            UpstreamSpec::Cancelled => {}
        }

        for (idx, stage) in self.stages.iter().enumerate() {
            let ctx = format!("stage {idx}");
            match stage {
                StageSpec::SetStatus { status } => check_status(*status, &ctx)?,
                StageSpec::Fail { kind, when_status } => {
                    check_kind(kind, &ctx)?;
                    if let Some(status) = when_status {
                        check_status(*status, &ctx)?;
                    }
                }
                StageSpec::SetHeader { name, .. } if name.trim().is_empty() => {
                    return Err(RespondError::ConfigInvalid {
                        reason: format!("{ctx}: header name is empty"),
                    });
                }
                _ => {}
            }
        }

        let mut seen = HashSet::new();
        for mapper in &self.mappers {
            check_kind(&mapper.kind, "mapper")?;
            check_status(mapper.status, &format!("mapper '{}'", mapper.kind))?;
            if !seen.insert(mapper.kind.as_str()) {
                return Err(RespondError::ConfigInvalid {
                    reason: format!("duplicate mapper for kind '{}'", mapper.kind),
                });
            }
        }
        Ok(())
    }
}

fn check_status(status: u16, ctx: &str) -> Result<()> {
    if !(100..=599).contains(&status) {
        return Err(RespondError::ConfigInvalid {
            reason: format!("{ctx}: status {status} out of range"),
        });
    }
    Ok(())
}

fn check_kind(kind: &str, ctx: &str) -> Result<()> {
    if kind.trim().is_empty() {
        return Err(RespondError::ConfigInvalid {
            reason: format!("{ctx}: failure kind is empty"),
        });
    }
    Ok(())
}
