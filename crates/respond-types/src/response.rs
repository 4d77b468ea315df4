//! The response value that flows through the stage chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An outbound response: status, headers and an optional body (entity).
///
/// Responses are plain values. Stages take one by value and hand back a
/// new one, so nothing in the pipeline mutates a response it does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,

    /// Response headers, kept sorted for deterministic output.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response entity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Response {
    /// Create a response with the given status and no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// `200 OK` with no body.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Builder method to replace the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Builder method to set a header, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builder method to set the body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether the response carries an entity.
    pub fn has_entity(&self) -> bool {
        self.body.is_some()
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}
