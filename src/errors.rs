//! Typed error hierarchy for the CLA service.
//!
//! Two enums cover the two layers:
//! - `ClaError` — failures surfaced by orchestrator operations and the API
//! - `CallError` — a failed forge call, possibly carrying the response it came with

use thiserror::Error;

use crate::cla::github::ApiResponse;

/// Errors surfaced by CLA operations.
#[derive(Debug, Error)]
pub enum ClaError {
    /// No repository or gist reference could be resolved.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Markdown rendering failed or signalled failure through its response.
    #[error("{0}")]
    Render(String),

    #[error("Failed to sign CLA: {0}")]
    Sign(String),

    #[error("Failed to check CLA: {0}")]
    Check(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("GitHub API error: {0}")]
    GitHub(String),

    #[error("Database error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<CallError> for ClaError {
    fn from(err: CallError) -> Self {
        ClaError::GitHub(err.message)
    }
}

/// A forge call that did not succeed.
///
/// GitHub can answer with an error status and a JSON body at the same time, so
/// the response (when there was one) travels with the error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CallError {
    pub message: String,
    pub response: Option<ApiResponse>,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    pub fn with_response(message: impl Into<String>, response: ApiResponse) -> Self {
        Self {
            message: message.into(),
            response: Some(response),
        }
    }
}
