//! Error types for the step-up adapter.
//!
//! Errors carry internal detail for the logs only. Nothing in here is ever
//! rendered to the browser; the controller turns every error into a generic
//! failure presentation.

use thiserror::Error;

/// Errors raised while running the step-up protocol.
#[derive(Debug, Error)]
pub enum StepUpError {
    /// Missing or invalid configuration (certificate, SP or IdP settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or missing postback payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Signing the outbound request failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// XML could not be parsed or canonicalized.
    #[error("malformed XML: {0}")]
    Xml(String),
}

impl StepUpError {
    /// Stable error code written to the log next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            StepUpError::Configuration(_) => "ERROR_0002",
            StepUpError::Decode(_) => "ERROR_0003",
            StepUpError::Signing(_) => "ERROR_0004",
            StepUpError::Xml(_) => "ERROR_0005",
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        StepUpError::Configuration(message.into())
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        StepUpError::Decode(message.into())
    }
}

/// Result alias used throughout the crate.
pub type StepUpResult<T> = Result<T, StepUpError>;
