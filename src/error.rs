//! Error types for the market analysis orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Provider Channel Errors
    // =============================

    /// Spawn failure, broken pipe, closed stdout.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The provider answered, but not in the shape we expect.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The provider reported a business error (unknown entity, rate limit, ...).
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Provider not connected: {0}")]
    NotConnected(String),

    #[error("No tool providers available: {0}")]
    NoProvidersAvailable(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Session store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification of a failure recorded against a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Transport,
    Protocol,
    Provider,
    Timeout,
    Validation,
    Other,
}

impl OrchestrationError {
    pub fn step_kind(&self) -> StepErrorKind {
        match self {
            Self::TransportError(_) | Self::NotConnected(_) | Self::IoError(_) => {
                StepErrorKind::Transport
            }
            Self::ProtocolError(_) | Self::SerializationError(_) => StepErrorKind::Protocol,
            Self::ProviderError(_) => StepErrorKind::Provider,
            Self::TimeoutError(_) => StepErrorKind::Timeout,
            Self::ValidationError(_) => StepErrorKind::Validation,
            _ => StepErrorKind::Other,
        }
    }

    /// Whether the channel that produced this error can still be trusted.
    pub fn breaks_channel(&self) -> bool {
        matches!(
            self,
            Self::TransportError(_) | Self::IoError(_) | Self::TimeoutError(_)
        )
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepErrorKind::Transport => "transport",
            StepErrorKind::Protocol => "protocol",
            StepErrorKind::Provider => "provider",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::Validation => "validation",
            StepErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}
