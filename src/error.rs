//! Error taxonomy for calls against the remote case service.
//!
//! `NotFound` and `Conflict` are *expected* at specific scenario steps and are
//! matched at the call site; everything else propagates and aborts the current
//! scenario iteration only.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the remote client seam.
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unknown event: {0}")]
    UnknownEvent(Uuid),

    #[error("transport: {0}")]
    Transport(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn not_found_case(id: Uuid) -> Self {
        Self::NotFound(format!("legal case {id}"))
    }

    pub fn not_found_file(id: Uuid) -> Self {
        Self::NotFound(format!("source file {id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Map a non-success HTTP status and body from the remote API back into
    /// the taxonomy.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            404 => Self::NotFound(body),
            409 => Self::Conflict(body),
            400 | 422 => Self::InvalidInput(body),
            401 | 403 => Self::Unauthorized(body),
            _ => Self::Transport(format!("remote returned {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
