use thiserror::Error;

use crate::application::preview::PreviewInitError;
use crate::infra::error::InfraError;

/// Top-level application error for the startup and CLI paths.
///
/// Preview rendering never produces one of these: the orchestrator recovers
/// every build failure into a diagnostic page. What remains are the fatal
/// bootstrap classes — configuration, telemetry, bind, scratch setup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    PreviewInit(#[from] PreviewInitError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
