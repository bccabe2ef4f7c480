//! Planning error taxonomy

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanningError {
    /// Rejected before any solver work
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{service} failed: {source:#}")]
    ExternalService {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },
}

impl PlanningError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn external(service: &'static str, source: anyhow::Error) -> Self {
        Self::ExternalService { service, source }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ExternalService { .. })
    }

    /// Error code used in reply envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }
}

/// Run an external call under `after`, mapping both failure modes
pub(crate) async fn with_timeout<T, F>(
    service: &'static str,
    after: Duration,
    call: F,
) -> Result<T, PlanningError>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("{} call failed: {:#}", service, e);
            Err(PlanningError::external(service, e))
        }
        Err(_) => Err(PlanningError::Timeout { stage: service, after }),
    }
}
