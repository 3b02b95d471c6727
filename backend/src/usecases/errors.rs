use axum::http::StatusCode;
use billing_sync::payments::provider_error::{ProviderError, ProviderErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("webhook verification failed: {0}")]
    Verification(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Authentication(_) => StatusCode::UNAUTHORIZED,
            BillingError::Verification(_) | BillingError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProviderError> for BillingError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            _ if err.is_retryable() => BillingError::ProviderUnavailable(err.to_string()),
            ProviderErrorKind::NotFound => BillingError::NotFound(err.to_string()),
            _ => BillingError::Internal(anyhow::Error::new(err)),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, BillingError>;
