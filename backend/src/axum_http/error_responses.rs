use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::usecases::errors::BillingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            BillingError::Internal(err) => {
                // Don't leak internal error detail to client
                error!(error = ?err, "billing request failed");
                "Internal server error".to_string()
            }
            BillingError::ProviderUnavailable(_) => {
                "Payment provider unavailable, try again".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
        });

        (status, body).into_response()
    }
}
