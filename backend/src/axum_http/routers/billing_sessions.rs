use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use billing_sync::domain::repositories::payment_provider_customers::PaymentProviderCustomerRepository;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    usecases::{billing_sessions::BillingSessionUseCase, errors::BillingError, payment_gateway::PaymentGateway},
};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct SessionUrlResponse {
    pub url: String,
}

pub fn routes<C, G>(usecase: Arc<BillingSessionUseCase<C, G>>) -> Router
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/checkout", post(create_checkout::<C, G>))
        .route("/portal", post(create_portal::<C, G>))
        .with_state(usecase)
}

pub async fn create_checkout<C, G>(
    State(usecase): State<Arc<BillingSessionUseCase<C, G>>>,
    auth: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, BillingError>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let url = usecase
        .create_checkout_session(auth.user_id, auth.email.as_deref(), &request.plan)
        .await?;
    Ok(Json(SessionUrlResponse { url }))
}

pub async fn create_portal<C, G>(
    State(usecase): State<Arc<BillingSessionUseCase<C, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, BillingError>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let url = usecase
        .create_portal_session(auth.user_id, auth.email.as_deref())
        .await?;
    Ok(Json(SessionUrlResponse { url }))
}
