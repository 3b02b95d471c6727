use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use billing_sync::domain::repositories::{
    payment_provider_customers::PaymentProviderCustomerRepository,
    subscription_mirrors::SubscriptionMirrorRepository,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::usecases::{
    errors::BillingError, payment_gateway::PaymentGateway, reconciliation::ReconciliationEngine,
};

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
}

pub struct ReplayState<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub reconciler: Arc<ReconciliationEngine<M, C, G>>,
    pub token: Option<String>,
}

pub fn routes<M, C, G>(state: ReplayState<M, C, G>) -> Router
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/replay", post(replay::<M, C, G>))
        .with_state(Arc::new(state))
}

/// Manual re-run of reconciliation for an event whose asynchronous processing failed.
pub async fn replay<M, C, G>(
    State(state): State<Arc<ReplayState<M, C, G>>>,
    headers: HeaderMap,
    Json(request): Json<ReplayRequest>,
) -> Result<impl IntoResponse, BillingError>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let Some(expected) = state.token.as_deref() else {
        return Err(BillingError::NotFound("replay endpoint is disabled".to_string()));
    };

    let provided = headers
        .get(INTERNAL_TOKEN_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    if !bool::from(provided.ct_eq(expected.as_bytes())) {
        warn!("billing replay: rejected request with bad internal token");
        return Err(BillingError::Authentication("invalid internal token".to_string()));
    }

    let customer_id = request.customer_id.as_deref().filter(|id| !id.is_empty());
    let subscription_id = request.subscription_id.as_deref().filter(|id| !id.is_empty());
    info!(customer_id = ?customer_id, subscription_id = ?subscription_id, "billing replay: requested");

    let mirror = match (subscription_id, customer_id) {
        (Some(subscription_id), customer_hint) => state
            .reconciler
            .reconcile_subscription(subscription_id, customer_hint)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("nothing to replay for {subscription_id}")))?,
        (None, Some(customer_id)) => state.reconciler.reconcile_customer(customer_id).await?,
        (None, None) => {
            return Err(BillingError::InvalidRequest(
                "customer_id or subscription_id is required".to_string(),
            ));
        }
    };

    Ok(Json(mirror))
}
