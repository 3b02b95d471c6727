use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use billing_sync::domain::repositories::{
    payment_provider_customers::PaymentProviderCustomerRepository,
    subscription_mirrors::SubscriptionMirrorRepository,
};
use serde_json::json;
use tracing::info;

use crate::usecases::{
    billing_webhook::BillingWebhookUseCase, errors::BillingError, payment_gateway::PaymentGateway,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes<M, C, G>(usecase: Arc<BillingWebhookUseCase<M, C, G>>) -> Router
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/webhook", post(receive::<M, C, G>))
        .with_state(usecase)
}

/// Acknowledges as soon as the event is verified and handed off; processing
/// failures after this point are logged, not returned to the provider.
pub async fn receive<M, C, G>(
    State(usecase): State<Arc<BillingWebhookUseCase<M, C, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, BillingError>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = usecase.verify_and_parse(&body, signature)?;
    info!(
        event_id = %event.event_id,
        event_kind = %event.kind,
        "billing webhook: event accepted"
    );

    usecase.dispatch(event);

    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::{
        identity_resolver::IdentityResolver,
        reconciliation::ReconciliationEngine,
        test_support::{FakeProvider, InMemoryCustomers, InMemoryMirror, instant_retry},
    };
    use axum::{body::Body, http::Request};
    use billing_sync::payments::webhook_signature::WebhookSignatureVerifier;
    use chrono::Utc;
    use tower::ServiceExt;

    const SECRET: &str = "whsec_router";

    fn app() -> Router {
        let customers = Arc::new(InMemoryCustomers::default());
        let provider = Arc::new(FakeProvider::default());
        let identity = Arc::new(IdentityResolver::new(
            customers,
            Arc::clone(&provider),
            instant_retry(),
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(
            Arc::new(InMemoryMirror::default()),
            Arc::clone(&identity),
            provider,
            instant_retry(),
        ));
        routes(Arc::new(BillingWebhookUseCase::new(
            WebhookSignatureVerifier::new(SECRET, 300),
            identity,
            reconciler,
        )))
    }

    fn request(body: &'static [u8], signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/webhook");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn signed_event_is_acknowledged() {
        let body: &'static [u8] = br#"{"id":"evt_1","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        let signature = WebhookSignatureVerifier::new(SECRET, 300).sign(body, Utc::now().timestamp());

        let response = app().oneshot(request(body, Some(signature))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsigned_or_tampered_event_is_rejected() {
        let body: &'static [u8] = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let response = app().oneshot(request(body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let signature = WebhookSignatureVerifier::new(SECRET, 300)
            .sign(b"{\"other\":true}", Utc::now().timestamp());
        let response = app().oneshot(request(body, Some(signature))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
