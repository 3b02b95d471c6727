use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use billing_sync::domain::repositories::{
    payment_provider_customers::PaymentProviderCustomerRepository,
    subscription_mirrors::SubscriptionMirrorRepository,
};

use crate::{
    auth::AuthUser,
    usecases::{entitlements::EntitlementUseCase, errors::BillingError, payment_gateway::PaymentGateway},
};

pub fn routes<M, C, G>(usecase: Arc<EntitlementUseCase<M, C, G>>) -> Router
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/entitlement", post(check_entitlement::<M, C, G>))
        .with_state(usecase)
}

/// Unknown decisions keep the same body shape but answer 503 so clients retry
/// instead of locking the user out.
pub async fn check_entitlement<M, C, G>(
    State(usecase): State<Arc<EntitlementUseCase<M, C, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, BillingError>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let decision = usecase
        .is_entitled(auth.user_id, auth.email.as_deref())
        .await?;

    let status = match decision.active {
        Some(_) => StatusCode::OK,
        None => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(decision)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{SUPABASE_AUDIENCE, SupabaseClaims, SupabaseJwtVerifier},
        usecases::{
            identity_resolver::IdentityResolver,
            reconciliation::ReconciliationEngine,
            test_support::{FakeProvider, InMemoryCustomers, InMemoryMirror, instant_retry},
        },
    };
    use axum::{Extension, body::Body, http::Request};
    use billing_sync::domain::value_objects::{entitlements::OverrideAllowList, plans::PlanCatalog};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "supersecretjwtsecretforunittesting123";

    fn app(account_id: Uuid, provider: Arc<FakeProvider>) -> Router {
        let mirror = Arc::new(InMemoryMirror::default());
        let identity = Arc::new(IdentityResolver::new(
            Arc::new(InMemoryCustomers::with_mapping(account_id, "cus_1")),
            Arc::clone(&provider),
            instant_retry(),
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(
            Arc::clone(&mirror),
            Arc::clone(&identity),
            provider,
            instant_retry(),
        ));
        let usecase = EntitlementUseCase::new(
            mirror,
            identity,
            reconciler,
            OverrideAllowList::default(),
            PlanCatalog::default(),
            chrono::Duration::hours(24),
        );
        routes(Arc::new(usecase)).layer(Extension(Arc::new(SupabaseJwtVerifier::new(SECRET))))
    }

    fn bearer(account_id: Uuid) -> String {
        let claims = SupabaseClaims {
            sub: account_id.to_string(),
            aud: SUPABASE_AUDIENCE.to_string(),
            email: Some("member@example.com".to_string()),
            exp: 9_999_999_999,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        format!("Bearer {token}")
    }

    fn request(authorization: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/entitlement");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        let response = app(Uuid::new_v4(), Arc::new(FakeProvider::default()))
            .oneshot(request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn provider_outage_answers_503_with_unknown_decision() {
        let account_id = Uuid::new_v4();
        let provider = Arc::new(FakeProvider::default());
        provider.set_unavailable(true);

        let response = app(account_id, provider)
            .oneshot(request(Some(bearer(account_id))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reason"], "provider_unavailable");
        assert_eq!(json["status"], "unknown");
        assert!(json["active"].is_null());
    }

    #[tokio::test]
    async fn customer_without_subscriptions_is_inactive() {
        let account_id = Uuid::new_v4();

        let response = app(account_id, Arc::new(FakeProvider::default()))
            .oneshot(request(Some(bearer(account_id))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["active"], false);
        assert_eq!(json["reason"], "no_subscription");
        assert!(json.get("renewsAt").is_some());
    }
}
