use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use billing_sync::{
    domain::value_objects::{entitlements::OverrideAllowList, plans::PlanCatalog},
    infra::db::{
        postgres::postgres_connection::BillingDbPool,
        repositories::{
            payment_provider_customers::PaymentProviderCustomerPostgres,
            subscription_mirrors::SubscriptionMirrorPostgres,
        },
    },
    payments::{
        retry::RetryPolicy,
        stripe_client::{StripeClient, StripeClientConfig},
        webhook_signature::WebhookSignatureVerifier,
    },
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    auth::SupabaseJwtVerifier,
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
    usecases::{
        billing_sessions::BillingSessionUseCase, billing_webhook::BillingWebhookUseCase,
        entitlements::EntitlementUseCase, identity_resolver::IdentityResolver,
        reconciliation::ReconciliationEngine,
    },
};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<BillingDbPool>) -> Result<()> {
    let app = build_router(&config, db_pool)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn build_router(config: &DotEnvyConfig, db_pool: Arc<BillingDbPool>) -> Result<Router> {
    let stripe = &config.stripe;
    let billing = &config.billing;

    let gateway = Arc::new(StripeClient::new(StripeClientConfig {
        secret_key: stripe.secret_key.clone(),
        api_base_url: stripe.api_base_url.clone(),
        request_timeout: stripe.request_timeout,
        success_url: stripe.success_url.clone(),
        cancel_url: stripe.cancel_url.clone(),
        portal_return_url: stripe.portal_return_url.clone(),
    })?);
    let retry_policy = RetryPolicy {
        max_retries: stripe.max_retries,
        backoff_base_ms: stripe.backoff_base_ms,
        backoff_max_ms: stripe.backoff_max_ms,
    };
    let catalog = PlanCatalog::new(
        billing.monthly_price_ids.clone(),
        billing.yearly_price_ids.clone(),
    );

    let customer_repository = Arc::new(PaymentProviderCustomerPostgres::new(Arc::clone(&db_pool)));
    let mirror_repository = Arc::new(SubscriptionMirrorPostgres::new(Arc::clone(&db_pool)));

    let identity = Arc::new(IdentityResolver::new(
        customer_repository,
        Arc::clone(&gateway),
        retry_policy,
    ));
    let reconciler = Arc::new(ReconciliationEngine::new(
        Arc::clone(&mirror_repository),
        Arc::clone(&identity),
        Arc::clone(&gateway),
        retry_policy,
    ));

    let overrides = OverrideAllowList::new(&billing.override_emails);
    info!(override_count = overrides.len(), "billing: entitlement overrides loaded");

    let entitlement_usecase = EntitlementUseCase::new(
        mirror_repository,
        Arc::clone(&identity),
        Arc::clone(&reconciler),
        overrides,
        catalog.clone(),
        chrono::Duration::seconds(billing.mirror_max_age_secs),
    );
    let webhook_usecase = BillingWebhookUseCase::new(
        WebhookSignatureVerifier::new(stripe.webhook_secret.as_bytes(), stripe.webhook_tolerance_secs),
        Arc::clone(&identity),
        Arc::clone(&reconciler),
    );
    let session_usecase = BillingSessionUseCase::new(identity, gateway, catalog, retry_policy);

    if billing.internal_replay_token.is_none() {
        warn!("billing: INTERNAL_REPLAY_TOKEN not set; replay endpoint disabled");
    }

    let billing_routes = Router::new()
        .merge(routers::billing_webhook::routes(Arc::new(webhook_usecase)))
        .merge(routers::entitlements::routes(Arc::new(entitlement_usecase)))
        .merge(routers::billing_sessions::routes(Arc::new(session_usecase)));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest("/api/v1/billing", billing_routes)
        .nest(
            "/internal/billing",
            routers::billing_replay::routes(routers::billing_replay::ReplayState {
                reconciler,
                token: billing.internal_replay_token.clone(),
            }),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(Arc::new(SupabaseJwtVerifier::new(
            &config.supabase.jwt_secret,
        ))))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
