use std::sync::Arc;

use billing_sync::{
    domain::{
        repositories::payment_provider_customers::PaymentProviderCustomerRepository,
        value_objects::plans::PlanCatalog,
    },
    payments::{
        retry::{RetryPolicy, with_backoff},
        stripe_client::CheckoutSessionRequest,
    },
};
use tracing::{error, info};
use uuid::Uuid;

use super::{
    errors::{BillingError, UseCaseResult},
    identity_resolver::IdentityResolver,
    payment_gateway::PaymentGateway,
};

/// Provider-hosted checkout and billing-portal redirects.
pub struct BillingSessionUseCase<C, G>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    identity: Arc<IdentityResolver<C, G>>,
    gateway: Arc<G>,
    catalog: PlanCatalog,
    retry_policy: RetryPolicy,
}

impl<C, G> BillingSessionUseCase<C, G>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        identity: Arc<IdentityResolver<C, G>>,
        gateway: Arc<G>,
        catalog: PlanCatalog,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            identity,
            gateway,
            catalog,
            retry_policy,
        }
    }

    pub async fn create_checkout_session(
        &self,
        account_id: Uuid,
        email: Option<&str>,
        plan: &str,
    ) -> UseCaseResult<String> {
        let price_id = self.catalog.checkout_price_id(plan).ok_or_else(|| {
            BillingError::InvalidRequest(format!("unknown plan: {}", plan.trim()))
        })?;

        let customer_id = self.identity.ensure(account_id, email).await?;
        let request = CheckoutSessionRequest {
            price_id: price_id.clone(),
            customer_id: customer_id.clone(),
            account_id,
        };

        // Not retried: every call opens a new provider session.
        let url = self
            .gateway
            .create_checkout_session(request)
            .await
            .map_err(|err| {
                error!(%account_id, customer_id = %customer_id, price_id = %price_id, error = %err, "billing sessions: checkout creation failed");
                BillingError::from(err)
            })?;

        info!(%account_id, customer_id = %customer_id, price_id = %price_id, "billing sessions: checkout session created");
        Ok(url)
    }

    pub async fn create_portal_session(
        &self,
        account_id: Uuid,
        email: Option<&str>,
    ) -> UseCaseResult<String> {
        let customer_id = self.identity.ensure(account_id, email).await?;

        let url = with_backoff(&self.retry_policy, "create_portal_session", || {
            self.gateway.create_portal_session(&customer_id)
        })
        .await
        .map_err(|err| {
            error!(%account_id, customer_id = %customer_id, error = %err, "billing sessions: portal creation failed");
            BillingError::from(err)
        })?;

        info!(%account_id, customer_id = %customer_id, "billing sessions: portal session created");
        Ok(url)
    }
}
