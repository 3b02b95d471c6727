use async_trait::async_trait;
use billing_sync::{
    domain::value_objects::subscriptions::SubscriptionSnapshot,
    payments::{
        provider_error::ProviderError,
        stripe_client::{CheckoutSessionRequest, StripeClient},
    },
};
use uuid::Uuid;

/// Outbound calls to the payment provider used by the billing use cases.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, email: &str, account_id: Uuid) -> Result<String, ProviderError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionSnapshot, ProviderError>;

    /// Every subscription of the customer, newest first.
    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionSnapshot>, ProviderError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<String, ProviderError>;

    async fn create_portal_session(&self, customer_id: &str) -> Result<String, ProviderError>;
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_customer(&self, email: &str, account_id: Uuid) -> Result<String, ProviderError> {
        StripeClient::create_customer(self, email, account_id).await
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionSnapshot, ProviderError> {
        let subscription = StripeClient::retrieve_subscription(self, subscription_id).await?;
        Ok(subscription.to_snapshot())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionSnapshot>, ProviderError> {
        let subscriptions = StripeClient::list_subscriptions(self, customer_id).await?;
        Ok(subscriptions.iter().map(|s| s.to_snapshot()).collect())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<String, ProviderError> {
        StripeClient::create_checkout_session(self, &request).await
    }

    async fn create_portal_session(&self, customer_id: &str) -> Result<String, ProviderError> {
        StripeClient::create_portal_session(self, customer_id).await
    }
}
