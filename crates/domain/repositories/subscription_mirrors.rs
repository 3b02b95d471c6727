use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::subscription_mirrors::SubscriptionMirrorEntity;

/// Local mirror of provider subscription state, keyed by provider customer id.
#[automock]
#[async_trait]
pub trait SubscriptionMirrorRepository {
    async fn find_by_customer_ref(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>>;

    /// Full-record replace keyed by `provider_customer_id`, applied only when the
    /// stored row does not come from a later provider read (`last_synced_at`).
    /// Returns whichever row is stored afterwards.
    async fn upsert(&self, mirror: SubscriptionMirrorEntity) -> Result<SubscriptionMirrorEntity>;

    /// Records that the provider no longer has `provider_subscription_id`. The row is
    /// kept with status `canceled` for support history, and only touched while it still
    /// points at that subscription.
    async fn mark_subscription_removed(
        &self,
        provider_customer_id: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>>;
}
