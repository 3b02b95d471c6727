use std::sync::Arc;

use billing_sync::{
    domain::{
        entities::subscription_mirrors::SubscriptionMirrorEntity,
        repositories::{
            payment_provider_customers::PaymentProviderCustomerRepository,
            subscription_mirrors::SubscriptionMirrorRepository,
        },
        value_objects::subscriptions::{SubscriptionSnapshot, select_mirror_candidate},
    },
    payments::{
        provider_error::ProviderError,
        retry::{RetryPolicy, with_backoff},
    },
};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::{errors::BillingError, identity_resolver::IdentityResolver, payment_gateway::PaymentGateway};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Retries exhausted or the provider refused the read. Not an answer about state.
    #[error("reconciliation unavailable: {0}")]
    ProviderUnavailable(#[source] ProviderError),
    #[error("mirror store failed: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<ReconcileError> for BillingError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::ProviderUnavailable(err) => BillingError::ProviderUnavailable(err.to_string()),
            ReconcileError::Store(err) => BillingError::Internal(err),
        }
    }
}

/// Re-derives mirror rows from fresh provider reads. Event bodies are never written
/// as-is, so redelivered or reordered events converge on the provider's current state.
pub struct ReconciliationEngine<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    mirror_repo: Arc<M>,
    identity: Arc<IdentityResolver<C, G>>,
    gateway: Arc<G>,
    retry_policy: RetryPolicy,
}

impl<M, C, G> ReconciliationEngine<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        mirror_repo: Arc<M>,
        identity: Arc<IdentityResolver<C, G>>,
        gateway: Arc<G>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            mirror_repo,
            identity,
            gateway,
            retry_policy,
        }
    }

    /// Lazy pull: lists the customer's subscriptions and mirrors the one that
    /// currently matters, or a `not_started` row when there are none.
    pub async fn reconcile_customer(
        &self,
        customer_id: &str,
    ) -> Result<SubscriptionMirrorEntity, ReconcileError> {
        let observed_at = Utc::now();
        let snapshots = with_backoff(&self.retry_policy, "list_subscriptions", || {
            self.gateway.list_subscriptions(customer_id)
        })
        .await
        .map_err(|err| {
            warn!(customer_id, error = %err, "reconcile: listing subscriptions failed");
            ReconcileError::ProviderUnavailable(err)
        })?;

        let mirror = match select_mirror_candidate(&snapshots) {
            Some(snapshot) => {
                self.adopt_identity(snapshot).await;
                let mut mirror = SubscriptionMirrorEntity::from_snapshot(snapshot, observed_at);
                mirror.provider_customer_id = customer_id.to_string();
                mirror
            }
            None => SubscriptionMirrorEntity::not_started(customer_id, observed_at),
        };

        info!(
            customer_id,
            subscription_id = ?mirror.provider_subscription_id,
            status = %mirror.status,
            candidates = snapshots.len(),
            "reconcile: customer pulled"
        );
        self.store(mirror).await
    }

    /// Event-driven: re-fetches one subscription and mirrors it.
    ///
    /// A subscription the provider no longer knows marks the row removed (when the
    /// customer is known). A subscription that does not qualify as the live one is
    /// never written directly; the whole customer is pulled instead, so an event about
    /// an old subscription cannot hide a live one. `Ok(None)` means nothing was written.
    pub async fn reconcile_subscription(
        &self,
        subscription_id: &str,
        customer_hint: Option<&str>,
    ) -> Result<Option<SubscriptionMirrorEntity>, ReconcileError> {
        let observed_at = Utc::now();
        let fetched = with_backoff(&self.retry_policy, "retrieve_subscription", || {
            self.gateway.retrieve_subscription(subscription_id)
        })
        .await;

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_not_found() => return self.mark_removed(subscription_id, customer_hint).await,
            Err(err) => {
                warn!(subscription_id, customer_id = ?customer_hint, error = %err, "reconcile: subscription fetch failed");
                return Err(ReconcileError::ProviderUnavailable(err));
            }
        };

        self.adopt_identity(&snapshot).await;

        if !snapshot.qualifies() {
            info!(
                subscription_id,
                customer_id = %snapshot.customer_id,
                status = %snapshot.status,
                "reconcile: subscription does not qualify; pulling customer"
            );
            return self.reconcile_customer(&snapshot.customer_id).await.map(Some);
        }

        let mirror = SubscriptionMirrorEntity::from_snapshot(&snapshot, observed_at);
        info!(
            subscription_id,
            customer_id = %mirror.provider_customer_id,
            status = %mirror.status,
            cancel_at_period_end = mirror.cancel_at_period_end,
            "reconcile: subscription refreshed"
        );
        self.store(mirror).await.map(Some)
    }

    async fn mark_removed(
        &self,
        subscription_id: &str,
        customer_hint: Option<&str>,
    ) -> Result<Option<SubscriptionMirrorEntity>, ReconcileError> {
        let Some(customer_id) = customer_hint else {
            warn!(subscription_id, "reconcile: subscription gone and no customer known; skipping");
            return Ok(None);
        };

        let removed = self
            .mirror_repo
            .mark_subscription_removed(customer_id, subscription_id)
            .await
            .map_err(|err| {
                error!(customer_id, subscription_id, db_error = ?err, "reconcile: failed to mark subscription removed");
                ReconcileError::Store(err)
            })?;

        info!(
            customer_id,
            subscription_id,
            updated = removed.is_some(),
            "reconcile: subscription no longer exists at provider"
        );
        Ok(removed)
    }

    async fn store(
        &self,
        mirror: SubscriptionMirrorEntity,
    ) -> Result<SubscriptionMirrorEntity, ReconcileError> {
        let customer_id = mirror.provider_customer_id.clone();
        let observed_at = mirror.last_synced_at;
        let stored = self.mirror_repo.upsert(mirror).await.map_err(|err| {
            error!(customer_id = %customer_id, db_error = ?err, "reconcile: mirror upsert failed");
            ReconcileError::Store(err)
        })?;

        if stored.last_synced_at > observed_at {
            info!(
                customer_id = %customer_id,
                kept_subscription_id = ?stored.provider_subscription_id,
                "reconcile: a later provider read already landed; write skipped"
            );
        }
        Ok(stored)
    }

    async fn adopt_identity(&self, snapshot: &SubscriptionSnapshot) {
        let Some(account_id) = snapshot.account_id_hint() else {
            return;
        };
        if let Err(err) = self.identity.link(account_id, &snapshot.customer_id).await {
            warn!(
                %account_id,
                customer_id = %snapshot.customer_id,
                error = %err,
                "reconcile: could not record identity from subscription metadata"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::{
        FakeProvider, InMemoryCustomers, InMemoryMirror, instant_retry, snapshot,
    };
    use billing_sync::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use uuid::Uuid;

    type Engine = ReconciliationEngine<InMemoryMirror, InMemoryCustomers, FakeProvider>;

    struct Harness {
        mirror: Arc<InMemoryMirror>,
        customers: Arc<InMemoryCustomers>,
        provider: Arc<FakeProvider>,
        engine: Engine,
    }

    fn harness(mirror: InMemoryMirror) -> Harness {
        let mirror = Arc::new(mirror);
        let customers = Arc::new(InMemoryCustomers::default());
        let provider = Arc::new(FakeProvider::default());
        let identity = Arc::new(IdentityResolver::new(
            Arc::clone(&customers),
            Arc::clone(&provider),
            instant_retry(),
        ));
        let engine = ReconciliationEngine::new(
            Arc::clone(&mirror),
            identity,
            Arc::clone(&provider),
            instant_retry(),
        );
        Harness {
            mirror,
            customers,
            provider,
            engine,
        }
    }

    #[tokio::test]
    async fn duplicate_and_reordered_events_converge_on_provider_state() {
        let h = harness(InMemoryMirror::default());
        h.provider
            .put(snapshot("sub_1", "cus_1", SubscriptionStatus::Active, false));

        h.engine.reconcile_subscription("sub_1", Some("cus_1")).await.unwrap();

        h.provider
            .put(snapshot("sub_1", "cus_1", SubscriptionStatus::PastDue, true));
        for _ in 0..3 {
            h.engine.reconcile_subscription("sub_1", Some("cus_1")).await.unwrap();
        }

        let row = h.mirror.get("cus_1").unwrap();
        assert_eq!(row.status, "past_due");
        assert!(row.cancel_at_period_end);
    }

    /// Parks the first upsert until released, so a test can land another write
    /// between a provider read and the store.
    #[derive(Default)]
    struct GatedMirror {
        inner: InMemoryMirror,
        armed: AtomicBool,
        parked: Notify,
        release: Notify,
    }

    impl GatedMirror {
        fn armed() -> Self {
            let mirror = Self::default();
            mirror.armed.store(true, Ordering::SeqCst);
            mirror
        }
    }

    #[async_trait]
    impl SubscriptionMirrorRepository for GatedMirror {
        async fn find_by_customer_ref(
            &self,
            provider_customer_id: &str,
        ) -> anyhow::Result<Option<SubscriptionMirrorEntity>> {
            self.inner.find_by_customer_ref(provider_customer_id).await
        }

        async fn upsert(
            &self,
            mirror: SubscriptionMirrorEntity,
        ) -> anyhow::Result<SubscriptionMirrorEntity> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.release.notified().await;
            }
            self.inner.upsert(mirror).await
        }

        async fn mark_subscription_removed(
            &self,
            provider_customer_id: &str,
            provider_subscription_id: &str,
        ) -> anyhow::Result<Option<SubscriptionMirrorEntity>> {
            self.inner
                .mark_subscription_removed(provider_customer_id, provider_subscription_id)
                .await
        }
    }

    #[tokio::test]
    async fn late_write_for_canceled_subscription_cannot_replace_live_one() {
        let mirror = Arc::new(GatedMirror::armed());
        let provider = Arc::new(FakeProvider::default());
        let identity = Arc::new(IdentityResolver::new(
            Arc::new(InMemoryCustomers::default()),
            Arc::clone(&provider),
            instant_retry(),
        ));
        let engine = ReconciliationEngine::new(
            Arc::clone(&mirror),
            identity,
            Arc::clone(&provider),
            instant_retry(),
        );
        provider.put(snapshot("sub_old", "cus_r", SubscriptionStatus::Canceled, false));

        let late = engine.reconcile_subscription("sub_old", Some("cus_r"));
        let live = async {
            mirror.parked.notified().await;
            provider.put(snapshot("sub_new", "cus_r", SubscriptionStatus::Active, false));
            let written = engine.reconcile_subscription("sub_new", Some("cus_r")).await;
            mirror.release.notify_one();
            written
        };
        let (late, live) = tokio::join!(late, live);

        let live = live.unwrap().unwrap();
        assert_eq!(live.provider_subscription_id.as_deref(), Some("sub_new"));
        let kept = late.unwrap().unwrap();
        assert_eq!(kept.provider_subscription_id.as_deref(), Some("sub_new"));

        let row = mirror.inner.get("cus_r").unwrap();
        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(row.status, "active");

        let fresh = engine.reconcile_customer("cus_r").await.unwrap();
        assert_eq!(fresh.provider_subscription_id, row.provider_subscription_id);
        assert_eq!(fresh.status, row.status);
    }

    #[tokio::test]
    async fn late_event_for_canceled_subscription_pulls_customer() {
        let h = harness(InMemoryMirror::default());
        h.provider
            .put(snapshot("sub_old", "cus_3", SubscriptionStatus::Canceled, false));
        h.provider
            .put(snapshot("sub_new", "cus_3", SubscriptionStatus::Active, false));

        let (old, new) = tokio::join!(
            h.engine.reconcile_subscription("sub_old", Some("cus_3")),
            h.engine.reconcile_subscription("sub_new", Some("cus_3")),
        );
        old.unwrap();
        new.unwrap();

        let row = h.mirror.get("cus_3").unwrap();
        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(row.status, "active");
        assert!(!row.cancel_at_period_end);
    }

    #[tokio::test]
    async fn customer_pull_prefers_qualifying_subscription() {
        let h = harness(InMemoryMirror::default());
        let mut old = snapshot("sub_old", "cus_4", SubscriptionStatus::Canceled, false);
        old.created_at = old.created_at.map(|c| c + chrono::Duration::days(1));
        h.provider.put(old);
        h.provider
            .put(snapshot("sub_live", "cus_4", SubscriptionStatus::Active, false));

        let row = h.engine.reconcile_customer("cus_4").await.unwrap();

        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_live"));
        assert_eq!(row.status, "active");
    }

    #[tokio::test]
    async fn customer_without_subscriptions_is_not_started() {
        let h = harness(InMemoryMirror::default());

        let row = h.engine.reconcile_customer("cus_5").await.unwrap();

        assert_eq!(row.status, "not_started");
        assert_eq!(row.provider_subscription_id, None);
    }

    #[tokio::test]
    async fn event_for_old_subscription_does_not_hide_live_one() {
        let h = harness(InMemoryMirror::default());
        h.provider
            .put(snapshot("sub_live", "cus_6", SubscriptionStatus::Active, false));
        h.engine.reconcile_customer("cus_6").await.unwrap();

        h.provider
            .put(snapshot("sub_old", "cus_6", SubscriptionStatus::Canceled, false));
        h.engine.reconcile_subscription("sub_old", Some("cus_6")).await.unwrap();

        let row = h.mirror.get("cus_6").unwrap();
        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_live"));
        assert_eq!(row.status, "active");
    }

    #[tokio::test]
    async fn removed_subscription_marks_row_canceled() {
        let h = harness(InMemoryMirror::default());
        h.provider
            .put(snapshot("sub_7", "cus_7", SubscriptionStatus::Active, false));
        h.engine.reconcile_subscription("sub_7", Some("cus_7")).await.unwrap();

        h.provider.remove("sub_7");
        let removed = h
            .engine
            .reconcile_subscription("sub_7", Some("cus_7"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(removed.status, "canceled");
        assert_eq!(removed.provider_subscription_id.as_deref(), Some("sub_7"));
    }

    #[tokio::test]
    async fn removal_of_unmirrored_subscription_leaves_row_alone() {
        let h = harness(InMemoryMirror::default());
        h.provider
            .put(snapshot("sub_live", "cus_7", SubscriptionStatus::Active, false));
        h.engine.reconcile_customer("cus_7").await.unwrap();
        let before = h.mirror.get("cus_7").unwrap();

        let written = h
            .engine
            .reconcile_subscription("sub_gone", Some("cus_7"))
            .await
            .unwrap();

        assert!(written.is_none());
        assert_eq!(h.mirror.get("cus_7").unwrap(), before);
    }

    #[tokio::test]
    async fn provider_timeout_is_retried_then_reported_unavailable() {
        let h = harness(InMemoryMirror::default());
        h.provider.set_unavailable(true);

        let err = h.engine.reconcile_customer("cus_8").await.unwrap_err();

        assert!(matches!(err, ReconcileError::ProviderUnavailable(_)));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 3);
        assert!(h.mirror.get("cus_8").is_none());
    }

    #[tokio::test]
    async fn subscription_metadata_creates_missing_identity() {
        let h = harness(InMemoryMirror::default());
        let account_id = Uuid::new_v4();
        let mut live = snapshot("sub_9", "cus_9", SubscriptionStatus::Active, false);
        live.metadata
            .insert("account_id".to_string(), account_id.to_string());
        h.provider.put(live);

        h.engine.reconcile_subscription("sub_9", None).await.unwrap();

        assert_eq!(h.customers.customer_for(account_id).as_deref(), Some("cus_9"));
    }
}
