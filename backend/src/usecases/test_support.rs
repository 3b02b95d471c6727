//! In-memory stand-ins for the store and the provider, used where a test asserts on
//! the state left behind by many writes rather than on individual calls.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use async_trait::async_trait;
use billing_sync::{
    domain::{
        entities::subscription_mirrors::SubscriptionMirrorEntity,
        repositories::{
            payment_provider_customers::PaymentProviderCustomerRepository,
            subscription_mirrors::SubscriptionMirrorRepository,
        },
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionSnapshot,
        },
    },
    payments::{provider_error::ProviderError, retry::RetryPolicy, stripe_client::CheckoutSessionRequest},
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::payment_gateway::PaymentGateway;

pub fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
    }
}

pub fn snapshot(
    subscription_id: &str,
    customer_id: &str,
    status: SubscriptionStatus,
    cancel_at_period_end: bool,
) -> SubscriptionSnapshot {
    let now = Utc::now();
    SubscriptionSnapshot {
        subscription_id: subscription_id.to_string(),
        customer_id: customer_id.to_string(),
        status,
        plan_id: Some("price_month".to_string()),
        current_period_start: Some(now - Duration::days(3)),
        current_period_end: Some(now + Duration::days(27)),
        cancel_at_period_end,
        created_at: Some(now - Duration::days(3)),
        metadata: HashMap::new(),
    }
}

pub fn mirror_row(
    customer_id: &str,
    status: SubscriptionStatus,
    cancel_at_period_end: bool,
    synced_at: DateTime<Utc>,
) -> SubscriptionMirrorEntity {
    SubscriptionMirrorEntity::from_snapshot(
        &snapshot("sub_1", customer_id, status, cancel_at_period_end),
        synced_at,
    )
}

#[derive(Default)]
pub struct InMemoryMirror {
    rows: Mutex<HashMap<String, SubscriptionMirrorEntity>>,
    pub writes: AtomicUsize,
}

impl InMemoryMirror {
    pub fn with_row(row: SubscriptionMirrorEntity) -> Self {
        let mirror = Self::default();
        mirror
            .rows
            .lock()
            .unwrap()
            .insert(row.provider_customer_id.clone(), row);
        mirror
    }

    pub fn get(&self, customer_id: &str) -> Option<SubscriptionMirrorEntity> {
        self.rows.lock().unwrap().get(customer_id).cloned()
    }
}

#[async_trait]
impl SubscriptionMirrorRepository for InMemoryMirror {
    async fn find_by_customer_ref(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>> {
        Ok(self.get(provider_customer_id))
    }

    async fn upsert(&self, mirror: SubscriptionMirrorEntity) -> Result<SubscriptionMirrorEntity> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(current) = rows.get(&mirror.provider_customer_id) {
            if current.last_synced_at > mirror.last_synced_at {
                return Ok(current.clone());
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        rows.insert(mirror.provider_customer_id.clone(), mirror.clone());
        Ok(mirror)
    }

    async fn mark_subscription_removed(
        &self,
        provider_customer_id: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(provider_customer_id) else {
            return Ok(None);
        };
        if row.provider_subscription_id.as_deref() != Some(provider_subscription_id) {
            return Ok(None);
        }
        row.status = SubscriptionStatus::Canceled.to_string();
        row.cancel_at_period_end = false;
        row.last_synced_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(row.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryCustomers {
    by_account: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryCustomers {
    pub fn with_mapping(account_id: Uuid, customer_id: &str) -> Self {
        let customers = Self::default();
        customers
            .by_account
            .lock()
            .unwrap()
            .insert(account_id, customer_id.to_string());
        customers
    }

    pub fn customer_for(&self, account_id: Uuid) -> Option<String> {
        self.by_account.lock().unwrap().get(&account_id).cloned()
    }
}

#[async_trait]
impl PaymentProviderCustomerRepository for InMemoryCustomers {
    async fn find_customer_ref_by_user_id(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.customer_for(user_id))
    }

    async fn find_user_id_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Uuid>> {
        Ok(self
            .by_account
            .lock()
            .unwrap()
            .iter()
            .find(|(_, customer)| customer.as_str() == customer_ref)
            .map(|(account, _)| *account))
    }

    async fn insert_customer_ref_if_absent(
        &self,
        user_id: Uuid,
        customer_ref: &str,
        _email: Option<String>,
    ) -> Result<String> {
        let mut by_account = self.by_account.lock().unwrap();
        Ok(by_account
            .entry(user_id)
            .or_insert_with(|| customer_ref.to_string())
            .clone())
    }
}

/// Provider whose subscriptions can be changed between calls.
#[derive(Default)]
pub struct FakeProvider {
    subscriptions: Mutex<HashMap<String, SubscriptionSnapshot>>,
    unavailable: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn put(&self, snapshot: SubscriptionSnapshot) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(snapshot.subscription_id.clone(), snapshot);
    }

    pub fn remove(&self, subscription_id: &str) {
        self.subscriptions.lock().unwrap().remove(subscription_id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.unavailable.lock().unwrap() {
            return Err(ProviderError::timeout("provider request timed out"));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeProvider {
    async fn create_customer(&self, _email: &str, account_id: Uuid) -> Result<String, ProviderError> {
        self.check_available()?;
        Ok(format!("cus_{}", account_id.simple()))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionSnapshot, ProviderError> {
        self.check_available()?;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("no such subscription: {subscription_id}")))
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionSnapshot>, ProviderError> {
        self.check_available()?;
        let mut found: Vec<SubscriptionSnapshot> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.customer_id == customer_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<String, ProviderError> {
        self.check_available()?;
        Ok(format!("https://checkout.example.com/{}", request.price_id))
    }

    async fn create_portal_session(&self, customer_id: &str) -> Result<String, ProviderError> {
        self.check_available()?;
        Ok(format!("https://portal.example.com/{customer_id}"))
    }
}
