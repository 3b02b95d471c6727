use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::{
    domain::value_objects::{
        enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionSnapshot,
    },
    infra::db::postgres::schema::subscription_mirrors,
};

/// Last-known subscription state for one provider customer.
///
/// Rows are only ever written whole: `status` and `cancel_at_period_end` always come
/// from the same provider read. `None` columns are written as NULL on upsert so an
/// older value can never survive a newer read.
#[derive(
    Debug, Clone, PartialEq, Serialize, Identifiable, Selectable, Queryable, Insertable, AsChangeset,
)]
#[diesel(
    table_name = subscription_mirrors,
    primary_key(provider_customer_id),
    treat_none_as_null = true
)]
pub struct SubscriptionMirrorEntity {
    pub provider_customer_id: String,
    pub provider_subscription_id: Option<String>,
    pub status: String,
    pub plan_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl SubscriptionMirrorEntity {
    pub fn from_snapshot(snapshot: &SubscriptionSnapshot, synced_at: DateTime<Utc>) -> Self {
        Self {
            provider_customer_id: snapshot.customer_id.clone(),
            provider_subscription_id: Some(snapshot.subscription_id.clone()),
            status: snapshot.status.to_string(),
            plan_id: snapshot.plan_id.clone(),
            current_period_start: snapshot.current_period_start,
            current_period_end: snapshot.current_period_end,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            last_synced_at: synced_at,
        }
    }

    /// Row for a customer the provider reports no subscription for at all.
    pub fn not_started(provider_customer_id: &str, synced_at: DateTime<Utc>) -> Self {
        Self {
            provider_customer_id: provider_customer_id.to_string(),
            provider_subscription_id: None,
            status: SubscriptionStatus::NotStarted.to_string(),
            plan_id: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            last_synced_at: synced_at,
        }
    }

    pub fn subscription_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }
}
