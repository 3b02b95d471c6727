use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

/// Canonical subscription state as read from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub plan_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl SubscriptionSnapshot {
    /// Counts for lazy-pull selection: entitling status and not winding down.
    pub fn qualifies(&self) -> bool {
        self.status.is_entitling() && !self.cancel_at_period_end
    }

    /// Local account recorded on the subscription at checkout time, if any.
    pub fn account_id_hint(&self) -> Option<Uuid> {
        self.metadata
            .get("account_id")
            .and_then(|value| Uuid::parse_str(value).ok())
    }
}

/// Picks the subscription a customer-level pull should mirror.
///
/// Among qualifying subscriptions the latest `current_period_end` wins (then the most
/// recently created). When none qualifies the most recent subscription is mirrored
/// as-is so its terminal state stays visible; `None` means the customer has never
/// had a subscription.
pub fn select_mirror_candidate(snapshots: &[SubscriptionSnapshot]) -> Option<&SubscriptionSnapshot> {
    let qualifying = snapshots
        .iter()
        .filter(|snapshot| snapshot.qualifies())
        .max_by_key(|snapshot| (snapshot.current_period_end, snapshot.created_at));

    qualifying.or_else(|| snapshots.iter().max_by_key(|snapshot| snapshot.created_at))
}
