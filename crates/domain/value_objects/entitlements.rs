use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::domain::{
    entities::subscription_mirrors::SubscriptionMirrorEntity,
    value_objects::{
        enums::{plan_tiers::PlanTier, subscription_statuses::SubscriptionStatus},
        plans::PlanCatalog,
    },
};

/// Emails granted entitlement regardless of billing state. Compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideAllowList {
    emails: HashSet<String>,
}

impl OverrideAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|email| email.as_ref().trim().to_ascii_lowercase())
                .filter(|email| !email.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementReason {
    Override,
    NoCustomerRecord,
    Active,
    Trialing,
    GracePeriod,
    CancelAtPeriodEnd,
    Inactive,
    NoSubscription,
    ProviderUnavailable,
}

impl EntitlementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementReason::Override => "override",
            EntitlementReason::NoCustomerRecord => "no_customer_record",
            EntitlementReason::Active => "active",
            EntitlementReason::Trialing => "trialing",
            EntitlementReason::GracePeriod => "grace_period",
            EntitlementReason::CancelAtPeriodEnd => "cancel_at_period_end",
            EntitlementReason::Inactive => "inactive",
            EntitlementReason::NoSubscription => "no_subscription",
            EntitlementReason::ProviderUnavailable => "provider_unavailable",
        }
    }
}

/// Answer to "does this account currently have paid entitlement".
///
/// `active` is `None` only when the answer is unknown (provider unreachable and no
/// mirror to fall back on); callers must not read that as inactive.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementDecision {
    pub active: Option<bool>,
    pub plan: Option<PlanTier>,
    pub renews_at: Option<DateTime<Utc>>,
    pub status: String,
    pub reason: EntitlementReason,
}

impl EntitlementDecision {
    pub fn overridden() -> Self {
        Self {
            active: Some(true),
            plan: None,
            renews_at: Some(override_renewal_date()),
            status: SubscriptionStatus::Active.to_string(),
            reason: EntitlementReason::Override,
        }
    }

    pub fn no_customer_record() -> Self {
        Self {
            active: Some(false),
            plan: None,
            renews_at: None,
            status: SubscriptionStatus::NotStarted.to_string(),
            reason: EntitlementReason::NoCustomerRecord,
        }
    }

    pub fn unknown() -> Self {
        Self {
            active: None,
            plan: None,
            renews_at: None,
            status: "unknown".to_string(),
            reason: EntitlementReason::ProviderUnavailable,
        }
    }

    pub fn from_mirror(mirror: &SubscriptionMirrorEntity, catalog: &PlanCatalog) -> Self {
        let status = mirror.subscription_status();
        let entitled = status.is_entitling() && !mirror.cancel_at_period_end;

        let reason = match status {
            SubscriptionStatus::NotStarted => EntitlementReason::NoSubscription,
            _ if status.is_entitling() && mirror.cancel_at_period_end => {
                EntitlementReason::CancelAtPeriodEnd
            }
            SubscriptionStatus::Active => EntitlementReason::Active,
            SubscriptionStatus::Trialing => EntitlementReason::Trialing,
            SubscriptionStatus::PastDue => EntitlementReason::GracePeriod,
            _ => EntitlementReason::Inactive,
        };

        let plan = mirror
            .plan_id
            .as_deref()
            .filter(|_| entitled)
            .map(|plan_id| catalog.classify(plan_id));

        Self {
            active: Some(entitled),
            plan,
            renews_at: mirror.current_period_end.filter(|_| entitled),
            status: status.to_string(),
            reason,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }
}

fn override_renewal_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
