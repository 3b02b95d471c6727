use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    Unpaid,
    Canceled,
    #[default]
    NotStarted,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::NotStarted => "not_started",
        };
        write!(f, "{}", status)
    }
}

impl SubscriptionStatus {
    /// Maps both our stored values and the provider's raw status strings.
    ///
    /// `incomplete_expired` never becomes payable again, so it is folded into
    /// `canceled`; `paused` collects no payment and grants no access, like `unpaid`.
    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "incomplete" => SubscriptionStatus::Incomplete,
            "unpaid" | "paused" => SubscriptionStatus::Unpaid,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            "not_started" => SubscriptionStatus::NotStarted,
            _ => SubscriptionStatus::Unpaid,
        }
    }

    /// Statuses that grant paid access. `past_due` stays entitled while the provider
    /// retries collection.
    ///
    /// The same set drives both lazy-pull selection and the entitlement check.
    pub fn is_entitling(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }

    /// `incomplete` means the first payment is still being confirmed; the mirror
    /// answer for it is worth re-checking before reporting.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SubscriptionStatus::Incomplete)
    }
}
