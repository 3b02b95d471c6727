use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Monthly,
    Yearly,
    Unknown,
}

impl Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tier = match self {
            PlanTier::Monthly => "monthly",
            PlanTier::Yearly => "yearly",
            PlanTier::Unknown => "unknown",
        };
        write!(f, "{}", tier)
    }
}

impl PlanTier {
    /// Parses a purchasable tier label. `unknown` is a reporting value only.
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(PlanTier::Monthly),
            "yearly" | "annual" => Some(PlanTier::Yearly),
            _ => None,
        }
    }
}
