use crate::domain::value_objects::enums::plan_tiers::PlanTier;

/// Known provider price ids, grouped by the tier they are sold as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanCatalog {
    monthly_price_ids: Vec<String>,
    yearly_price_ids: Vec<String>,
}

impl PlanCatalog {
    pub fn new(monthly_price_ids: Vec<String>, yearly_price_ids: Vec<String>) -> Self {
        Self {
            monthly_price_ids,
            yearly_price_ids,
        }
    }

    pub fn classify(&self, plan_id: &str) -> PlanTier {
        if self.monthly_price_ids.iter().any(|id| id == plan_id) {
            PlanTier::Monthly
        } else if self.yearly_price_ids.iter().any(|id| id == plan_id) {
            PlanTier::Yearly
        } else {
            PlanTier::Unknown
        }
    }

    /// Resolves a checkout target, given either a tier label (`monthly`/`yearly`) or
    /// one of the configured price ids. The first configured id of a tier is the one
    /// sold for new purchases.
    pub fn checkout_price_id(&self, requested: &str) -> Option<String> {
        let requested = requested.trim();
        if let Some(tier) = PlanTier::from_label(requested) {
            let ids = match tier {
                PlanTier::Monthly => &self.monthly_price_ids,
                PlanTier::Yearly => &self.yearly_price_ids,
                PlanTier::Unknown => return None,
            };
            return ids.first().cloned();
        }

        match self.classify(requested) {
            PlanTier::Unknown => None,
            _ => Some(requested.to_string()),
        }
    }
}
