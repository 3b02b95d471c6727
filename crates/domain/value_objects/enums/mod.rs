pub mod plan_tiers;
pub mod subscription_statuses;
