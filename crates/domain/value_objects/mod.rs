pub mod entitlements;
pub mod enums;
pub mod payment_events;
pub mod plans;
pub mod subscriptions;
