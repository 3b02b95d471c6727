pub mod billing_replay;
pub mod billing_sessions;
pub mod billing_webhook;
pub mod entitlements;
