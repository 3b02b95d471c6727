pub mod billing_sessions;
pub mod billing_webhook;
pub mod entitlements;
pub mod errors;
pub mod identity_resolver;
pub mod payment_gateway;
pub mod reconciliation;

#[cfg(test)]
pub(crate) mod test_support;
