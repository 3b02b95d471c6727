pub mod payment_provider_customers;
pub mod subscription_mirrors;
