pub mod provider_error;
pub mod retry;
pub mod stripe_client;
pub mod webhook_signature;
