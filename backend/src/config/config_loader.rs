use std::{str::FromStr, time::Duration};

use billing_sync::{
    infra::db::postgres::postgres_connection::DEFAULT_MAX_CONNECTIONS,
    payments::{stripe_client::DEFAULT_API_BASE_URL, webhook_signature::DEFAULT_TOLERANCE_SECS},
};
use thiserror::Error;

use super::config_model::{BackendServer, Billing, Database, DotEnvyConfig, Stripe, Supabase};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("{0} is missing")]
    Missing(&'static str),
    #[error("{key} is invalid: {value}")]
    Invalid { key: &'static str, value: String },
}

pub fn load() -> Result<DotEnvyConfig, ConfigurationError> {
    load_from(|key| std::env::var(key).ok())
}

/// Builds the configuration from any key lookup. Empty values count as missing.
pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    let backend_server = BackendServer {
        port: env.parsed("SERVER_PORT_BACKEND")?,
        body_limit: env.parsed("SERVER_BODY_LIMIT")?,
        timeout: env.parsed("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: env.required("DATABASE_URL")?,
        max_connections: env.parsed_or("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
    };

    let supabase = Supabase {
        jwt_secret: env.required("SUPABASE_JWT_SECRET")?,
    };

    let stripe = Stripe {
        secret_key: env.required("STRIPE_SECRET_KEY")?,
        webhook_secret: env.required("STRIPE_WEBHOOK_SECRET")?,
        api_base_url: env
            .optional("STRIPE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        webhook_tolerance_secs: env.parsed_or("STRIPE_WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE_SECS)?,
        request_timeout: Duration::from_secs(env.parsed_or("STRIPE_REQUEST_TIMEOUT_SECS", 10)?),
        max_retries: env.parsed_or("STRIPE_MAX_RETRIES", 3)?,
        backoff_base_ms: env.parsed_or("STRIPE_BACKOFF_BASE_MS", 200)?,
        backoff_max_ms: env.parsed_or("STRIPE_BACKOFF_MAX_MS", 2_000)?,
        success_url: env.required("CHECKOUT_SUCCESS_URL")?,
        cancel_url: env.required("CHECKOUT_CANCEL_URL")?,
        portal_return_url: env.required("BILLING_PORTAL_RETURN_URL")?,
    };

    let billing = Billing {
        monthly_price_ids: env.list("BILLING_MONTHLY_PRICE_IDS"),
        yearly_price_ids: env.list("BILLING_YEARLY_PRICE_IDS"),
        override_emails: env.list("ENTITLEMENT_OVERRIDE_EMAILS"),
        mirror_max_age_secs: env.parsed_or("MIRROR_MAX_AGE_SECS", 86_400)?,
        internal_replay_token: env.optional("INTERNAL_REPLAY_TOKEN"),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        supabase,
        stripe,
        billing,
    })
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigurationError> {
        self.optional(key).ok_or(ConfigurationError::Missing(key))
    }

    fn parsed<T: FromStr>(&self, key: &'static str) -> Result<T, ConfigurationError> {
        let raw = self.required(key)?;
        raw.parse()
            .map_err(|_| ConfigurationError::Invalid { key, value: raw })
    }

    fn parsed_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigurationError> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigurationError::Invalid { key, value: raw }),
            None => Ok(default),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
