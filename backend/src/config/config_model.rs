use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub supabase: Supabase,
    pub stripe: Stripe,
    pub billing: Billing,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct Supabase {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base_url: String,
    pub webhook_tolerance_secs: i64,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

#[derive(Debug, Clone)]
pub struct Billing {
    pub monthly_price_ids: Vec<String>,
    pub yearly_price_ids: Vec<String>,
    pub override_emails: Vec<String>,
    pub mirror_max_age_secs: i64,
    pub internal_replay_token: Option<String>,
}
