use std::env;

use tracing::Level;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServiceIdentity {
    pub(crate) service: String,
    pub(crate) stage: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DiscordAlertConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

/// Alerting settings read from the environment.
#[derive(Debug, Clone)]
pub(crate) struct AlertConfig {
    pub(crate) identity: ServiceIdentity,
    pub(crate) discord: Option<DiscordAlertConfig>,
    /// Logged once tracing is up.
    pub(crate) warnings: Vec<String>,
}

impl AlertConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(component: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let component = component.trim().to_string();

        let identity = ServiceIdentity {
            service: read("SERVICE_NAME").unwrap_or_else(|| component.clone()),
            stage: read("STAGE").unwrap_or_else(|| "unknown".to_string()),
            component,
        };

        let mut warnings = Vec::new();
        let enabled = match read("DISCORD_NOTIFY_ENABLED") {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "DISCORD_NOTIFY_ENABLED is not a boolean (value: {raw}); keeping alerts enabled"
                ));
                true
            }),
            None => true,
        };

        let webhook_url = match read("DISCORD_WEBHOOK_URL") {
            Some(raw) if enabled => match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    // The raw URL embeds the webhook token.
                    warnings.push(format!(
                        "DISCORD_WEBHOOK_URL is invalid; billing alerts disabled (parse error: {err})"
                    ));
                    None
                }
            },
            _ => None,
        };

        let discord = webhook_url.map(|webhook_url| {
            let min_level = match read("DISCORD_NOTIFY_LEVEL") {
                Some(raw) => parse_level(&raw).unwrap_or_else(|| {
                    warnings.push(format!(
                        "DISCORD_NOTIFY_LEVEL is invalid (value: {raw}); defaulting to ERROR"
                    ));
                    Level::ERROR
                }),
                None => Level::ERROR,
            };
            DiscordAlertConfig {
                webhook_url,
                min_level,
            }
        });

        Self {
            identity,
            discord,
            warnings,
        }
    }
}

fn parse_level(input: &str) -> Option<Level> {
    match input.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
