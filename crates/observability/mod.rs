mod config;
mod discord;
mod layer;
mod notifier;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use config::AlertConfig;
use discord::DiscordAlertSink;
use layer::AlertLayer;
use notifier::{AlertDispatcher, AlertSink};

/// Installs the global tracing subscriber: fmt output filtered by `RUST_LOG`
/// (default `info`) plus the optional Discord alert layer.
///
/// Must be called from within a tokio runtime when alerts are enabled.
pub fn init_observability(component: &str) -> Result<()> {
    let config = AlertConfig::from_env(component);
    let identity = config.identity.clone();

    let alert_layer = match config.discord.as_ref() {
        Some(discord) => {
            let sink: Arc<dyn AlertSink> = Arc::new(DiscordAlertSink::new(discord.webhook_url.clone())?);
            let dispatcher = AlertDispatcher::spawn(vec![sink]);
            Some(
                AlertLayer::new(dispatcher, identity.clone(), discord.min_level)
                    .with_filter(LevelFilter::from_level(discord.min_level)),
            )
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    for warning in &config.warnings {
        warn!(
            service = %identity.service,
            stage = %identity.stage,
            warning = %warning,
            "observability config warning"
        );
    }

    info!(
        service = %identity.service,
        stage = %identity.stage,
        component = %identity.component,
        alerts_enabled = config.discord.is_some(),
        "observability initialized"
    );

    Ok(())
}
