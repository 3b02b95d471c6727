use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use url::Url;

use super::notifier::{AlertEvent, AlertSink};

const DISCORD_CONTENT_LIMIT: usize = 2000;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Fields an operator needs to replay a failed billing event, shown first.
const REPLAY_FIELDS: [&str; 5] = [
    "event_id",
    "event_kind",
    "customer_id",
    "account_id",
    "subscription_id",
];

pub(crate) struct DiscordAlertSink {
    webhook_url: Url,
    client: Client,
}

impl DiscordAlertSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|_| anyhow!("failed to build discord http client"))?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn render(event: &AlertEvent) -> String {
    let mut lines = vec![format!(
        "**{}** `{}` `{}` `{}`",
        event.service,
        event.stage,
        event.component,
        event.level.as_str()
    )];

    let mut origin = format!(
        "`{}` `{}`",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.target
    );
    if let Some(location) = &event.location {
        origin.push_str(&format!(" `{location}`"));
    }
    lines.push(origin);

    if let Some(message) = event.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(format!("> {message}"));
    }

    let replay: Vec<String> = REPLAY_FIELDS
        .iter()
        .filter_map(|name| event.field(name).map(|value| format!("{name}=`{value}`")))
        .collect();
    if !replay.is_empty() {
        lines.push(format!("replay: {}", replay.join(" ")));
    }

    let extra: Vec<String> = event
        .fields
        .iter()
        .filter(|(name, _)| !REPLAY_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| format!("- `{name}` = `{value}`"))
        .collect();
    if !extra.is_empty() {
        lines.push("fields:".to_string());
        lines.extend(extra);
    }

    if !event.spans.is_empty() {
        let chain = event
            .spans
            .iter()
            .map(|span| span.name.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        lines.push(format!("spans: `{chain}`"));
    }

    truncate(lines.join("\n"), DISCORD_CONTENT_LIMIT)
}

fn truncate(content: String, limit: usize) -> String {
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= limit {
        return content;
    }

    let keep = limit.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(keep).collect();
    truncated.push_str(SUFFIX);
    truncated
}

#[async_trait]
impl AlertSink for DiscordAlertSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": render(event) }))
            .send()
            .await
            .map_err(|err| {
                // reqwest errors carry the URL, which embeds the webhook token.
                if err.is_timeout() {
                    anyhow!("discord webhook request timed out")
                } else if err.is_connect() {
                    anyhow!("discord webhook connection failed")
                } else {
                    anyhow!("discord webhook request failed")
                }
            })?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "discord webhook returned status {}",
                response.status()
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}
