use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{Level, warn};

const QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub(crate) struct SpanSummary {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, String>,
}

/// A log event captured for forwarding to an alert sink.
#[derive(Clone, Debug)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service: String,
    pub(crate) stage: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) location: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<SpanSummary>,
}

impl AlertEvent {
    /// Looks a field up on the event first, then on the innermost span carrying it.
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .or_else(|| self.spans.iter().rev().find_map(|span| span.fields.get(name)))
            .map(String::as_str)
    }
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Non-blocking fan-out to alert sinks through a bounded queue.
#[derive(Clone)]
pub(crate) struct AlertDispatcher {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub(crate) fn spawn(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(error) = sink.deliver(&event).await {
                        warn!(sink = sink.name(), error = %error, "alert delivery failed");
                    }
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn enqueue(&self, event: AlertEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            warn!(reason, "alert queue unavailable; dropping alert");
        }
    }
}
