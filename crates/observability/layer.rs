use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::config::ServiceIdentity;
use super::notifier::{AlertDispatcher, AlertEvent, SpanSummary};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_MARKERS: [&str; 7] = [
    "secret",
    "token",
    "password",
    "authorization",
    "signature",
    "email",
    "webhook",
];

/// Forwards events at or above `min_level` to the alert dispatcher.
pub(crate) struct AlertLayer {
    dispatcher: AlertDispatcher,
    identity: ServiceIdentity,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(dispatcher: AlertDispatcher, identity: ServiceIdentity, min_level: Level) -> Self {
        Self {
            dispatcher,
            identity,
            min_level,
        }
    }
}

#[derive(Default)]
struct RedactingVisitor {
    values: BTreeMap<String, String>,
}

impl RedactingVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        let name = field.name();
        let value = if is_sensitive(name) {
            REDACTED.to_string()
        } else {
            value
        };
        self.values.insert(name.to_string(), value);
    }
}

impl Visit for RedactingVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }
}

struct SpanFields(BTreeMap<String, String>);

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = RedactingVisitor::default();
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.values));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut visitor = RedactingVisitor::default();
        values.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(existing) => existing.0.extend(visitor.values),
            None => extensions.insert(SpanFields(visitor.values)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level {
            return;
        }

        let mut visitor = RedactingVisitor::default();
        event.record(&mut visitor);
        let message = visitor.values.remove("message").map(|raw| unquote(&raw));

        let spans = ctx
            .event_span(event)
            .map(|leaf| {
                leaf.scope()
                    .from_root()
                    .map(|span| SpanSummary {
                        name: span.metadata().name().to_string(),
                        fields: span
                            .extensions()
                            .get::<SpanFields>()
                            .map(|fields| fields.0.clone())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let location = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            _ => None,
        };

        self.dispatcher.enqueue(AlertEvent {
            level: *metadata.level(),
            timestamp: Utc::now(),
            service: self.identity.service.clone(),
            stage: self.identity.stage.clone(),
            component: self.identity.component.clone(),
            target: metadata.target().to_string(),
            location,
            message,
            fields: visitor.values,
            spans,
        });
    }
}

fn unquote(input: &str) -> String {
    let trimmed = input.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

pub(crate) fn is_sensitive(field_name: &str) -> bool {
    let field = field_name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| field.contains(marker))
}
