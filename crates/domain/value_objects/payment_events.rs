use std::fmt::Display;

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    CheckoutCompleted,
    SubscriptionChanged(String),
    InvoicePaid,
    InvoicePaymentFailed,
    Other(String),
}

impl PaymentEventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => PaymentEventKind::CheckoutCompleted,
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted"
            | "customer.subscription.paused"
            | "customer.subscription.resumed" => {
                PaymentEventKind::SubscriptionChanged(event_type.to_string())
            }
            "invoice.paid" | "invoice.payment_succeeded" => PaymentEventKind::InvoicePaid,
            "invoice.payment_failed" => PaymentEventKind::InvoicePaymentFailed,
            other => PaymentEventKind::Other(other.to_string()),
        }
    }
}

impl Display for PaymentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentEventKind::CheckoutCompleted => write!(f, "checkout.session.completed"),
            PaymentEventKind::SubscriptionChanged(raw) => write!(f, "{}", raw),
            PaymentEventKind::InvoicePaid => write!(f, "invoice.paid"),
            PaymentEventKind::InvoicePaymentFailed => write!(f, "invoice.payment_failed"),
            PaymentEventKind::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A verified provider notification. Transient: never persisted.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub event_id: String,
    pub kind: PaymentEventKind,
    pub payload: Value,
}

impl PaymentEvent {
    /// Provider customer named by the payload object, expanded or not.
    pub fn customer_id(&self) -> Option<String> {
        id_or_expanded(self.payload.get("customer"))
    }

    /// Subscription the event is about. Subscription events carry it as the object
    /// id; checkout sessions and invoices reference it.
    pub fn subscription_id(&self) -> Option<String> {
        match self.kind {
            PaymentEventKind::SubscriptionChanged(_) => self
                .payload
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => id_or_expanded(self.payload.get("subscription")).or_else(|| {
                id_or_expanded(
                    self.payload
                        .pointer("/parent/subscription_details/subscription"),
                )
            }),
        }
    }

    /// Local account the checkout was started for.
    pub fn account_id_hint(&self) -> Option<Uuid> {
        self.payload
            .pointer("/metadata/account_id")
            .and_then(Value::as_str)
            .or_else(|| self.payload.get("client_reference_id").and_then(Value::as_str))
            .and_then(|value| Uuid::parse_str(value).ok())
    }

    pub fn checkout_mode(&self) -> Option<&str> {
        self.payload.get("mode").and_then(Value::as_str)
    }
}

fn id_or_expanded(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(object) => object.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
