use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::domain::value_objects::{
    enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionSnapshot,
};

use super::provider_error::{ProviderError, ProviderErrorKind};

pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct StripeClientConfig {
    pub secret_key: String,
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base_url: String,
    success_url: String,
    cancel_url: String,
    portal_return_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StripeExpandable {
    Id(String),
    Object { id: String },
}

impl StripeExpandable {
    pub fn id(&self) -> &str {
        match self {
            StripeExpandable::Id(id) => id,
            StripeExpandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: StripeExpandable,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub created: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub billing_cycle_anchor: Option<i64>,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub price: Option<StripePrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub customer_id: String,
    pub account_id: Uuid,
}

impl StripeSubscription {
    /// Returns the subscription period start timestamp, falling back to the first item
    /// or the billing cycle anchor when the top-level field is absent.
    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| {
                self.items
                    .data
                    .first()
                    .and_then(|item| item.current_period_start)
            })
            .or(self.billing_cycle_anchor)
    }

    /// Returns the subscription period end timestamp, falling back to the first item when needed.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_end)
        })
    }

    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    pub fn to_snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: self.id.clone(),
            customer_id: self.customer.id().to_string(),
            status: SubscriptionStatus::from_str(&self.status),
            plan_id: self.price_id().map(str::to_string),
            current_period_start: self.period_start().and_then(ts_to_datetime),
            current_period_end: self.period_end().and_then(ts_to_datetime),
            cancel_at_period_end: self.cancel_at_period_end,
            created_at: self.created.and_then(ts_to_datetime),
            metadata: self.metadata.clone(),
        }
    }
}

pub fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

impl StripeClient {
    pub fn new(config: StripeClientConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ProviderError::new(ProviderErrorKind::Connect, err.to_string()))?;

        Ok(Self {
            http,
            secret_key: config.secret_key,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            success_url: config.success_url,
            cancel_url: config.cancel_url,
            portal_return_url: config.portal_return_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (stripe_error_type, stripe_error_code, stripe_error_param, stripe_error_message) =
            match serde_json::from_str::<StripeErrorEnvelope>(&body) {
                Ok(envelope) => {
                    let details = envelope.error;
                    (details.type_, details.code, details.param, details.message)
                }
                Err(_) => (None, None, None, None),
            };

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?stripe_error_type,
            stripe_error_code = ?stripe_error_code,
            stripe_error_param = ?stripe_error_param,
            stripe_error_message = ?stripe_error_message,
            context = %context,
            "stripe api request failed"
        );

        Err(ProviderError::from_status(
            status.as_u16(),
            format!(
                "{} failed with status {} (request_id={:?})",
                context, status, request_id
            ),
        ))
    }

    /// Creates a Stripe customer for the account. The idempotency key is derived from
    /// the account so concurrent first purchases get the same customer back.
    pub async fn create_customer(
        &self,
        email: &str,
        account_id: Uuid,
    ) -> Result<String, ProviderError> {
        // https://stripe.com/docs/api/customers/create
        let body = [
            ("email", email.to_string()),
            ("metadata[account_id]", account_id.to_string()),
        ];

        let resp = self
            .http
            .post(self.url("/v1/customers"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("Idempotency-Key", format!("customer-create-{}", account_id))
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Creates a subscription-mode Checkout Session and returns its URL.
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<String, ProviderError> {
        // https://stripe.com/docs/api/checkout/sessions/create
        let account_id = request.account_id.to_string();
        let body: Vec<(&str, String)> = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", request.price_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("customer", request.customer_id.clone()),
            ("client_reference_id", account_id.clone()),
            ("metadata[account_id]", account_id.clone()),
            ("subscription_data[metadata][account_id]", account_id),
        ];

        let resp = self
            .http
            .post(self.url("/v1/checkout/sessions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        #[derive(Deserialize)]
        struct CheckoutResp {
            url: Option<String>,
        }

        let parsed: CheckoutResp = resp.json().await?;
        parsed.url.ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Decode,
                "Stripe Checkout session URL is missing",
            )
        })
    }

    /// Creates a customer billing-portal session and returns its URL.
    pub async fn create_portal_session(&self, customer_id: &str) -> Result<String, ProviderError> {
        // https://stripe.com/docs/api/customer_portal/sessions/create
        let body = [
            ("customer", customer_id.to_string()),
            ("return_url", self.portal_return_url.clone()),
        ];

        let resp = self
            .http
            .post(self.url("/v1/billing_portal/sessions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create portal session").await?;

        #[derive(Deserialize)]
        struct PortalResp {
            url: String,
        }

        let parsed: PortalResp = resp.json().await?;
        Ok(parsed.url)
    }

    pub async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, ProviderError> {
        // https://stripe.com/docs/api/subscriptions/retrieve
        let resp = self
            .http
            .get(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;

        let subscription: StripeSubscription = resp.json().await?;
        Ok(subscription)
    }

    /// Lists every subscription of a customer, newest first, including canceled ones.
    pub async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripeSubscription>, ProviderError> {
        // https://stripe.com/docs/api/subscriptions/list
        let resp = self
            .http
            .get(self.url("/v1/subscriptions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .query(&[
                ("customer", customer_id),
                ("status", "all"),
                ("limit", "100"),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list subscriptions").await?;

        let list: StripeList<StripeSubscription> = resp.json().await?;
        let mut subscriptions = list.data;
        subscriptions.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(subscriptions)
    }

    pub fn parse_event(payload: &[u8]) -> Result<StripeEvent, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
