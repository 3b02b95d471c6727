use std::sync::Arc;

use billing_sync::{
    domain::{
        repositories::{
            payment_provider_customers::PaymentProviderCustomerRepository,
            subscription_mirrors::SubscriptionMirrorRepository,
        },
        value_objects::payment_events::{PaymentEvent, PaymentEventKind},
    },
    payments::{stripe_client::StripeClient, webhook_signature::WebhookSignatureVerifier},
};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{
    errors::{BillingError, UseCaseResult},
    identity_resolver::IdentityResolver,
    payment_gateway::PaymentGateway,
    reconciliation::ReconciliationEngine,
};

/// What a handled event did to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Reconciled,
    NothingToDo,
    Ignored,
}

pub struct BillingWebhookUseCase<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    verifier: WebhookSignatureVerifier,
    identity: Arc<IdentityResolver<C, G>>,
    reconciler: Arc<ReconciliationEngine<M, C, G>>,
}

impl<M, C, G> BillingWebhookUseCase<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        verifier: WebhookSignatureVerifier,
        identity: Arc<IdentityResolver<C, G>>,
        reconciler: Arc<ReconciliationEngine<M, C, G>>,
    ) -> Self {
        Self {
            verifier,
            identity,
            reconciler,
        }
    }

    /// Checks the signature over the raw body, then parses it. Nothing in the payload
    /// is trusted before the signature matches.
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> UseCaseResult<PaymentEvent> {
        let header = signature_header.ok_or_else(|| {
            warn!("billing webhook: missing Stripe-Signature header");
            BillingError::Verification("missing signature header".to_string())
        })?;

        self.verifier
            .verify(payload, header, Utc::now().timestamp())
            .map_err(|err| {
                warn!(error = %err, "billing webhook: signature rejected");
                BillingError::Verification(err.to_string())
            })?;

        let event = StripeClient::parse_event(payload).map_err(|err| {
            warn!(error = %err, "billing webhook: signed payload is not a valid event");
            BillingError::Verification(format!("invalid event payload: {err}"))
        })?;

        Ok(PaymentEvent {
            event_id: event.id.unwrap_or_default(),
            kind: PaymentEventKind::from_type(&event.type_),
            payload: event.data.object,
        })
    }

    pub async fn handle_event(&self, event: &PaymentEvent) -> UseCaseResult<EventOutcome> {
        match &event.kind {
            PaymentEventKind::CheckoutCompleted => self.handle_checkout_completed(event).await,
            PaymentEventKind::SubscriptionChanged(_) => {
                let Some(subscription_id) = event.subscription_id() else {
                    return Err(BillingError::InvalidRequest(
                        "subscription event without subscription id".to_string(),
                    ));
                };
                self.refresh_subscription(&subscription_id, event.customer_id().as_deref())
                    .await
            }
            PaymentEventKind::InvoicePaid | PaymentEventKind::InvoicePaymentFailed => {
                match event.subscription_id() {
                    Some(subscription_id) => {
                        self.refresh_subscription(&subscription_id, event.customer_id().as_deref())
                            .await
                    }
                    None => self.pull_customer(event).await,
                }
            }
            PaymentEventKind::Other(kind) => {
                debug!(event_id = %event.event_id, event_kind = %kind, "billing webhook: event ignored");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    /// Runs the handler on its own task so the webhook can be acknowledged right away.
    /// Failures are logged with what an operator needs for a manual replay.
    pub fn dispatch(self: &Arc<Self>, event: PaymentEvent) -> JoinHandle<()> {
        let usecase = Arc::clone(self);
        let customer_id = event.customer_id().unwrap_or_default();
        let span = info_span!(
            "billing_event",
            event_id = %event.event_id,
            event_kind = %event.kind,
            customer_id = %customer_id,
        );

        tokio::spawn(
            async move {
                match usecase.handle_event(&event).await {
                    Ok(outcome) => {
                        info!(outcome = ?outcome, "billing webhook: event processed");
                    }
                    Err(err) => {
                        error!(
                            event_id = %event.event_id,
                            event_kind = %event.kind,
                            customer_id = %customer_id,
                            account_id = ?event.account_id_hint(),
                            subscription_id = ?event.subscription_id(),
                            error = %err,
                            "billing webhook: event handler failed; mirror may be stale until replay"
                        );
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn handle_checkout_completed(&self, event: &PaymentEvent) -> UseCaseResult<EventOutcome> {
        if event.checkout_mode() != Some("subscription") {
            debug!(event_id = %event.event_id, mode = ?event.checkout_mode(), "billing webhook: non-subscription checkout ignored");
            return Ok(EventOutcome::Ignored);
        }

        let customer_id = event.customer_id();
        if let (Some(account_id), Some(customer_id)) = (event.account_id_hint(), customer_id.as_deref()) {
            self.identity.link(account_id, customer_id).await?;
        }

        match event.subscription_id() {
            Some(subscription_id) => {
                self.refresh_subscription(&subscription_id, customer_id.as_deref())
                    .await
            }
            None => self.pull_customer(event).await,
        }
    }

    async fn refresh_subscription(
        &self,
        subscription_id: &str,
        customer_hint: Option<&str>,
    ) -> UseCaseResult<EventOutcome> {
        let written = self
            .reconciler
            .reconcile_subscription(subscription_id, customer_hint)
            .await?;
        Ok(match written {
            Some(_) => EventOutcome::Reconciled,
            None => EventOutcome::NothingToDo,
        })
    }

    async fn pull_customer(&self, event: &PaymentEvent) -> UseCaseResult<EventOutcome> {
        let Some(customer_id) = event.customer_id() else {
            debug!(event_id = %event.event_id, "billing webhook: event names no customer");
            return Ok(EventOutcome::NothingToDo);
        };
        self.reconciler.reconcile_customer(&customer_id).await?;
        Ok(EventOutcome::Reconciled)
    }
}
