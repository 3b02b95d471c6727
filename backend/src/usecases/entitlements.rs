use std::sync::Arc;

use billing_sync::domain::{
    entities::subscription_mirrors::SubscriptionMirrorEntity,
    repositories::{
        payment_provider_customers::PaymentProviderCustomerRepository,
        subscription_mirrors::SubscriptionMirrorRepository,
    },
    value_objects::{
        entitlements::{EntitlementDecision, OverrideAllowList},
        plans::PlanCatalog,
    },
};
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    errors::{BillingError, UseCaseResult},
    identity_resolver::IdentityResolver,
    payment_gateway::PaymentGateway,
    reconciliation::{ReconcileError, ReconciliationEngine},
};

/// How long an unsettled (`incomplete`) mirror row is served before it is pulled again.
pub const UNSETTLED_RECHECK_SECS: i64 = 60;

pub struct EntitlementUseCase<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    mirror_repo: Arc<M>,
    identity: Arc<IdentityResolver<C, G>>,
    reconciler: Arc<ReconciliationEngine<M, C, G>>,
    overrides: OverrideAllowList,
    catalog: PlanCatalog,
    max_mirror_age: Duration,
}

impl<M, C, G> EntitlementUseCase<M, C, G>
where
    M: SubscriptionMirrorRepository + Send + Sync + 'static,
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        mirror_repo: Arc<M>,
        identity: Arc<IdentityResolver<C, G>>,
        reconciler: Arc<ReconciliationEngine<M, C, G>>,
        overrides: OverrideAllowList,
        catalog: PlanCatalog,
        max_mirror_age: Duration,
    ) -> Self {
        Self {
            mirror_repo,
            identity,
            reconciler,
            overrides,
            catalog,
            max_mirror_age,
        }
    }

    /// Answers whether the account currently has paid access.
    ///
    /// The override list is consulted before any store lookup. A missing mapping is
    /// a cheap negative without provider calls. A missing mirror is pulled from the
    /// provider; if that fails the decision is `unknown`, never inactive.
    pub async fn is_entitled(
        &self,
        account_id: Uuid,
        email: Option<&str>,
    ) -> UseCaseResult<EntitlementDecision> {
        if email.is_some_and(|email| self.overrides.contains(email)) {
            info!(%account_id, "entitlements: override allow-list match");
            return Ok(EntitlementDecision::overridden());
        }

        let Some(customer_id) = self.identity.resolve(account_id).await? else {
            info!(%account_id, "entitlements: no customer record");
            return Ok(EntitlementDecision::no_customer_record());
        };

        let mirror = self
            .mirror_repo
            .find_by_customer_ref(&customer_id)
            .await
            .map_err(|err| {
                error!(%account_id, customer_id = %customer_id, db_error = ?err, "entitlements: mirror read failed");
                BillingError::Internal(err)
            })?;

        let mirror = match mirror {
            Some(row) if self.is_fresh(&row) => row,
            Some(stale) => match self.reconciler.reconcile_customer(&customer_id).await {
                Ok(refreshed) => refreshed,
                Err(ReconcileError::ProviderUnavailable(err)) => {
                    warn!(
                        %account_id,
                        customer_id = %customer_id,
                        last_synced_at = %stale.last_synced_at,
                        error = %err,
                        "entitlements: refresh failed; answering from last known mirror"
                    );
                    stale
                }
                Err(err) => return Err(err.into()),
            },
            None => match self.reconciler.reconcile_customer(&customer_id).await {
                Ok(pulled) => pulled,
                Err(ReconcileError::ProviderUnavailable(err)) => {
                    warn!(
                        %account_id,
                        customer_id = %customer_id,
                        error = %err,
                        "entitlements: no mirror and provider unavailable"
                    );
                    return Ok(EntitlementDecision::unknown());
                }
                Err(err) => return Err(err.into()),
            },
        };

        let decision = EntitlementDecision::from_mirror(&mirror, &self.catalog);
        info!(
            %account_id,
            customer_id = %customer_id,
            active = ?decision.active,
            reason = decision.reason.as_str(),
            "entitlements: decision computed"
        );
        Ok(decision)
    }

    fn is_fresh(&self, mirror: &SubscriptionMirrorEntity) -> bool {
        let max_age = if mirror.subscription_status().is_settled() {
            self.max_mirror_age
        } else {
            self.max_mirror_age.min(Duration::seconds(UNSETTLED_RECHECK_SECS))
        };
        Utc::now() - mirror.last_synced_at <= max_age
    }
}
