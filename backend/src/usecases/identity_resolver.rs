use std::sync::Arc;

use billing_sync::{
    domain::repositories::payment_provider_customers::PaymentProviderCustomerRepository,
    payments::retry::{RetryPolicy, with_backoff},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    errors::{BillingError, UseCaseResult},
    payment_gateway::PaymentGateway,
};

/// Maps local accounts to provider customers, creating the provider side lazily.
pub struct IdentityResolver<C, G>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    customer_repo: Arc<C>,
    gateway: Arc<G>,
    retry_policy: RetryPolicy,
}

impl<C, G> IdentityResolver<C, G>
where
    C: PaymentProviderCustomerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(customer_repo: Arc<C>, gateway: Arc<G>, retry_policy: RetryPolicy) -> Self {
        Self {
            customer_repo,
            gateway,
            retry_policy,
        }
    }

    pub async fn resolve(&self, account_id: Uuid) -> UseCaseResult<Option<String>> {
        self.customer_repo
            .find_customer_ref_by_user_id(account_id)
            .await
            .map_err(|err| {
                error!(%account_id, db_error = ?err, "identity: failed to resolve customer");
                BillingError::Internal(err)
            })
    }

    pub async fn resolve_account(&self, customer_id: &str) -> UseCaseResult<Option<Uuid>> {
        self.customer_repo
            .find_user_id_by_customer_ref(customer_id)
            .await
            .map_err(|err| {
                error!(customer_id, db_error = ?err, "identity: failed to resolve account");
                BillingError::Internal(err)
            })
    }

    /// Returns the account's provider customer, creating it under the verified email
    /// when absent. Concurrent callers for one account end up with the same customer:
    /// the provider call is keyed by account and the insert keeps the first row.
    pub async fn ensure(&self, account_id: Uuid, email: Option<&str>) -> UseCaseResult<String> {
        if let Some(customer_id) = self.resolve(account_id).await? {
            return Ok(customer_id);
        }

        let email = email.map(str::trim).filter(|e| !e.is_empty()).ok_or_else(|| {
            BillingError::InvalidRequest("a verified email is required to start billing".to_string())
        })?;

        let created = match with_backoff(&self.retry_policy, "create_customer", || {
            self.gateway.create_customer(email, account_id)
        })
        .await
        {
            Ok(created) => created,
            Err(err) => {
                // a concurrent caller may have finished while this one was refused
                if let Some(customer_id) = self.resolve(account_id).await? {
                    warn!(%account_id, customer_id = %customer_id, error = %err, "identity: creation refused; using mapping stored meanwhile");
                    return Ok(customer_id);
                }
                error!(%account_id, error = %err, "identity: provider customer creation failed");
                return Err(BillingError::from(err));
            }
        };

        let stored = self
            .customer_repo
            .insert_customer_ref_if_absent(account_id, &created, Some(email.to_string()))
            .await
            .map_err(|err| {
                error!(%account_id, customer_id = %created, db_error = ?err, "identity: failed to persist mapping");
                BillingError::Internal(err)
            })?;

        if stored != created {
            warn!(
                %account_id,
                created_customer_id = %created,
                customer_id = %stored,
                "identity: concurrent mapping won; using existing customer"
            );
        } else {
            info!(%account_id, customer_id = %stored, "identity: provider customer created");
        }

        Ok(stored)
    }

    /// Records a mapping learned from the provider side (checkout or subscription
    /// metadata). An existing mapping for the account is left untouched.
    pub async fn link(&self, account_id: Uuid, customer_id: &str) -> UseCaseResult<String> {
        if let Some(existing) = self.resolve_account(customer_id).await? {
            if existing != account_id {
                warn!(
                    customer_id,
                    %account_id,
                    mapped_account_id = %existing,
                    "identity: customer already mapped to another account"
                );
            }
            return Ok(customer_id.to_string());
        }

        let stored = self
            .customer_repo
            .insert_customer_ref_if_absent(account_id, customer_id, None)
            .await
            .map_err(|err| {
                error!(customer_id, %account_id, db_error = ?err, "identity: failed to link customer");
                BillingError::Internal(err)
            })?;

        if stored != customer_id {
            warn!(
                customer_id,
                %account_id,
                mapped_customer_id = %stored,
                "identity: account already mapped to a different customer"
            );
        } else {
            info!(customer_id, %account_id, "identity: customer linked from provider data");
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::payment_gateway::MockPaymentGateway;
    use billing_sync::{
        domain::repositories::payment_provider_customers::MockPaymentProviderCustomerRepository,
        payments::provider_error::ProviderError,
    };
    use mockall::predicate::eq;

    fn instant_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    #[tokio::test]
    async fn ensure_returns_existing_mapping_without_provider_call() {
        let account_id = Uuid::new_v4();
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .with(eq(account_id))
            .returning(|_| Ok(Some("cus_existing".to_string())));
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_customer().never();

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver.ensure(account_id, Some("a@example.com")).await.unwrap();

        assert_eq!(customer, "cus_existing");
    }

    #[tokio::test]
    async fn ensure_creates_customer_and_persists_mapping() {
        let account_id = Uuid::new_v4();
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .returning(|_| Ok(None));
        repo.expect_insert_customer_ref_if_absent()
            .withf(move |user_id, customer_ref, email| {
                *user_id == account_id
                    && customer_ref == "cus_new"
                    && email.as_deref() == Some("a@example.com")
            })
            .times(1)
            .returning(|_, customer_ref, _| Ok(customer_ref.to_string()));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .withf(move |email, id| email == "a@example.com" && *id == account_id)
            .times(1)
            .returning(|_, _| Ok("cus_new".to_string()));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver.ensure(account_id, Some(" a@example.com ")).await.unwrap();

        assert_eq!(customer, "cus_new");
    }

    #[tokio::test]
    async fn ensure_collapses_into_concurrent_winner() {
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .returning(|_| Ok(None));
        repo.expect_insert_customer_ref_if_absent()
            .returning(|_, _, _| Ok("cus_winner".to_string()));
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .returning(|_, _| Ok("cus_loser".to_string()));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver
            .ensure(Uuid::new_v4(), Some("a@example.com"))
            .await
            .unwrap();

        assert_eq!(customer, "cus_winner");
    }

    #[tokio::test]
    async fn ensure_requires_email_for_new_customer() {
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .returning(|_| Ok(None));
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_customer().never();

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let err = resolver.ensure(Uuid::new_v4(), None).await.unwrap_err();

        assert!(matches!(err, BillingError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn ensure_retries_transient_provider_failures() {
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .returning(|_| Ok(None));
        repo.expect_insert_customer_ref_if_absent()
            .returning(|_, customer_ref, _| Ok(customer_ref.to_string()));

        let mut gateway = MockPaymentGateway::new();
        let mut seq = mockall::Sequence::new();
        gateway
            .expect_create_customer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::timeout("create customer")));
        gateway
            .expect_create_customer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("cus_retry".to_string()));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver
            .ensure(Uuid::new_v4(), Some("a@example.com"))
            .await
            .unwrap();

        assert_eq!(customer, "cus_retry");
    }

    #[tokio::test]
    async fn ensure_retries_in_flight_idempotency_conflict() {
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .returning(|_| Ok(None));
        repo.expect_insert_customer_ref_if_absent()
            .returning(|_, customer_ref, _| Ok(customer_ref.to_string()));

        let mut gateway = MockPaymentGateway::new();
        let mut seq = mockall::Sequence::new();
        gateway
            .expect_create_customer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::from_status(409, "idempotency_error")));
        gateway
            .expect_create_customer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("cus_same_key".to_string()));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver
            .ensure(Uuid::new_v4(), Some("a@example.com"))
            .await
            .unwrap();

        assert_eq!(customer, "cus_same_key");
    }

    #[tokio::test]
    async fn ensure_uses_mapping_stored_while_creation_was_refused() {
        let account_id = Uuid::new_v4();
        let mut repo = MockPaymentProviderCustomerRepository::new();
        let mut lookups = mockall::Sequence::new();
        repo.expect_find_customer_ref_by_user_id()
            .times(1)
            .in_sequence(&mut lookups)
            .returning(|_| Ok(None));
        repo.expect_find_customer_ref_by_user_id()
            .times(1)
            .in_sequence(&mut lookups)
            .returning(|_| Ok(Some("cus_winner".to_string())));
        repo.expect_insert_customer_ref_if_absent().never();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .times(1)
            .returning(|_, _| Err(ProviderError::from_status(400, "customer rejected")));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let customer = resolver.ensure(account_id, Some("a@example.com")).await.unwrap();

        assert_eq!(customer, "cus_winner");
    }

    #[tokio::test]
    async fn ensure_reports_refused_creation_without_mapping() {
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_customer_ref_by_user_id()
            .times(2)
            .returning(|_| Ok(None));
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .times(1)
            .returning(|_, _| Err(ProviderError::from_status(400, "customer rejected")));

        let resolver = IdentityResolver::new(Arc::new(repo), Arc::new(gateway), instant_retry());
        let err = resolver
            .ensure(Uuid::new_v4(), Some("a@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Internal(_)));
    }

    #[tokio::test]
    async fn link_skips_known_customers() {
        let account_id = Uuid::new_v4();
        let mut repo = MockPaymentProviderCustomerRepository::new();
        repo.expect_find_user_id_by_customer_ref()
            .withf(|customer| customer == "cus_1")
            .returning(move |_| Ok(Some(account_id)));
        repo.expect_insert_customer_ref_if_absent().never();

        let resolver = IdentityResolver::new(
            Arc::new(repo),
            Arc::new(MockPaymentGateway::new()),
            instant_retry(),
        );
        assert_eq!(resolver.link(account_id, "cus_1").await.unwrap(), "cus_1");
    }
}
