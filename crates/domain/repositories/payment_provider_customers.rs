use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

/// Account <-> provider customer mapping. One row per account, one account per
/// customer; rows are created lazily and never deleted here.
#[automock]
#[async_trait]
pub trait PaymentProviderCustomerRepository {
    async fn find_customer_ref_by_user_id(&self, user_id: Uuid) -> Result<Option<String>>;

    async fn find_user_id_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Uuid>>;

    /// Inserts the mapping unless one already exists for the account, then returns the
    /// customer ref that is actually stored. A concurrent writer that lost the race gets
    /// the winner's ref back instead of an error.
    async fn insert_customer_ref_if_absent(
        &self,
        user_id: Uuid,
        customer_ref: &str,
        email: Option<String>,
    ) -> Result<String>;
}
