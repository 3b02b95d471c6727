use anyhow::{Result, anyhow};
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::BillingDbPool, schema::payment_provider_customers},
};
use domain::{
    entities::payment_provider_customers::{InsertPaymentProviderCustomerEntity, STRIPE_PROVIDER},
    repositories::payment_provider_customers::PaymentProviderCustomerRepository,
};

pub struct PaymentProviderCustomerPostgres {
    db_pool: Arc<BillingDbPool>,
}

impl PaymentProviderCustomerPostgres {
    pub fn new(db_pool: Arc<BillingDbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentProviderCustomerRepository for PaymentProviderCustomerPostgres {
    async fn find_customer_ref_by_user_id(&self, user_id: Uuid) -> Result<Option<String>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let customer_ref = payment_provider_customers::table
            .filter(payment_provider_customers::user_id.eq(user_id))
            .filter(payment_provider_customers::provider.eq(STRIPE_PROVIDER))
            .select(payment_provider_customers::customer_ref)
            .first::<String>(&mut conn)
            .optional()?;

        Ok(customer_ref)
    }

    async fn find_user_id_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Uuid>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user_id = payment_provider_customers::table
            .filter(payment_provider_customers::customer_ref.eq(customer_ref))
            .filter(payment_provider_customers::provider.eq(STRIPE_PROVIDER))
            .select(payment_provider_customers::user_id)
            .first::<Uuid>(&mut conn)
            .optional()?;

        Ok(user_id)
    }

    async fn insert_customer_ref_if_absent(
        &self,
        user_id: Uuid,
        customer_ref: &str,
        email: Option<String>,
    ) -> Result<String> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let insert_entity = InsertPaymentProviderCustomerEntity {
            user_id,
            provider: STRIPE_PROVIDER.to_string(),
            customer_ref: customer_ref.to_string(),
            metadata: json!({ "email": email }),
        };

        // Both unique keys (account, customer) collapse a duplicate into a no-op.
        insert_into(payment_provider_customers::table)
            .values(&insert_entity)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;

        payment_provider_customers::table
            .filter(payment_provider_customers::user_id.eq(user_id))
            .filter(payment_provider_customers::provider.eq(STRIPE_PROVIDER))
            .select(payment_provider_customers::customer_ref)
            .first::<String>(&mut conn)
            .optional()?
            .ok_or_else(|| {
                anyhow!(
                    "customer {} is already linked to a different account than {}",
                    customer_ref,
                    user_id
                )
            })
    }
}
