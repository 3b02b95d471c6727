use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update, upsert::excluded};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::BillingDbPool, schema::subscription_mirrors},
};
use domain::{
    entities::subscription_mirrors::SubscriptionMirrorEntity,
    repositories::subscription_mirrors::SubscriptionMirrorRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct SubscriptionMirrorPostgres {
    db_pool: Arc<BillingDbPool>,
}

impl SubscriptionMirrorPostgres {
    pub fn new(db_pool: Arc<BillingDbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionMirrorRepository for SubscriptionMirrorPostgres {
    async fn find_by_customer_ref(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let mirror = subscription_mirrors::table
            .filter(subscription_mirrors::provider_customer_id.eq(provider_customer_id))
            .select(SubscriptionMirrorEntity::as_select())
            .first::<SubscriptionMirrorEntity>(&mut conn)
            .optional()?;

        Ok(mirror)
    }

    async fn upsert(&self, mirror: SubscriptionMirrorEntity) -> Result<SubscriptionMirrorEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let written = diesel::query_dsl::methods::FilterDsl::filter(
            insert_into(subscription_mirrors::table)
                .values(&mirror)
                .on_conflict(subscription_mirrors::provider_customer_id)
                .do_update()
                .set(&mirror),
            subscription_mirrors::last_synced_at
                .le(excluded(subscription_mirrors::last_synced_at)),
        )
            .returning(SubscriptionMirrorEntity::as_returning())
            .get_result::<SubscriptionMirrorEntity>(&mut conn)
            .optional()?;

        match written {
            Some(stored) => Ok(stored),
            None => {
                let current = subscription_mirrors::table
                    .filter(subscription_mirrors::provider_customer_id.eq(&mirror.provider_customer_id))
                    .select(SubscriptionMirrorEntity::as_select())
                    .first::<SubscriptionMirrorEntity>(&mut conn)?;
                Ok(current)
            }
        }
    }

    async fn mark_subscription_removed(
        &self,
        provider_customer_id: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionMirrorEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(subscription_mirrors::table)
            .filter(subscription_mirrors::provider_customer_id.eq(provider_customer_id))
            .filter(subscription_mirrors::provider_subscription_id.eq(provider_subscription_id))
            .set((
                subscription_mirrors::status.eq(SubscriptionStatus::Canceled.to_string()),
                subscription_mirrors::cancel_at_period_end.eq(false),
                subscription_mirrors::last_synced_at.eq(Utc::now()),
            ))
            .returning(SubscriptionMirrorEntity::as_returning())
            .get_result::<SubscriptionMirrorEntity>(&mut conn)
            .optional()?;

        Ok(updated)
    }
}
