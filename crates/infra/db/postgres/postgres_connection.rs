use anyhow::Result;
use diesel::{
    Connection, PgConnection,
    connection::CacheSize,
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool},
};
use tracing::info;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

pub type BillingDbPool = Pool<ConnectionManager<PgConnection>>;

/// Transaction-mode poolers (pgbouncer, supavisor) drop server-side prepared
/// statements between checkouts, so the per-connection cache stays off.
#[derive(Debug, Default)]
struct NoStatementCache;

impl CustomizeConnection<PgConnection, R2d2Error> for NoStatementCache {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), R2d2Error> {
        conn.set_prepared_statement_cache_size(CacheSize::Disabled);
        Ok(())
    }
}

pub fn establish_connection(database_url: &str, max_connections: u32) -> Result<BillingDbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_connections.max(1))
        .connection_customizer(Box::new(NoStatementCache))
        .build(manager)?;

    info!(max_connections = pool.max_size(), "billing database pool ready");
    Ok(pool)
}
