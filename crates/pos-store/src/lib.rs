//! PostgreSQL position store.
//!
//! Owns every `positions` and `batches` row. All multi-row mutations run in
//! explicit transactions; the stage→activate critical section takes an
//! account-scoped advisory lock so writers serialize per account and never
//! across accounts.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

pub mod batch;
pub mod bitemporal;
pub mod lock;
pub mod refdata;
pub mod status;

pub use batch::{
    activate_batch, cleanup_batches, count_batch_positions, create_batch, get_active_batch,
    get_batches, insert_positions, purge_rolled_back, rollback_batch, NewPosition,
};
pub use bitemporal::{
    get_active_positions, get_positions_by_date, get_quantity_as_of, update_position_bitemporal,
};
pub use lock::{try_acquire_sched_lock, PgSchedulerLock};
pub use refdata::{
    client_account_count, client_of_account, count_completed_accounts, insert_holiday,
    list_accounts, load_holidays, upsert_reference_data,
};
pub use status::{
    delete_snapshot_hash, get_eod_status, get_snapshot_hash, list_eod_history, mark_completed,
    mark_failed, mark_in_progress, mark_skipped, put_snapshot_hash, reset_eod_status,
};

pub const ENV_DB_URL: &str = "POS_DATABASE_URL";

/// Far-future sentinel closing the open end of a system-time interval.
/// Matches the column default in the migrations.
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0)
        .single()
        .expect("sentinel timestamp is valid")
}

/// Connect to Postgres using POS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests: connect + migrate.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='batches'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_batches_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_batches_table: bool,
}

/// Take the account-scoped advisory lock for the rest of the transaction.
/// Serializes stage→activate (and rollback) per account; no cross-account
/// lock is ever held.
pub(crate) async fn account_lock(
    tx: &mut Transaction<'_, Postgres>,
    account_id: &str,
) -> Result<()> {
    sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(account_id)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("advisory lock for account {account_id}"))?;
    Ok(())
}
