//! Batch lifecycle: STAGING → ACTIVE → ARCHIVED (→ ROLLED_BACK).
//!
//! Invariants enforced here:
//! - batch ids are strictly increasing per account;
//! - at most one ACTIVE batch per account (backed by a partial unique index);
//! - stage→activate and rollback run under the account advisory lock, in one
//!   transaction: observers see the old ACTIVE or the new ACTIVE, never
//!   neither or both.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, QueryBuilder};

use pos_schemas::{BatchRecord, BatchStatus, PositionSource};

use crate::{account_lock, far_future};

/// Input row for a bulk insert. Quantities and prices are integer micros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosition {
    pub product_id: String,
    pub position_type: String,
    pub quantity_micros: i64,
    pub price_micros: i64,
    pub currency: String,
    pub market_value_micros: i64,
}

const INSERT_CHUNK: usize = 500;

/// Allocate the next batch id for the account and create it in STAGING.
pub async fn create_batch(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<i64> {
    let mut tx = pool.begin().await.context("begin create_batch")?;
    account_lock(&mut tx, account_id).await?;

    let (next_id,): (i64,) = sqlx::query_as(
        r#"
        select coalesce(max(batch_id), 0) + 1
        from batches
        where account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut *tx)
    .await
    .context("allocate batch id")?;

    sqlx::query(
        r#"
        insert into batches (account_id, batch_id, business_date, status)
        values ($1, $2, $3, 'STAGING')
        "#,
    )
    .bind(account_id)
    .bind(next_id)
    .bind(business_date)
    .execute(&mut *tx)
    .await
    .context("insert staging batch")?;

    tx.commit().await.context("commit create_batch")?;
    Ok(next_id)
}

/// Bulk-insert positions into a STAGING batch. Whole-or-nothing per call:
/// chunked statements share one transaction. Staged rows carry the
/// far-future sentinel in `system_from` and stay invisible to readers until
/// activation stamps them.
pub async fn insert_positions(
    pool: &PgPool,
    account_id: &str,
    batch_id: i64,
    business_date: NaiveDate,
    positions: &[NewPosition],
    source: PositionSource,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin insert_positions")?;

    let (status,): (String,) = sqlx::query_as(
        "select status from batches where account_id = $1 and batch_id = $2",
    )
    .bind(account_id)
    .bind(batch_id)
    .fetch_optional(&mut *tx)
    .await
    .context("look up batch for insert")?
    .with_context(|| format!("batch {batch_id} not found for account {account_id}"))?;

    if status != BatchStatus::Staging.as_str() {
        bail!("batch {batch_id} for account {account_id} is {status}, expected STAGING");
    }

    let sentinel = far_future();
    for chunk in positions.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "insert into positions (account_id, product_id, position_type, business_date, \
             batch_id, quantity_micros, price_micros, currency, market_value_micros, source, \
             system_from, system_to) ",
        );
        qb.push_values(chunk, |mut b, p| {
            b.push_bind(account_id)
                .push_bind(&p.product_id)
                .push_bind(&p.position_type)
                .push_bind(business_date)
                .push_bind(batch_id)
                .push_bind(p.quantity_micros)
                .push_bind(p.price_micros)
                .push_bind(&p.currency)
                .push_bind(p.market_value_micros)
                .push_bind(source.as_str())
                .push_bind(sentinel)
                .push_bind(sentinel);
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .context("bulk insert positions chunk")?;
    }

    sqlx::query("update batches set position_count = $3 where account_id = $1 and batch_id = $2")
        .bind(account_id)
        .bind(batch_id)
        .bind(positions.len() as i64)
        .execute(&mut *tx)
        .await
        .context("update batch position_count")?;

    tx.commit().await.context("commit insert_positions")?;
    Ok(())
}

/// Row count of a batch, for the pre-activation check.
pub async fn count_batch_positions(pool: &PgPool, account_id: &str, batch_id: i64) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from positions where account_id = $1 and batch_id = $2",
    )
    .bind(account_id)
    .bind(batch_id)
    .fetch_one(pool)
    .await
    .context("count batch positions")?;
    Ok(n)
}

/// The atomic swap. In one transaction under the account lock:
/// (a) any existing ACTIVE batch flips to ARCHIVED and its open position
/// rows close; (b) `new_batch_id` flips STAGING→ACTIVE and its rows open.
/// Either both happen or neither.
pub async fn activate_batch(pool: &PgPool, account_id: &str, new_batch_id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("begin activate_batch")?;
    account_lock(&mut tx, account_id).await?;

    let (status,): (String,) = sqlx::query_as(
        "select status from batches where account_id = $1 and batch_id = $2",
    )
    .bind(account_id)
    .bind(new_batch_id)
    .fetch_optional(&mut *tx)
    .await
    .context("look up batch for activation")?
    .with_context(|| format!("batch {new_batch_id} not found for account {account_id}"))?;

    if status != BatchStatus::Staging.as_str() {
        bail!(
            "batch {new_batch_id} for account {account_id} is {status}, expected STAGING"
        );
    }

    let now = Utc::now();
    let sentinel = far_future();

    // Close the outgoing ACTIVE batch, if any.
    let old: Option<(i64,)> = sqlx::query_as(
        "select batch_id from batches where account_id = $1 and status = 'ACTIVE'",
    )
    .bind(account_id)
    .fetch_optional(&mut *tx)
    .await
    .context("look up outgoing active batch")?;

    if let Some((old_id,)) = old {
        sqlx::query(
            r#"
            update batches
            set status = 'ARCHIVED', archived_at = $3
            where account_id = $1 and batch_id = $2
            "#,
        )
        .bind(account_id)
        .bind(old_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("archive outgoing batch")?;

        sqlx::query(
            r#"
            update positions
            set system_to = $3
            where account_id = $1 and batch_id = $2 and system_to = $4
            "#,
        )
        .bind(account_id)
        .bind(old_id)
        .bind(now)
        .bind(sentinel)
        .execute(&mut *tx)
        .await
        .context("close outgoing batch rows")?;
    }

    sqlx::query(
        r#"
        update batches
        set status = 'ACTIVE', activated_at = $3
        where account_id = $1 and batch_id = $2
        "#,
    )
    .bind(account_id)
    .bind(new_batch_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("activate staged batch")?;

    sqlx::query(
        r#"
        update positions
        set system_from = $3
        where account_id = $1 and batch_id = $2 and system_from = $4
        "#,
    )
    .bind(account_id)
    .bind(new_batch_id)
    .bind(now)
    .bind(sentinel)
    .execute(&mut *tx)
    .await
    .context("open incoming batch rows")?;

    tx.commit().await.context("commit activate_batch")?;
    Ok(())
}

/// Swap the current ACTIVE batch for the most recent ARCHIVED one.
/// Returns `false` when there is nothing to roll back to. ROLLED_BACK is
/// terminal for the outgoing batch.
pub async fn rollback_batch(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin rollback_batch")?;
    account_lock(&mut tx, account_id).await?;

    let active: Option<(i64,)> = sqlx::query_as(
        r#"
        select batch_id from batches
        where account_id = $1 and business_date = $2 and status = 'ACTIVE'
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(&mut *tx)
    .await
    .context("look up active batch for rollback")?;

    let Some((active_id,)) = active else {
        tx.rollback().await.ok();
        return Ok(false);
    };

    let archived: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select batch_id, archived_at from batches
        where account_id = $1 and business_date = $2 and status = 'ARCHIVED'
        order by batch_id desc
        limit 1
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(&mut *tx)
    .await
    .context("look up archived batch for rollback")?;

    let Some((archived_id, archived_at)) = archived else {
        tx.rollback().await.ok();
        return Ok(false);
    };

    let now = Utc::now();
    let sentinel = far_future();

    sqlx::query(
        "update batches set status = 'ROLLED_BACK' where account_id = $1 and batch_id = $2",
    )
    .bind(account_id)
    .bind(active_id)
    .execute(&mut *tx)
    .await
    .context("mark batch rolled back")?;

    sqlx::query(
        r#"
        update positions set system_to = $3
        where account_id = $1 and batch_id = $2 and system_to = $4
        "#,
    )
    .bind(account_id)
    .bind(active_id)
    .bind(now)
    .bind(sentinel)
    .execute(&mut *tx)
    .await
    .context("close rolled-back rows")?;

    sqlx::query(
        r#"
        update batches
        set status = 'ACTIVE', activated_at = $3, archived_at = null
        where account_id = $1 and batch_id = $2
        "#,
    )
    .bind(account_id)
    .bind(archived_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("re-activate archived batch")?;

    // Reopen only the rows that were in force when this batch was archived;
    // rows closed earlier by intraday updates stay closed.
    sqlx::query(
        r#"
        update positions set system_to = $4
        where account_id = $1 and batch_id = $2 and system_to = $3
        "#,
    )
    .bind(account_id)
    .bind(archived_id)
    .bind(archived_at)
    .bind(sentinel)
    .execute(&mut *tx)
    .await
    .context("reopen re-activated rows")?;

    tx.commit().await.context("commit rollback_batch")?;
    Ok(true)
}

/// Keep the ACTIVE batch plus the `keep` most recent ARCHIVED ones; delete
/// the rest together with their positions. STAGING leftovers older than a
/// day are garbage too. ROLLED_BACK rows are kept until explicit purge.
pub async fn cleanup_batches(pool: &PgPool, account_id: &str, keep: i64) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin cleanup_batches")?;
    account_lock(&mut tx, account_id).await?;

    let stale: Vec<(i64,)> = sqlx::query_as(
        r#"
        select batch_id from batches
        where account_id = $1 and status = 'ARCHIVED'
        order by archived_at desc, batch_id desc
        offset $2
        "#,
    )
    .bind(account_id)
    .bind(keep)
    .fetch_all(&mut *tx)
    .await
    .context("select stale archived batches")?;

    let orphans: Vec<(i64,)> = sqlx::query_as(
        r#"
        select batch_id from batches
        where account_id = $1 and status = 'STAGING'
          and created_at < now() - interval '1 day'
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *tx)
    .await
    .context("select orphaned staging batches")?;

    let mut deleted = 0u64;
    for (batch_id,) in stale.into_iter().chain(orphans) {
        sqlx::query("delete from positions where account_id = $1 and batch_id = $2")
            .bind(account_id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .context("delete batch positions")?;
        let res = sqlx::query("delete from batches where account_id = $1 and batch_id = $2")
            .bind(account_id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .context("delete batch")?;
        deleted += res.rows_affected();
    }

    tx.commit().await.context("commit cleanup_batches")?;
    Ok(deleted)
}

/// Purge terminal ROLLED_BACK batches older than `older_than_days`.
pub async fn purge_rolled_back(pool: &PgPool, older_than_days: i64) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin purge_rolled_back")?;

    let victims: Vec<(String, i64)> = sqlx::query_as(
        r#"
        select account_id, batch_id from batches
        where status = 'ROLLED_BACK'
          and created_at < now() - make_interval(days => $1::int)
        "#,
    )
    .bind(older_than_days)
    .fetch_all(&mut *tx)
    .await
    .context("select rolled-back batches to purge")?;

    let mut deleted = 0u64;
    for (account_id, batch_id) in victims {
        sqlx::query("delete from positions where account_id = $1 and batch_id = $2")
            .bind(&account_id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .context("delete purged positions")?;
        let res = sqlx::query("delete from batches where account_id = $1 and batch_id = $2")
            .bind(&account_id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .context("delete purged batch")?;
        deleted += res.rows_affected();
    }

    tx.commit().await.context("commit purge_rolled_back")?;
    Ok(deleted)
}

type BatchRow = (
    String,
    i64,
    NaiveDate,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    i64,
);

fn to_record(row: BatchRow) -> Result<BatchRecord> {
    let status = BatchStatus::parse(&row.3)
        .with_context(|| format!("unknown batch status '{}' in store", row.3))?;
    Ok(BatchRecord {
        account_id: row.0,
        batch_id: row.1,
        business_date: row.2,
        status,
        created_at: row.4,
        activated_at: row.5,
        archived_at: row.6,
        position_count: row.7,
    })
}

const BATCH_COLUMNS: &str = "account_id, batch_id, business_date, status, created_at, \
                             activated_at, archived_at, position_count";

/// Batch history for an account, newest first.
pub async fn get_batches(pool: &PgPool, account_id: &str, limit: i64) -> Result<Vec<BatchRecord>> {
    let rows: Vec<BatchRow> = sqlx::query_as(&format!(
        "select {BATCH_COLUMNS} from batches where account_id = $1 \
         order by batch_id desc limit $2"
    ))
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch batch history")?;

    rows.into_iter().map(to_record).collect()
}

/// The ACTIVE batch for (account, business date), if any.
pub async fn get_active_batch(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<Option<BatchRecord>> {
    let row: Option<BatchRow> = sqlx::query_as(&format!(
        "select {BATCH_COLUMNS} from batches \
         where account_id = $1 and business_date = $2 and status = 'ACTIVE'"
    ))
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(pool)
    .await
    .context("fetch active batch")?;

    row.map(to_record).transpose()
}
