//! EOD status rows and snapshot content hashes. The EOD engine is the only
//! writer of both tables.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use pos_schemas::{EodState, EodStatusRecord, SnapshotHashRecord};

type StatusRow = (
    String,
    NaiveDate,
    String,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    i64,
    Option<String>,
);

fn to_record(row: StatusRow) -> Result<EodStatusRecord> {
    let state = EodState::parse(&row.2)
        .with_context(|| format!("unknown eod status '{}' in store", row.2))?;
    Ok(EodStatusRecord {
        account_id: row.0,
        business_date: row.1,
        state,
        started_at: row.3,
        completed_at: row.4,
        position_count: row.5,
        last_error: row.6,
    })
}

const STATUS_COLUMNS: &str =
    "account_id, business_date, status, started_at, completed_at, position_count, last_error";

/// Current status row; `NOT_STARTED` synthesized when absent.
pub async fn get_eod_status(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<EodStatusRecord> {
    let row: Option<StatusRow> = sqlx::query_as(&format!(
        "select {STATUS_COLUMNS} from eod_status where account_id = $1 and business_date = $2"
    ))
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(pool)
    .await
    .context("fetch eod status")?;

    match row {
        Some(r) => to_record(r),
        None => Ok(EodStatusRecord::not_started(account_id, business_date)),
    }
}

pub async fn mark_in_progress(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into eod_status (account_id, business_date, status, started_at)
        values ($1, $2, 'IN_PROGRESS', now())
        on conflict (account_id, business_date)
        do update set status = 'IN_PROGRESS', started_at = now(), last_error = null
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .execute(pool)
    .await
    .context("mark eod in progress")?;
    Ok(())
}

pub async fn mark_completed(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
    position_count: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into eod_status (account_id, business_date, status, completed_at, position_count)
        values ($1, $2, 'COMPLETED', now(), $3)
        on conflict (account_id, business_date)
        do update set status = 'COMPLETED', completed_at = now(),
                      position_count = $3, last_error = null
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .bind(position_count)
    .execute(pool)
    .await
    .context("mark eod completed")?;
    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into eod_status (account_id, business_date, status, last_error)
        values ($1, $2, 'FAILED', $3)
        on conflict (account_id, business_date)
        do update set status = 'FAILED', last_error = $3
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .bind(error)
    .execute(pool)
    .await
    .context("mark eod failed")?;
    Ok(())
}

pub async fn mark_skipped(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into eod_status (account_id, business_date, status, last_error)
        values ($1, $2, 'SKIPPED', $3)
        on conflict (account_id, business_date)
        do update set status = 'SKIPPED', last_error = $3
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .bind(reason)
    .execute(pool)
    .await
    .context("mark eod skipped")?;
    Ok(())
}

/// Operator reset: clears the status row and the stored content hash so the
/// next trigger reprocesses from scratch. Positions are untouched.
pub async fn reset_eod_status(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin reset")?;
    sqlx::query("delete from eod_status where account_id = $1 and business_date = $2")
        .bind(account_id)
        .bind(business_date)
        .execute(&mut *tx)
        .await
        .context("delete eod status")?;
    sqlx::query("delete from snapshot_hashes where account_id = $1 and business_date = $2")
        .bind(account_id)
        .bind(business_date)
        .execute(&mut *tx)
        .await
        .context("delete snapshot hash")?;
    tx.commit().await.context("commit reset")?;
    Ok(())
}

/// Status history for an account, newest business date first.
pub async fn list_eod_history(
    pool: &PgPool,
    account_id: &str,
    limit: i64,
) -> Result<Vec<EodStatusRecord>> {
    let rows: Vec<StatusRow> = sqlx::query_as(&format!(
        "select {STATUS_COLUMNS} from eod_status where account_id = $1 \
         order by business_date desc limit $2"
    ))
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch eod history")?;

    rows.into_iter().map(to_record).collect()
}

// ---------------------------------------------------------------------------
// Snapshot hashes
// ---------------------------------------------------------------------------

pub async fn get_snapshot_hash(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<Option<SnapshotHashRecord>> {
    let row: Option<(String, NaiveDate, String, i64, i64, i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select account_id, business_date, content_hash, position_count,
               total_quantity_micros, total_market_value_micros, stored_at
        from snapshot_hashes
        where account_id = $1 and business_date = $2
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(pool)
    .await
    .context("fetch snapshot hash")?;

    Ok(row.map(|r| SnapshotHashRecord {
        account_id: r.0,
        business_date: r.1,
        content_hash: r.2,
        position_count: r.3,
        total_quantity_micros: r.4,
        total_market_value_micros: r.5,
        stored_at: r.6,
    }))
}

pub async fn put_snapshot_hash(pool: &PgPool, record: &SnapshotHashRecord) -> Result<()> {
    sqlx::query(
        r#"
        insert into snapshot_hashes (account_id, business_date, content_hash, position_count,
                                     total_quantity_micros, total_market_value_micros, stored_at)
        values ($1, $2, $3, $4, $5, $6, now())
        on conflict (account_id, business_date)
        do update set content_hash = $3, position_count = $4,
                      total_quantity_micros = $5, total_market_value_micros = $6,
                      stored_at = now()
        "#,
    )
    .bind(&record.account_id)
    .bind(record.business_date)
    .bind(&record.content_hash)
    .bind(record.position_count)
    .bind(record.total_quantity_micros)
    .bind(record.total_market_value_micros)
    .execute(pool)
    .await
    .context("store snapshot hash")?;
    Ok(())
}

pub async fn delete_snapshot_hash(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<()> {
    sqlx::query("delete from snapshot_hashes where account_id = $1 and business_date = $2")
        .bind(account_id)
        .bind(business_date)
        .execute(pool)
        .await
        .context("delete snapshot hash")?;
    Ok(())
}
