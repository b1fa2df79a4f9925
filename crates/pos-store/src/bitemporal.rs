//! Bitemporal reads and the intraday close-and-insert path.
//!
//! Rows are never updated in place. A mutation closes the current row
//! (`system_to = now`) and inserts a successor (`system_from = now`) in the
//! same batch — intraday writes never rotate batches.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use pos_schemas::{BatchStatus, PositionSource, StoredPosition};

use crate::{account_lock, far_future};

type PositionRow = (
    String,
    String,
    String,
    NaiveDate,
    i64,
    i64,
    i64,
    String,
    i64,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn to_stored(row: PositionRow) -> Result<StoredPosition> {
    let source = PositionSource::parse(&row.9)
        .with_context(|| format!("unknown position source '{}' in store", row.9))?;
    let system_to = if row.11 >= far_future() {
        None
    } else {
        Some(row.11)
    };
    Ok(StoredPosition {
        account_id: row.0,
        product_id: row.1,
        position_type: row.2,
        business_date: row.3,
        batch_id: row.4,
        quantity_micros: row.5,
        price_micros: row.6,
        currency: row.7,
        market_value_micros: row.8,
        source,
        system_from: row.10,
        system_to,
    })
}

const POSITION_COLUMNS: &str = "p.account_id, p.product_id, p.position_type, p.business_date, \
                                p.batch_id, p.quantity_micros, p.price_micros, p.currency, \
                                p.market_value_micros, p.source, p.system_from, p.system_to";

/// Open rows of the ACTIVE batch for (account, business date).
pub async fn get_active_positions(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<Vec<StoredPosition>> {
    let rows: Vec<PositionRow> = sqlx::query_as(&format!(
        r#"
        select {POSITION_COLUMNS}
        from positions p
        join batches b on b.account_id = p.account_id and b.batch_id = p.batch_id
        where p.account_id = $1 and b.business_date = $2
          and b.status = 'ACTIVE' and p.system_to = $3
        order by p.product_id, p.position_type
        "#
    ))
    .bind(account_id)
    .bind(business_date)
    .bind(far_future())
    .fetch_all(pool)
    .await
    .context("fetch active positions")?;

    rows.into_iter().map(to_stored).collect()
}

/// Positions for a business date: the ACTIVE batch when one exists,
/// otherwise the final state of the most recent ARCHIVED batch. STAGING is
/// never readable.
pub async fn get_positions_by_date(
    pool: &PgPool,
    account_id: &str,
    business_date: NaiveDate,
) -> Result<Vec<StoredPosition>> {
    let batch: Option<(i64, String, Option<DateTime<Utc>>)> = sqlx::query_as(
        r#"
        select batch_id, status, archived_at
        from batches
        where account_id = $1 and business_date = $2 and status in ('ACTIVE','ARCHIVED')
        order by case status when 'ACTIVE' then 0 else 1 end, batch_id desc
        limit 1
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(pool)
    .await
    .context("resolve readable batch for date")?;

    let Some((batch_id, status, archived_at)) = batch else {
        return Ok(Vec::new());
    };

    // For ACTIVE, read open rows; for ARCHIVED, the rows in force at the
    // instant the batch was archived.
    let boundary = if status == BatchStatus::Active.as_str() {
        far_future()
    } else {
        archived_at.with_context(|| {
            format!("archived batch {batch_id} for {account_id} lacks archived_at")
        })?
    };

    let rows: Vec<PositionRow> = sqlx::query_as(&format!(
        r#"
        select {POSITION_COLUMNS}
        from positions p
        where p.account_id = $1 and p.batch_id = $2 and p.system_to = $3
        order by p.product_id, p.position_type
        "#
    ))
    .bind(account_id)
    .bind(batch_id)
    .bind(boundary)
    .fetch_all(pool)
    .await
    .context("fetch positions by date")?;

    rows.into_iter().map(to_stored).collect()
}

/// Bitemporal read law: the quantity in force at system time `at` for
/// (account, product, business date), summed across position types.
/// `None` when no row was in force at `at`.
pub async fn get_quantity_as_of(
    pool: &PgPool,
    account_id: &str,
    product_id: &str,
    business_date: NaiveDate,
    at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        select sum(quantity_micros)::bigint
        from positions
        where account_id = $1 and product_id = $2 and business_date = $3
          and system_from <= $4 and system_to > $4
        having count(*) > 0
        "#,
    )
    .bind(account_id)
    .bind(product_id)
    .bind(business_date)
    .bind(at)
    .fetch_optional(pool)
    .await
    .context("as-of quantity query")?;

    Ok(row.map(|(q,)| q))
}

/// Intraday / manual adjustment: close the current row and insert its
/// successor inside the ACTIVE batch. Requires an ACTIVE batch for the
/// business date.
#[allow(clippy::too_many_arguments)]
pub async fn update_position_bitemporal(
    pool: &PgPool,
    account_id: &str,
    product_id: &str,
    position_type: &str,
    business_date: NaiveDate,
    quantity_micros: i64,
    price_micros: i64,
    market_value_micros: i64,
    currency: &str,
    source: PositionSource,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin bitemporal update")?;
    account_lock(&mut tx, account_id).await?;

    let batch: Option<(i64,)> = sqlx::query_as(
        r#"
        select batch_id from batches
        where account_id = $1 and business_date = $2 and status = 'ACTIVE'
        "#,
    )
    .bind(account_id)
    .bind(business_date)
    .fetch_optional(&mut *tx)
    .await
    .context("resolve active batch for update")?;

    let Some((batch_id,)) = batch else {
        anyhow::bail!("no ACTIVE batch for account {account_id} on {business_date}");
    };

    let now = Utc::now();
    let sentinel = far_future();

    let closed = sqlx::query(
        r#"
        update positions set system_to = $5
        where account_id = $1 and product_id = $2 and position_type = $3
          and business_date = $4 and batch_id = $6 and system_to = $7
        "#,
    )
    .bind(account_id)
    .bind(product_id)
    .bind(position_type)
    .bind(business_date)
    .bind(now)
    .bind(batch_id)
    .bind(sentinel)
    .execute(&mut *tx)
    .await
    .context("close current row")?;

    sqlx::query(
        r#"
        insert into positions (account_id, product_id, position_type, business_date, batch_id,
                               quantity_micros, price_micros, currency, market_value_micros,
                               source, system_from, system_to)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(account_id)
    .bind(product_id)
    .bind(position_type)
    .bind(business_date)
    .bind(batch_id)
    .bind(quantity_micros)
    .bind(price_micros)
    .bind(currency)
    .bind(market_value_micros)
    .bind(source.as_str())
    .bind(now)
    .bind(sentinel)
    .execute(&mut *tx)
    .await
    .context("insert successor row")?;

    // A brand-new product grows the batch's position count.
    if closed.rows_affected() == 0 {
        sqlx::query(
            "update batches set position_count = position_count + 1 \
             where account_id = $1 and batch_id = $2",
        )
        .bind(account_id)
        .bind(batch_id)
        .execute(&mut *tx)
        .await
        .context("bump batch position_count")?;
    }

    tx.commit().await.context("commit bitemporal update")?;
    Ok(())
}
