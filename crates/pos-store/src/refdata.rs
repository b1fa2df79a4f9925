//! Reference-data upserts derived from snapshots, the holiday table, and
//! the client/account completion queries behind sign-off.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;

use pos_schemas::Snapshot;

/// Upsert the client, account and product rows a snapshot implies.
/// Runs before staging so foreign keys hold when positions land.
pub async fn upsert_reference_data(pool: &PgPool, snapshot: &Snapshot) -> Result<()> {
    let mut tx = pool.begin().await.context("begin refdata upsert")?;

    sqlx::query(
        r#"
        insert into clients (client_id) values ($1)
        on conflict (client_id) do nothing
        "#,
    )
    .bind(&snapshot.client_id)
    .execute(&mut *tx)
    .await
    .context("upsert client")?;

    sqlx::query(
        r#"
        insert into accounts (account_id, client_id)
        values ($1, $2)
        on conflict (account_id) do update set client_id = $2, updated_at = now()
        "#,
    )
    .bind(&snapshot.account_id)
    .bind(&snapshot.client_id)
    .execute(&mut *tx)
    .await
    .context("upsert account")?;

    for p in &snapshot.positions {
        if p.product_id.trim().is_empty() {
            continue;
        }
        sqlx::query(
            r#"
            insert into products (product_id, ticker, asset_class, issue_currency,
                                  settlement_currency, updated_at)
            values ($1, $2, $3, $4, $5, now())
            on conflict (product_id) do update
            set ticker = coalesce($2, products.ticker),
                asset_class = coalesce($3, products.asset_class),
                issue_currency = coalesce($4, products.issue_currency),
                settlement_currency = coalesce($5, products.settlement_currency),
                updated_at = now()
            "#,
        )
        .bind(p.product_id.trim())
        .bind(&p.ticker)
        .bind(&p.asset_class)
        .bind(&p.issue_currency)
        .bind(&p.settlement_currency)
        .execute(&mut *tx)
        .await
        .context("upsert product")?;
    }

    tx.commit().await.context("commit refdata upsert")?;
    Ok(())
}

/// The owning client of an account, if the account is known.
pub async fn client_of_account(pool: &PgPool, account_id: &str) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("select client_id from accounts where account_id = $1")
            .bind(account_id)
            .fetch_optional(pool)
            .await
            .context("resolve client of account")?;
    Ok(row.map(|(c,)| c))
}

/// Every known (account, client) pair, for run-all triggers and the
/// scheduled reconciliation sweep.
pub async fn list_accounts(pool: &PgPool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("select account_id, client_id from accounts order by account_id")
            .fetch_all(pool)
            .await
            .context("list accounts")?;
    Ok(rows)
}

/// Number of accounts belonging to the client.
pub async fn client_account_count(pool: &PgPool, client_id: &str) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from accounts where client_id = $1")
            .bind(client_id)
            .fetch_one(pool)
            .await
            .context("count client accounts")?;
    Ok(n)
}

/// How many of the client's accounts have COMPLETED EOD for the date.
pub async fn count_completed_accounts(
    pool: &PgPool,
    client_id: &str,
    business_date: NaiveDate,
) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
        from eod_status s
        join accounts a on a.account_id = s.account_id
        where a.client_id = $1 and s.business_date = $2 and s.status = 'COMPLETED'
        "#,
    )
    .bind(client_id)
    .bind(business_date)
    .fetch_one(pool)
    .await
    .context("count completed accounts")?;
    Ok(n)
}

/// Full holiday set, refreshed daily by the calendar task.
pub async fn load_holidays(pool: &PgPool) -> Result<HashSet<NaiveDate>> {
    let rows: Vec<(NaiveDate,)> = sqlx::query_as("select holiday_date from holidays")
        .fetch_all(pool)
        .await
        .context("load holidays")?;
    Ok(rows.into_iter().map(|(d,)| d).collect())
}

pub async fn insert_holiday(pool: &PgPool, date: NaiveDate, country: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into holidays (holiday_date, country) values ($1, $2)
        on conflict (holiday_date, country) do nothing
        "#,
    )
    .bind(date)
    .bind(country)
    .execute(pool)
    .await
    .context("insert holiday")?;
    Ok(())
}
