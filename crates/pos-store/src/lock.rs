//! Postgres-backed distributed scheduler lock.
//!
//! One row per job name; a lock is won by inserting the row or by stealing
//! an expired one. `locked_until` bounds how long a crashed holder can
//! block the job (`lock_at_most_for` semantics).

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Try to win the named lock for `at_most_for`. Returns `true` when this
/// caller holds it for the window.
pub async fn try_acquire_sched_lock(
    pool: &PgPool,
    name: &str,
    at_most_for: Duration,
) -> Result<bool> {
    let holder = Uuid::new_v4().to_string();
    let secs = at_most_for.as_secs_f64();

    let res = sqlx::query(
        r#"
        insert into sched_locks (name, locked_until, locked_by)
        values ($1, now() + make_interval(secs => $2), $3)
        on conflict (name) do update
        set locked_until = excluded.locked_until, locked_by = excluded.locked_by
        where sched_locks.locked_until < now()
        "#,
    )
    .bind(name)
    .bind(secs)
    .bind(&holder)
    .execute(pool)
    .await
    .context("scheduler lock upsert")?;

    Ok(res.rows_affected() == 1)
}

/// Adapter implementing the calendar crate's lock port.
pub struct PgSchedulerLock {
    pool: PgPool,
}

impl PgSchedulerLock {
    pub fn new(pool: PgPool) -> Self {
        PgSchedulerLock { pool }
    }
}

#[async_trait::async_trait]
impl pos_calendar::SchedulerLock for PgSchedulerLock {
    async fn try_acquire(&self, name: &str, at_most_for: Duration) -> bool {
        match try_acquire_sched_lock(&self.pool, name, at_most_for).await {
            Ok(won) => won,
            Err(e) => {
                warn!(lock = name, error = %e, "scheduler lock query failed; skipping run");
                false
            }
        }
    }
}
