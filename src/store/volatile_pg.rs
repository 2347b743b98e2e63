//! Volatile key/value store on `UNLOGGED` Postgres tables.
//!
//! Flow Overview:
//! 1) Plain values and counters live in `volatile_entries`, set members in
//!    `volatile_set_members`; both carry an optional `expires_at`.
//! 2) Reads filter on `expires_at` so an expired row is invisible even before
//!    it is purged.
//! 3) Races are settled by single statements: `INSERT .. ON CONFLICT ..
//!    RETURNING` for increments and `DELETE .. RETURNING` for conditional
//!    deletes and takes.
//!
//! Scaling: every server process shares the same tables, so counters, sessions
//! and token mirrors are consistent across instances.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

use super::{Counter, StoreError, VolatileStore};

const LIVE: &str = "(expires_at IS NULL OR expires_at > NOW())";

fn db_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.table = "volatile"
    )
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn ttl_from_millis(value: Option<i64>) -> Option<Duration> {
    value.map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
}

#[derive(Clone, Debug)]
pub struct PgVolatileStore {
    pool: PgPool,
}

impl PgVolatileStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VolatileStore for PgVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let query = format!("SELECT value FROM volatile_entries WHERE key = $1 AND {LIVE}");
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        row.map(|row| row.try_get("value").map_err(StoreError::from))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO volatile_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + $3::bigint * INTERVAL '1 millisecond')
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl.map(millis))
            .execute(&self.pool)
            .instrument(db_span("UPSERT"))
            .await?;
        Ok(())
    }

    async fn replace(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let query = format!("UPDATE volatile_entries SET value = $2 WHERE key = $1 AND {LIVE}");
        let result = sqlx::query(&query)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .instrument(db_span("UPDATE"))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let query = format!(
            r"
            WITH entries AS (
                DELETE FROM volatile_entries WHERE key = $1 RETURNING expires_at
            ), members AS (
                DELETE FROM volatile_set_members WHERE key = $1 RETURNING expires_at
            )
            SELECT
                (SELECT COUNT(*) FROM entries WHERE {LIVE})
                + (SELECT COUNT(*) FROM members WHERE {LIVE}) AS live
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_one(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        let live: i64 = row.try_get("live")?;
        Ok(live > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let query = format!(
            r"
            WITH taken AS (
                DELETE FROM volatile_entries WHERE key = $1 RETURNING value, expires_at
            )
            SELECT value FROM taken WHERE {LIVE}
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        row.map(|row| row.try_get("value").map_err(StoreError::from))
            .transpose()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let query = format!(
            r"
            WITH entries AS (
                UPDATE volatile_entries
                SET expires_at = NOW() + $2::bigint * INTERVAL '1 millisecond'
                WHERE key = $1 AND {LIVE}
                RETURNING key
            ), members AS (
                UPDATE volatile_set_members
                SET expires_at = NOW() + $2::bigint * INTERVAL '1 millisecond'
                WHERE key = $1 AND {LIVE}
                RETURNING key
            )
            SELECT (SELECT COUNT(*) FROM entries) + (SELECT COUNT(*) FROM members) AS touched
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .bind(millis(ttl))
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE"))
            .await?;
        let touched: i64 = row.try_get("touched")?;
        Ok(touched > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let query = format!(
            r"
            SELECT (EXTRACT(EPOCH FROM (MAX(expires_at) - NOW())) * 1000)::bigint AS ttl_ms
            FROM (
                SELECT expires_at FROM volatile_entries WHERE key = $1 AND {LIVE}
                UNION ALL
                SELECT expires_at FROM volatile_set_members WHERE key = $1 AND {LIVE}
            ) live_rows
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        Ok(ttl_from_millis(row.try_get("ttl_ms")?))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let query = format!(
            r"
            SELECT
                EXISTS (SELECT 1 FROM volatile_entries WHERE key = $1 AND {LIVE})
                OR EXISTS (SELECT 1 FROM volatile_set_members WHERE key = $1 AND {LIVE})
                AS present
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        // One statement: a lapsed window restarts at 1, a live one keeps its expiry.
        let query = r"
            INSERT INTO volatile_entries AS v (key, value, expires_at)
            VALUES ($1, '1', NOW() + $2::bigint * INTERVAL '1 millisecond')
            ON CONFLICT (key) DO UPDATE SET
                value = CASE
                    WHEN v.expires_at IS NOT NULL AND v.expires_at <= NOW() THEN '1'
                    ELSE (v.value::bigint + 1)::text
                END,
                expires_at = CASE
                    WHEN v.expires_at IS NOT NULL AND v.expires_at <= NOW() THEN EXCLUDED.expires_at
                    ELSE v.expires_at
                END
            RETURNING
                value::bigint AS value,
                (EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000)::bigint AS ttl_ms
        ";
        let row = sqlx::query(query)
            .bind(key)
            .bind(millis(ttl))
            .fetch_one(&self.pool)
            .instrument(db_span("UPSERT"))
            .await?;
        Ok(Counter {
            value: row.try_get("value")?,
            ttl: ttl_from_millis(row.try_get("ttl_ms")?).unwrap_or(ttl),
        })
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = r"
            INSERT INTO volatile_set_members (key, member, expires_at)
            VALUES ($1, $2, NOW() + $3::bigint * INTERVAL '1 millisecond')
            ON CONFLICT (key, member) DO UPDATE SET expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(key)
            .bind(member)
            .bind(ttl.map(millis))
            .execute(&mut *tx)
            .instrument(db_span("UPSERT"))
            .await?;

        if let Some(ttl) = ttl {
            let query = r"
                UPDATE volatile_set_members
                SET expires_at = NOW() + $2::bigint * INTERVAL '1 millisecond'
                WHERE key = $1
            ";
            sqlx::query(query)
                .bind(key)
                .bind(millis(ttl))
                .execute(&mut *tx)
                .instrument(db_span("UPDATE"))
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let query = format!(
            r"
            WITH removed AS (
                DELETE FROM volatile_set_members
                WHERE key = $1 AND member = $2
                RETURNING expires_at
            )
            SELECT COUNT(*) AS removed FROM removed WHERE {LIVE}
            "
        );
        let row = sqlx::query(&query)
            .bind(key)
            .bind(member)
            .fetch_one(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        let removed: i64 = row.try_get("removed")?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let query = format!(
            "SELECT member FROM volatile_set_members WHERE key = $1 AND {LIVE} ORDER BY member"
        );
        let rows = sqlx::query(&query)
            .bind(key)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("member").map_err(StoreError::from))
            .collect()
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let entries = sqlx::query("DELETE FROM volatile_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        let members = sqlx::query("DELETE FROM volatile_set_members WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        Ok(entries.rows_affected() + members.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(db_span("PING"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn negative_ttl_is_zero() {
        assert_eq!(ttl_from_millis(Some(-5)), Some(Duration::ZERO));
        assert_eq!(ttl_from_millis(None), None);
    }
}
