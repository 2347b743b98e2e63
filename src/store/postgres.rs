//! Postgres-backed durable store for identities and refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{CredentialRecord, DurableStore, RefreshTokenRecord, StoreError};
use crate::auth::identity::{Identity, LinkedProfiles, Role, Status};

const IDENTITY_SELECT: &str = r"
    SELECT
        u.id,
        u.email,
        u.password_hash,
        u.role::text AS role,
        u.status::text AS status,
        cp.id AS client_profile_id,
        sp.id AS supplier_profile_id,
        ARRAY(
            SELECT s.id FROM services s
            WHERE s.supplier_id = sp.id
            ORDER BY s.created_at
        ) AS service_ids
    FROM users u
    LEFT JOIN client_profiles cp ON cp.user_id = u.id
    LEFT JOIN supplier_profiles sp ON sp.user_id = u.id
";

fn db_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation
    )
}

#[derive(Clone, Debug)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn identity_from_row(row: &PgRow) -> Result<Identity, StoreError> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: role.parse::<Role>().map_err(StoreError::Corrupt)?,
        status: status.parse::<Status>().map_err(StoreError::Corrupt)?,
        profiles: LinkedProfiles {
            client_profile_id: row.try_get("client_profile_id")?,
            supplier_profile_id: row.try_get("supplier_profile_id")?,
            service_ids: row.try_get("service_ids")?,
        },
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<RefreshTokenRecord, StoreError> {
    let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
    Ok(RefreshTokenRecord {
        token_hash: row.try_get("token_hash")?,
        subject_id: row.try_get("user_id")?,
        expires_at,
    })
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn find_credentials(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let query = format!("{IDENTITY_SELECT} WHERE u.email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;

        row.map(|row| {
            Ok(CredentialRecord {
                identity: identity_from_row(&row)?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    async fn find_identity(&self, user_id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = format!("{IDENTITY_SELECT} WHERE u.id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE"))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let query =
            "INSERT INTO refresh_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)";
        sqlx::query(query)
            .bind(&record.token_hash)
            .bind(record.subject_id)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT"))
            .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = "SELECT token_hash, user_id, expires_at FROM refresh_tokens WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        // The row lock taken by DELETE serializes concurrent consumers; only one sees a row.
        let query = "DELETE FROM refresh_tokens WHERE token_hash = $1 RETURNING token_hash";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        Ok(row.is_some())
    }

    async fn delete_refresh_tokens_for(&self, subject_id: Uuid) -> Result<Vec<String>, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1 RETURNING token_hash";
        let rows = sqlx::query(query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("token_hash").map_err(StoreError::from))
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(db_span("PING"))
            .await?;
        Ok(())
    }
}
