//! PostgreSQL connection store.
//!
//! Expects the following table:
//!
//! ```sql
//! CREATE TABLE oauth_connections (
//!     id                  UUID PRIMARY KEY,
//!     profile_id          TEXT NOT NULL,
//!     provider            TEXT NOT NULL,
//!     provider_account_id TEXT NOT NULL,
//!     access_token_enc    TEXT NOT NULL,
//!     refresh_token_enc   TEXT,
//!     scope               TEXT,
//!     expires_at          TIMESTAMPTZ,
//!     metadata            JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     created_at          TIMESTAMPTZ NOT NULL,
//!     updated_at          TIMESTAMPTZ NOT NULL,
//!     UNIQUE (profile_id, provider)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{OAuthConnection, RotatedTokens, UpsertConnection};
use crate::repository::ConnectionRepository;

#[derive(Clone)]
pub struct PgConnectionRepository {
    db: DatabaseConnection,
}

impl PgConnectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct ConnectionRow {
    id: Uuid,
    profile_id: String,
    provider: String,
    provider_account_id: String,
    access_token_enc: String,
    refresh_token_enc: Option<String>,
    scope: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConnectionRow> for OAuthConnection {
    fn from(row: ConnectionRow) -> Self {
        Self {
            id: row.id,
            profile_id: row.profile_id,
            provider: row.provider,
            provider_account_id: row.provider_account_id,
            access_token_enc: row.access_token_enc,
            refresh_token_enc: row.refresh_token_enc,
            scope: row.scope,
            expires_at: row.expires_at,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn db_error(e: sea_orm::DbErr) -> ConnectionError {
    ConnectionError::Storage(format!("Database error: {}", e))
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn upsert(&self, input: UpsertConnection) -> ConnectionResult<OAuthConnection> {
        let now = Utc::now();

        // Single statement so concurrent callbacks for the same pair converge on one row.
        let sql = r#"
            INSERT INTO oauth_connections (
                id, profile_id, provider, provider_account_id, access_token_enc,
                refresh_token_enc, scope, expires_at, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (profile_id, provider) DO UPDATE SET
                provider_account_id = EXCLUDED.provider_account_id,
                access_token_enc = EXCLUDED.access_token_enc,
                refresh_token_enc = EXCLUDED.refresh_token_enc,
                scope = EXCLUDED.scope,
                expires_at = EXCLUDED.expires_at,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                Uuid::now_v7().into(),
                input.profile_id.into(),
                input.provider.into(),
                input.provider_account_id.into(),
                input.access_token_enc.into(),
                input.refresh_token_enc.into(),
                input.scope.into(),
                input.expires_at.into(),
                input.metadata.into(),
                now.into(),
            ],
        );

        let row = ConnectionRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ConnectionError::Storage("Upsert returned no row".to_string()))?;

        tracing::info!(profile_id = %row.profile_id, provider = %row.provider, "Upserted connection");
        Ok(row.into())
    }

    async fn find(
        &self,
        profile_id: &str,
        provider: &str,
    ) -> ConnectionResult<Option<OAuthConnection>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM oauth_connections WHERE profile_id = $1 AND provider = $2",
            [profile_id.into(), provider.into()],
        );

        let row = ConnectionRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_for_profile(&self, profile_id: &str) -> ConnectionResult<Vec<OAuthConnection>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM oauth_connections WHERE profile_id = $1 ORDER BY provider",
            [profile_id.into()],
        );

        let rows = ConnectionRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_tokens(
        &self,
        profile_id: &str,
        provider: &str,
        tokens: RotatedTokens,
    ) -> ConnectionResult<bool> {
        let sql = r#"
            UPDATE oauth_connections
            SET access_token_enc = $3,
                refresh_token_enc = COALESCE($4, refresh_token_enc),
                expires_at = $5,
                scope = COALESCE($6, scope),
                updated_at = $7
            WHERE profile_id = $1 AND provider = $2
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                profile_id.into(),
                provider.into(),
                tokens.access_token_enc.into(),
                tokens.refresh_token_enc.into(),
                tokens.expires_at.into(),
                tokens.scope.into(),
                Utc::now().into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await.map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, profile_id: &str, provider: &str) -> ConnectionResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM oauth_connections WHERE profile_id = $1 AND provider = $2",
            [profile_id.into(), provider.into()],
        );

        let result = self.db.execute_raw(stmt).await.map_err(db_error)?;
        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(profile_id = %profile_id, provider = %provider, "Deleted connection");
        }
        Ok(removed)
    }
}
