use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ConnectionResult;
use crate::models::{OAuthConnection, RotatedTokens, UpsertConnection};

/// Persistence for connections, at most one per `(profile_id, provider)`.
///
/// `upsert` must be atomic on that pair; the engine relies on it instead of
/// locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert, or overwrite the existing row for the same profile and provider
    async fn upsert(&self, input: UpsertConnection) -> ConnectionResult<OAuthConnection>;

    async fn find(&self, profile_id: &str, provider: &str)
    -> ConnectionResult<Option<OAuthConnection>>;

    async fn list_for_profile(&self, profile_id: &str) -> ConnectionResult<Vec<OAuthConnection>>;

    /// Write refreshed tokens. Returns false when the row no longer exists.
    async fn update_tokens(
        &self,
        profile_id: &str,
        provider: &str,
        tokens: RotatedTokens,
    ) -> ConnectionResult<bool>;

    /// Returns true if a row was removed
    async fn delete(&self, profile_id: &str, provider: &str) -> ConnectionResult<bool>;
}

type Key = (String, String);

/// In-memory implementation for tests and local development
#[derive(Clone, Default)]
pub struct InMemoryConnectionRepository {
    connections: Arc<RwLock<HashMap<Key, OAuthConnection>>>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Place a row as-is, bypassing upsert bookkeeping.
    pub async fn insert_raw(&self, connection: OAuthConnection) {
        let key = (connection.profile_id.clone(), connection.provider.clone());
        self.connections.write().await.insert(key, connection);
    }
}

fn key(profile_id: &str, provider: &str) -> Key {
    (profile_id.to_string(), provider.to_string())
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn upsert(&self, input: UpsertConnection) -> ConnectionResult<OAuthConnection> {
        let now = Utc::now();
        let mut connections = self.connections.write().await;

        let connection = match connections.remove(&key(&input.profile_id, &input.provider)) {
            Some(existing) => OAuthConnection {
                provider_account_id: input.provider_account_id,
                access_token_enc: input.access_token_enc,
                refresh_token_enc: input.refresh_token_enc,
                scope: input.scope,
                expires_at: input.expires_at,
                metadata: input.metadata,
                updated_at: now,
                ..existing
            },
            None => OAuthConnection {
                id: Uuid::now_v7(),
                profile_id: input.profile_id,
                provider: input.provider,
                provider_account_id: input.provider_account_id,
                access_token_enc: input.access_token_enc,
                refresh_token_enc: input.refresh_token_enc,
                scope: input.scope,
                expires_at: input.expires_at,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
            },
        };

        tracing::info!(
            profile_id = %connection.profile_id,
            provider = %connection.provider,
            "Upserted connection"
        );
        connections.insert(
            (connection.profile_id.clone(), connection.provider.clone()),
            connection.clone(),
        );
        Ok(connection)
    }

    async fn find(
        &self,
        profile_id: &str,
        provider: &str,
    ) -> ConnectionResult<Option<OAuthConnection>> {
        let connections = self.connections.read().await;
        Ok(connections.get(&key(profile_id, provider)).cloned())
    }

    async fn list_for_profile(&self, profile_id: &str) -> ConnectionResult<Vec<OAuthConnection>> {
        let connections = self.connections.read().await;
        let mut list: Vec<_> = connections
            .values()
            .filter(|c| c.profile_id == profile_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(list)
    }

    async fn update_tokens(
        &self,
        profile_id: &str,
        provider: &str,
        tokens: RotatedTokens,
    ) -> ConnectionResult<bool> {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.get_mut(&key(profile_id, provider)) else {
            return Ok(false);
        };

        connection.access_token_enc = tokens.access_token_enc;
        if let Some(refresh) = tokens.refresh_token_enc {
            connection.refresh_token_enc = Some(refresh);
        }
        if let Some(scope) = tokens.scope {
            connection.scope = Some(scope);
        }
        connection.expires_at = tokens.expires_at;
        connection.updated_at = Utc::now();

        tracing::info!(profile_id = %profile_id, provider = %provider, "Rotated connection tokens");
        Ok(true)
    }

    async fn delete(&self, profile_id: &str, provider: &str) -> ConnectionResult<bool> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&key(profile_id, provider)).is_some();
        if removed {
            tracing::info!(profile_id = %profile_id, provider = %provider, "Deleted connection");
        }
        Ok(removed)
    }
}
