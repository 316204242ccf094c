use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Persisted link between one profile and one remote provider account.
///
/// Token columns only ever hold vault envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConnection {
    pub id: Uuid,
    pub profile_id: String,
    pub provider: String,
    pub provider_account_id: String,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthConnection {
    /// Whether the access token is expired, or will be within `margin`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + margin)
    }

    pub fn display_name(&self) -> Option<String> {
        self.metadata
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn avatar_url(&self) -> Option<String> {
        self.metadata
            .get("avatarUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Granted scopes, split on spaces or commas.
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope.as_deref().map(|raw| {
            raw.split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Input for an upsert keyed on `(profile_id, provider)`.
#[derive(Debug, Clone)]
pub struct UpsertConnection {
    pub profile_id: String,
    pub provider: String,
    pub provider_account_id: String,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// Token rotation written after a refresh.
#[derive(Debug, Clone)]
pub struct RotatedTokens {
    pub access_token_enc: String,
    /// `None` keeps the stored refresh token.
    pub refresh_token_enc: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` keeps the stored scope.
    pub scope: Option<String>,
}

/// Plaintext tokens returned by a provider. Only lives in memory.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + chrono::Duration::seconds(secs))
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Remote account as reported by a provider's "me" endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    pub provider_account_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Provider-specific extras (pages, boards, usernames).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Inputs an adapter needs to build its authorize URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub state: String,
    pub target_platform: Option<String>,
    /// Per-flow PKCE verifier. Adapters without PKCE ignore it.
    pub code_verifier: String,
}

/// Connection status as exposed to the rest of the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub provider: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            connected: false,
            provider_account_id: None,
            expires_at: None,
            scopes: None,
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn from_connection(connection: &OAuthConnection) -> Self {
        Self {
            provider: connection.provider.clone(),
            connected: true,
            provider_account_id: Some(connection.provider_account_id.clone()),
            expires_at: connection.expires_at,
            scopes: connection.scopes(),
            display_name: connection.display_name(),
            avatar_url: connection.avatar_url(),
        }
    }
}

/// Public summary of a registered provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub id: String,
    pub display_name: String,
    pub supports_refresh: bool,
    pub target_platforms: Vec<String>,
}

/// Query string a provider sends back to the callback route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of `start_oauth`: where to send the browser and the state to pin in a cookie.
#[derive(Debug, Clone)]
pub struct StartedFlow {
    pub auth_url: String,
    pub state: crate::state::IssuedState,
}

/// Result of `handle_callback`. The redirect never carries token material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub success: bool,
    pub redirect_url: String,
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub provider: String,
}
