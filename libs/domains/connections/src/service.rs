use chrono::{DateTime, Utc};
use oauth2::url::Url;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::config::ConnectionsConfig;
use crate::crypto::TokenVault;
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{
    AuthorizationRequest, CallbackOutcome, CallbackQuery, ConnectionStatus, OAuthConnection,
    ProviderIdentity, ProviderSummary, RotatedTokens, StartedFlow, UpsertConnection,
};
use crate::providers::{ProviderAdapter, ProviderRegistry, build_registry};
use crate::repository::ConnectionRepository;
use crate::state::{StateClaims, StateCodec, state_matches_cookie};

/// Error code for a consent screen the user declined.
pub const ACCESS_DENIED: &str = "ACCESS_DENIED";
/// Error code for a callback that carries neither `code` nor `error`.
pub const MISSING_CODE: &str = "MISSING_CODE";

const DENIAL_ERRORS: &[&str] = &["access_denied", "user_denied", "user_cancelled_login"];

/// How `connected` is derived for a row whose access token has expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiredConnectionPolicy {
    /// A stored row always counts as connected; expiry is only reported.
    #[default]
    RowExists,
    /// An expired token that cannot be refreshed counts as disconnected.
    RequireUsableToken,
}

impl ExpiredConnectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiredConnectionPolicy::RowExists => "row_exists",
            ExpiredConnectionPolicy::RequireUsableToken => "require_usable_token",
        }
    }
}

impl fmt::Display for ExpiredConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpiredConnectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row_exists" => Ok(ExpiredConnectionPolicy::RowExists),
            "require_usable_token" => Ok(ExpiredConnectionPolicy::RequireUsableToken),
            other => Err(format!(
                "unknown policy '{}', expected row_exists or require_usable_token",
                other
            )),
        }
    }
}

/// Engine knobs that do not belong to a single provider.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub app_base_url: String,
    pub success_path: String,
    pub failure_path: String,
    pub refresh_margin: chrono::Duration,
    pub expired_policy: ExpiredConnectionPolicy,
}

impl EngineSettings {
    pub fn new(app_base_url: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            success_path: "/settings/connections".to_string(),
            failure_path: "/settings/connections".to_string(),
            refresh_margin: chrono::Duration::seconds(60),
            expired_policy: ExpiredConnectionPolicy::default(),
        }
    }

    pub fn with_expired_policy(mut self, policy: ExpiredConnectionPolicy) -> Self {
        self.expired_policy = policy;
        self
    }
}

/// The OAuth connection engine.
///
/// Stateless between calls: flow state travels in the signed state token and
/// everything durable goes through the repository.
pub struct ConnectionService<R: ConnectionRepository> {
    registry: Arc<ProviderRegistry>,
    states: StateCodec,
    vault: TokenVault,
    repository: Arc<R>,
    settings: EngineSettings,
}

impl<R: ConnectionRepository> Clone for ConnectionService<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            states: self.states.clone(),
            vault: self.vault.clone(),
            repository: Arc::clone(&self.repository),
            settings: self.settings.clone(),
        }
    }
}

impl<R: ConnectionRepository> ConnectionService<R> {
    pub fn new(
        registry: ProviderRegistry,
        states: StateCodec,
        vault: TokenVault,
        repository: R,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            states,
            vault,
            repository: Arc::new(repository),
            settings,
        }
    }

    /// Wire the engine from configuration, building every enabled adapter.
    pub fn from_config(config: &ConnectionsConfig, repository: R) -> ConnectionResult<Self> {
        Ok(Self::new(
            build_registry(config)?,
            StateCodec::new(&config.state_secret),
            TokenVault::new(&config.token_encryption_key),
            repository,
            config.engine_settings(),
        ))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn states(&self) -> &StateCodec {
        &self.states
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Begin a connect flow: mint a state token and build the authorize URL.
    ///
    /// The caller pins `state.token` in the state cookie before redirecting.
    #[instrument(skip(self))]
    pub async fn start_oauth(
        &self,
        provider: &str,
        profile_id: &str,
        target_platform: Option<&str>,
    ) -> ConnectionResult<StartedFlow> {
        let adapter = self.registry.get(provider)?;

        if profile_id.trim().is_empty() {
            return Err(ConnectionError::NotAuthenticated);
        }
        if let Some(target) = target_platform
            && !adapter.descriptor().accepts_target(target)
        {
            return Err(ConnectionError::InvalidTargetPlatform {
                provider: provider.to_string(),
                target: target.to_string(),
            });
        }

        let state = self.states.issue(profile_id, provider, target_platform)?;
        let code_verifier = self.states.code_verifier_for(&state)?;

        let auth_url = adapter.authorization_url(&AuthorizationRequest {
            state: state.token.clone(),
            target_platform: target_platform.map(str::to_string),
            code_verifier,
        })?;

        tracing::info!(provider = %provider, profile_id = %profile_id, "Started OAuth flow");
        Ok(StartedFlow { auth_url, state })
    }

    /// Finish a connect flow. Never fails: every outcome is a redirect, and
    /// failures carry only a symbolic error code.
    #[instrument(skip(self, query, cookie_state), fields(has_code = query.code.is_some()))]
    pub async fn handle_callback(
        &self,
        provider: &str,
        query: CallbackQuery,
        cookie_state: Option<&str>,
    ) -> CallbackOutcome {
        if let Some(error) = query.error.as_deref() {
            let code = provider_error_code(error);
            tracing::info!(provider = %provider, error_code = code, "Provider reported an authorization error");
            return self.failure(provider, code);
        }

        let (adapter, claims) = match self.verify_callback(provider, &query, cookie_state) {
            Ok(verified) => verified,
            Err(err) => return self.fail_with(provider, &err),
        };

        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            tracing::warn!(provider = %provider, "Callback without authorization code");
            return self.failure(provider, MISSING_CODE);
        };

        match self.connect(adapter.as_ref(), &claims, code).await {
            Ok(connection) => {
                tracing::info!(
                    provider = %provider,
                    profile_id = %connection.profile_id,
                    provider_account_id = %connection.provider_account_id,
                    "Connected provider account"
                );
                CallbackOutcome {
                    success: true,
                    redirect_url: self.redirect(
                        &self.settings.success_path,
                        &[("provider", provider), ("connected", "true")],
                    ),
                    error_code: None,
                }
            }
            Err(err) => self.fail_with(provider, &err),
        }
    }

    /// Failure redirect for a callback whose query string could not be parsed.
    pub fn reject_malformed_callback(&self, provider: &str, reason: &str) -> CallbackOutcome {
        self.fail_with(
            provider,
            &ConnectionError::InvalidState(format!("malformed callback query: {}", reason)),
        )
    }

    /// Steps 2 and 3: registered provider, cookie binding, signed state.
    fn verify_callback(
        &self,
        provider: &str,
        query: &CallbackQuery,
        cookie_state: Option<&str>,
    ) -> ConnectionResult<(Arc<dyn ProviderAdapter>, StateClaims)> {
        let adapter = self.registry.get(provider)?;

        let state = query
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConnectionError::InvalidState("missing state parameter".to_string()))?;
        let cookie = cookie_state
            .ok_or_else(|| ConnectionError::InvalidState("missing state cookie".to_string()))?;
        if !state_matches_cookie(state, cookie) {
            return Err(ConnectionError::InvalidState(
                "state does not match cookie".to_string(),
            ));
        }

        let claims = self.states.verify(state, provider)?;
        Ok((adapter, claims))
    }

    /// Steps 4 to 9. Nothing is written unless every earlier step succeeded.
    async fn connect(
        &self,
        adapter: &dyn ProviderAdapter,
        claims: &StateClaims,
        code: &str,
    ) -> ConnectionResult<OAuthConnection> {
        let descriptor = adapter.descriptor();
        let code_verifier = self.states.code_verifier(claims);

        let mut tokens = adapter
            .exchange_code(code, &code_verifier)
            .await
            .map_err(as_exchange_error)?;

        if descriptor.supports_long_lived_exchange {
            tokens = adapter
                .exchange_for_long_lived_token(tokens)
                .await
                .map_err(as_exchange_error)?;
        }

        let token_verified = if descriptor.supports_verification() {
            let verified = match adapter.verify_token(&tokens.access_token).await {
                Ok(valid) => valid,
                Err(err) => {
                    tracing::warn!(provider = %descriptor.id, error = %err, "Token verification failed");
                    false
                }
            };
            if !verified {
                tracing::warn!(provider = %descriptor.id, "Provider did not confirm the access token");
            }
            Some(verified)
        } else {
            None
        };

        let identity = adapter
            .fetch_identity(&tokens.access_token, claims.target_platform.clone())
            .await
            .map_err(|err| match err {
                ConnectionError::Identity(_) => err,
                other => ConnectionError::Identity(other.to_string()),
            })?;
        if identity.provider_account_id.is_empty() {
            return Err(ConnectionError::Identity(
                "provider returned an empty account id".to_string(),
            ));
        }

        let access_token_enc = self.vault.encrypt(&tokens.access_token)?;
        let refresh_token_enc = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.vault.encrypt(t))
            .transpose()?;

        self.repository
            .upsert(UpsertConnection {
                profile_id: claims.profile_id.clone(),
                provider: descriptor.id.clone(),
                provider_account_id: identity.provider_account_id.clone(),
                access_token_enc,
                refresh_token_enc,
                scope: tokens.scope.clone(),
                expires_at: tokens.expires_at(Utc::now()),
                metadata: connection_metadata(
                    identity,
                    claims.target_platform.as_deref(),
                    token_verified,
                ),
            })
            .await
    }

    /// Status without decrypting anything.
    #[instrument(skip(self))]
    pub async fn get_connection_status(
        &self,
        provider: &str,
        profile_id: &str,
    ) -> ConnectionResult<ConnectionStatus> {
        let adapter = self.registry.get(provider)?;
        let status = match self.repository.find(profile_id, provider).await? {
            Some(connection) => self.status_for(adapter.as_ref(), &connection, Utc::now()),
            None => ConnectionStatus::disconnected(provider),
        };
        Ok(status)
    }

    /// Status for every registered provider the profile is connected to.
    #[instrument(skip(self))]
    pub async fn list_connections(&self, profile_id: &str) -> ConnectionResult<Vec<ConnectionStatus>> {
        let now = Utc::now();
        let connections = self.repository.list_for_profile(profile_id).await?;

        Ok(connections
            .iter()
            .filter_map(|connection| {
                let adapter = self.registry.get(&connection.provider).ok()?;
                Some(self.status_for(adapter.as_ref(), connection, now))
            })
            .collect())
    }

    pub fn list_providers(&self) -> Vec<ProviderSummary> {
        self.registry.summaries()
    }

    /// Plaintext access token, refreshed first when it expires within the
    /// configured margin.
    ///
    /// `TokenExpired` means the user has to reconnect; retrying will not help.
    #[instrument(skip(self))]
    pub async fn get_valid_access_token(
        &self,
        profile_id: &str,
        provider: &str,
    ) -> ConnectionResult<String> {
        let adapter = self.registry.get(provider)?;
        let connection = self
            .repository
            .find(profile_id, provider)
            .await?
            .ok_or_else(|| ConnectionError::NotConnected(provider.to_string()))?;

        let now = Utc::now();
        if !connection.expires_within(now, self.settings.refresh_margin) {
            return self.vault.decrypt(&connection.access_token_enc);
        }

        if !adapter.descriptor().supports_refresh {
            tracing::info!(provider = %provider, profile_id = %profile_id, "Token expired and provider cannot refresh");
            return Err(ConnectionError::TokenExpired(provider.to_string()));
        }

        self.rotate(adapter.as_ref(), &connection, now).await
    }

    /// Refresh now, regardless of remaining lifetime, and report the new status.
    #[instrument(skip(self))]
    pub async fn refresh_connection(
        &self,
        provider: &str,
        profile_id: &str,
    ) -> ConnectionResult<ConnectionStatus> {
        let adapter = self.registry.get(provider)?;
        if !adapter.descriptor().supports_refresh {
            return Err(ConnectionError::RefreshNotSupported(provider.to_string()));
        }

        let connection = self
            .repository
            .find(profile_id, provider)
            .await?
            .ok_or_else(|| ConnectionError::NotConnected(provider.to_string()))?;

        self.rotate(adapter.as_ref(), &connection, Utc::now()).await?;
        self.get_connection_status(provider, profile_id).await
    }

    /// Exchange the stored refresh token and persist the rotated tokens.
    async fn rotate(
        &self,
        adapter: &dyn ProviderAdapter,
        connection: &OAuthConnection,
        now: DateTime<Utc>,
    ) -> ConnectionResult<String> {
        let provider = connection.provider.as_str();
        let Some(refresh_token_enc) = connection.refresh_token_enc.as_deref() else {
            tracing::info!(provider = %provider, "No refresh token stored");
            return Err(ConnectionError::TokenExpired(provider.to_string()));
        };
        let refresh_token = self.vault.decrypt(refresh_token_enc)?;

        let tokens = match adapter.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                // A concurrent caller may have rotated a single-use refresh token first.
                if let Some(current) = self.repository.find(&connection.profile_id, provider).await?
                    && current.updated_at > connection.updated_at
                    && !current.expires_within(Utc::now(), self.settings.refresh_margin)
                {
                    tracing::info!(provider = %provider, profile_id = %connection.profile_id, "Using token rotated by a concurrent refresh");
                    return self.vault.decrypt(&current.access_token_enc);
                }
                tracing::warn!(provider = %provider, profile_id = %connection.profile_id, error = %err, "Token refresh failed");
                return Err(ConnectionError::TokenExpired(provider.to_string()));
            }
        };

        let rotated = RotatedTokens {
            access_token_enc: self.vault.encrypt(&tokens.access_token)?,
            refresh_token_enc: tokens
                .refresh_token
                .as_deref()
                .map(|t| self.vault.encrypt(t))
                .transpose()?,
            expires_at: tokens.expires_at(now),
            scope: tokens.scope.clone(),
        };

        if !self
            .repository
            .update_tokens(&connection.profile_id, provider, rotated)
            .await?
        {
            return Err(ConnectionError::NotConnected(provider.to_string()));
        }

        tracing::info!(provider = %provider, profile_id = %connection.profile_id, "Refreshed access token");
        Ok(tokens.access_token)
    }

    /// Remove the connection. Idempotent; revocation at the provider is
    /// attempted first and never blocks deletion.
    #[instrument(skip(self))]
    pub async fn disconnect_provider(&self, provider: &str, profile_id: &str) -> ConnectionResult<()> {
        let adapter = self.registry.get(provider)?;

        if let Some(connection) = self.repository.find(profile_id, provider).await? {
            match self.vault.decrypt(&connection.access_token_enc) {
                Ok(access_token) => {
                    if let Err(err) = adapter.revoke(&access_token).await {
                        tracing::warn!(provider = %provider, error = %err, "Revocation failed, deleting anyway");
                    }
                }
                Err(err) => {
                    tracing::warn!(provider = %provider, error = %err, "Skipping revocation, stored token unreadable");
                }
            }
        }

        if self.repository.delete(profile_id, provider).await? {
            tracing::info!(provider = %provider, profile_id = %profile_id, "Disconnected provider");
        }
        Ok(())
    }

    fn status_for(
        &self,
        adapter: &dyn ProviderAdapter,
        connection: &OAuthConnection,
        now: DateTime<Utc>,
    ) -> ConnectionStatus {
        let mut status = ConnectionStatus::from_connection(connection);

        if self.settings.expired_policy == ExpiredConnectionPolicy::RequireUsableToken {
            let expired = connection.expires_at.is_some_and(|at| at <= now);
            let refreshable =
                adapter.descriptor().supports_refresh && connection.refresh_token_enc.is_some();
            if expired && !refreshable {
                status.connected = false;
            }
        }
        status
    }

    fn fail_with(&self, provider: &str, err: &ConnectionError) -> CallbackOutcome {
        match err {
            ConnectionError::InvalidState(reason) => {
                tracing::warn!(provider = %provider, reason = %reason, "Rejected OAuth callback state");
            }
            ConnectionError::ExpiredState => {
                tracing::warn!(provider = %provider, "OAuth callback state expired");
            }
            other => {
                tracing::error!(provider = %provider, error_code = other.code(), error = %other, "OAuth callback failed");
            }
        }
        self.failure(provider, err.code())
    }

    fn failure(&self, provider: &str, code: &'static str) -> CallbackOutcome {
        CallbackOutcome {
            success: false,
            redirect_url: self.redirect(
                &self.settings.failure_path,
                &[("provider", provider), ("error", code)],
            ),
            error_code: Some(code),
        }
    }

    fn redirect(&self, path: &str, params: &[(&str, &str)]) -> String {
        let base = format!("{}{}", self.settings.app_base_url.trim_end_matches('/'), path);
        match Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params);
                url.into()
            }
            Err(err) => {
                tracing::error!(error = %err, "Invalid redirect base, falling back to path");
                path.to_string()
            }
        }
    }
}

fn provider_error_code(error: &str) -> &'static str {
    if DENIAL_ERRORS.contains(&error) {
        ACCESS_DENIED
    } else {
        "PROVIDER_ERROR"
    }
}

fn as_exchange_error(err: ConnectionError) -> ConnectionError {
    match err {
        ConnectionError::TokenExchange(_) => err,
        other => ConnectionError::TokenExchange(other.to_string()),
    }
}

fn connection_metadata(
    identity: ProviderIdentity,
    target_platform: Option<&str>,
    token_verified: Option<bool>,
) -> Value {
    let mut metadata = match identity.extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(name) = identity.display_name {
        metadata.insert("displayName".to_string(), Value::String(name));
    }
    if let Some(avatar) = identity.avatar_url {
        metadata.insert("avatarUrl".to_string(), Value::String(avatar));
    }
    if let Some(target) = target_platform {
        metadata.insert("targetPlatform".to_string(), Value::String(target.to_string()));
    }
    if let Some(verified) = token_verified {
        metadata.insert("tokenVerified".to_string(), Value::Bool(verified));
    }
    Value::Object(metadata)
}
