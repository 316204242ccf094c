//! Provider adapters.
//!
//! Every supported network implements [`ProviderAdapter`]. The engine only
//! talks to this trait, so endpoint URLs, field names and quirks such as
//! Meta's long-lived token upgrade stay inside the adapter.

pub mod google;
pub mod linkedin;
pub mod meta;
pub mod pinterest;
pub mod registry;
pub mod snapchat;
pub mod standard;
pub mod tiktok;
pub mod x;

use crate::config::ConnectionsConfig;
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use registry::ProviderRegistry;

/// Static capabilities and endpoints of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub identity_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub token_verification_endpoint: Option<String>,
    pub scopes: Vec<String>,
    /// Joins `scopes` in the authorize URL (space for most, comma for a few).
    pub scope_delimiter: String,
    pub supports_refresh: bool,
    pub supports_long_lived_exchange: bool,
    /// Sub-surfaces selectable at start, e.g. `instagram` under Meta.
    pub target_platforms: Vec<String>,
}

impl ProviderDescriptor {
    pub fn supports_verification(&self) -> bool {
        self.token_verification_endpoint.is_some()
    }

    pub fn accepts_target(&self, target: &str) -> bool {
        self.target_platforms.iter().any(|t| t == target)
    }

    pub fn joined_scopes(&self) -> String {
        self.scopes.join(&self.scope_delimiter)
    }

    /// Point every endpoint at `base`, keeping each path.
    #[cfg(any(test, feature = "test-util"))]
    pub fn rebased(mut self, base: &str) -> Self {
        fn rebase(url: &str, base: &str) -> String {
            match oauth2::url::Url::parse(url) {
                Ok(parsed) => {
                    let mut out = format!("{}{}", base.trim_end_matches('/'), parsed.path());
                    if let Some(query) = parsed.query() {
                        out.push('?');
                        out.push_str(query);
                    }
                    out
                }
                Err(_) => url.to_string(),
            }
        }

        self.authorize_endpoint = rebase(&self.authorize_endpoint, base);
        self.token_endpoint = rebase(&self.token_endpoint, base);
        self.identity_endpoint = rebase(&self.identity_endpoint, base);
        self.revocation_endpoint = self.revocation_endpoint.map(|u| rebase(&u, base));
        self.token_verification_endpoint = self
            .token_verification_endpoint
            .map(|u| rebase(&u, base));
        self
    }
}

/// Client credentials and redirect URI for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Authorize URL carrying client id, redirect URI, scopes, response type and state.
    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String>;

    /// Trade an authorization code for tokens.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> ConnectionResult<TokenSet>;

    /// Upgrade a short-lived token. Providers without the capability return the input.
    async fn exchange_for_long_lived_token(&self, tokens: TokenSet) -> ConnectionResult<TokenSet> {
        Ok(tokens)
    }

    async fn verify_token(&self, _access_token: &str) -> ConnectionResult<bool> {
        Ok(true)
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity>;

    async fn refresh(&self, _refresh_token: &str) -> ConnectionResult<TokenSet> {
        Err(ConnectionError::RefreshNotSupported(
            self.descriptor().id.clone(),
        ))
    }

    /// Best-effort revocation. Callers log failures and carry on.
    async fn revoke(&self, _access_token: &str) -> ConnectionResult<()> {
        Ok(())
    }
}

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client shared by all adapters: bounded timeout, no redirects.
pub fn http_client(timeout: Duration) -> ConnectionResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("repurpose-connections/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConnectionError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Decode a provider JSON response.
///
/// Only the HTTP status reaches the error; bodies may contain identifiers or secrets.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Result<reqwest::Response>,
    what: &str,
    into_error: fn(String) -> ConnectionError,
) -> ConnectionResult<T> {
    let response = response.map_err(|e| into_error(describe_transport_error(what, &e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(into_error(format!("{} returned HTTP {}", what, status.as_u16())));
    }

    response
        .json::<T>()
        .await
        .map_err(|_| into_error(format!("{} returned a malformed body", what)))
}

/// Issue a request whose body is irrelevant, failing on non-2xx.
pub(crate) async fn expect_success(
    response: reqwest::Result<reqwest::Response>,
    what: &str,
) -> ConnectionResult<()> {
    let response =
        response.map_err(|e| ConnectionError::Provider(describe_transport_error(what, &e)))?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ConnectionError::Provider(format!(
            "{} returned HTTP {}",
            what,
            response.status().as_u16()
        )))
    }
}

fn describe_transport_error(what: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{} timed out", what)
    } else if err.is_connect() {
        format!("{} unreachable", what)
    } else {
        format!("{} request failed", what)
    }
}

/// Build the registry for every provider enabled in `config`.
///
/// A missing credential or an unknown provider id fails startup.
pub fn build_registry(config: &ConnectionsConfig) -> ConnectionResult<ProviderRegistry> {
    let http = http_client(config.http_timeout)?;
    let mut registry = ProviderRegistry::new();

    for (provider, credentials) in &config.providers {
        let credentials = credentials.clone();
        let adapter: Arc<dyn ProviderAdapter> = match provider.as_str() {
            meta::PROVIDER_ID => Arc::new(meta::MetaProvider::new(credentials, http.clone())),
            tiktok::PROVIDER_ID => Arc::new(tiktok::TikTokProvider::new(credentials, http.clone())),
            google::PROVIDER_ID => Arc::new(google::GoogleProvider::new(credentials, http.clone())),
            x::PROVIDER_ID => Arc::new(x::XProvider::new(credentials, http.clone())),
            linkedin::PROVIDER_ID => {
                Arc::new(linkedin::LinkedInProvider::new(credentials, http.clone()))
            }
            pinterest::PROVIDER_ID => {
                Arc::new(pinterest::PinterestProvider::new(credentials, http.clone()))
            }
            snapchat::PROVIDER_ID => {
                Arc::new(snapchat::SnapchatProvider::new(credentials, http.clone()))
            }
            other => {
                return Err(ConnectionError::Configuration(format!(
                    "No adapter available for provider '{}'",
                    other
                )));
            }
        };
        registry.register(adapter)?;
    }

    tracing::info!(providers = ?registry.ids(), "Provider registry initialized");
    Ok(registry)
}
