use super::standard::StandardOAuth2;
use super::{
    ProviderAdapter, ProviderCredentials, ProviderDescriptor, expect_success, read_json,
};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "x";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "X".to_string(),
        authorize_endpoint: "https://twitter.com/i/oauth2/authorize".to_string(),
        token_endpoint: "https://api.twitter.com/2/oauth2/token".to_string(),
        identity_endpoint: "https://api.twitter.com/2/users/me".to_string(),
        revocation_endpoint: Some("https://api.twitter.com/2/oauth2/revoke".to_string()),
        token_verification_endpoint: None,
        scopes: ["tweet.read", "tweet.write", "users.read", "offline.access"]
            .into_iter()
            .map(String::from)
            .collect(),
        scope_delimiter: " ".to_string(),
        supports_refresh: true,
        supports_long_lived_exchange: false,
        target_platforms: Vec::new(),
    }
}

/// X (Twitter) OAuth 2.0 with PKCE. Refresh tokens rotate on every use.
#[derive(Clone)]
pub struct XProvider {
    oauth: StandardOAuth2,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: XUser,
}

#[derive(Debug, Deserialize)]
struct XUser {
    id: String,
    name: Option<String>,
    username: Option<String>,
    profile_image_url: Option<String>,
}

impl XProvider {
    pub fn new(credentials: ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_descriptor(descriptor(), credentials, http)
    }

    pub fn with_descriptor(
        descriptor: ProviderDescriptor,
        credentials: ProviderCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            oauth: StandardOAuth2::new(descriptor, credentials, http).with_pkce(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for XProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.oauth.descriptor()
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        self.oauth.authorization_url(request)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> ConnectionResult<TokenSet> {
        self.oauth.exchange_code(code, code_verifier).await
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        _target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity> {
        let envelope: UserEnvelope = read_json(
            self.oauth
                .http()
                .get(&self.descriptor().identity_endpoint)
                .query(&[("user.fields", "profile_image_url")])
                .bearer_auth(access_token)
                .send()
                .await,
            "X users/me endpoint",
            ConnectionError::Identity,
        )
        .await?;

        let user = envelope.data;
        Ok(ProviderIdentity {
            provider_account_id: user.id,
            display_name: user.name,
            avatar_url: user.profile_image_url,
            extra: json!({ "username": user.username }),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.oauth.refresh(refresh_token).await
    }

    async fn revoke(&self, access_token: &str) -> ConnectionResult<()> {
        let Some(endpoint) = &self.descriptor().revocation_endpoint else {
            return Ok(());
        };
        let credentials = self.oauth.credentials();
        expect_success(
            self.oauth
                .http()
                .post(endpoint)
                .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
                .form(&[("token", access_token), ("token_type_hint", "access_token")])
                .send()
                .await,
            "X revoke endpoint",
        )
        .await
    }
}
