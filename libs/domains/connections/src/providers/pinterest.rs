use super::standard::StandardOAuth2;
use super::{ProviderAdapter, ProviderCredentials, ProviderDescriptor, read_json};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "pinterest";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "Pinterest".to_string(),
        authorize_endpoint: "https://www.pinterest.com/oauth/".to_string(),
        token_endpoint: "https://api.pinterest.com/v5/oauth/token".to_string(),
        identity_endpoint: "https://api.pinterest.com/v5/user_account".to_string(),
        revocation_endpoint: None,
        token_verification_endpoint: None,
        scopes: ["boards:read", "pins:read", "pins:write", "user_accounts:read"]
            .into_iter()
            .map(String::from)
            .collect(),
        scope_delimiter: ",".to_string(),
        supports_refresh: true,
        supports_long_lived_exchange: false,
        target_platforms: Vec::new(),
    }
}

/// Pinterest API v5. Comma-separated scopes, client credentials via HTTP Basic.
#[derive(Clone)]
pub struct PinterestProvider {
    oauth: StandardOAuth2,
}

#[derive(Debug, Deserialize)]
struct UserAccount {
    id: Option<String>,
    username: String,
    profile_image: Option<String>,
    account_type: Option<String>,
    business_name: Option<String>,
}

impl PinterestProvider {
    pub fn new(credentials: ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_descriptor(descriptor(), credentials, http)
    }

    pub fn with_descriptor(
        descriptor: ProviderDescriptor,
        credentials: ProviderCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            oauth: StandardOAuth2::new(descriptor, credentials, http),
        }
    }
}

#[async_trait]
impl ProviderAdapter for PinterestProvider {
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
        let account: UserAccount = read_json(
            self.oauth
                .http()
                .get(&self.descriptor().identity_endpoint)
                .bearer_auth(access_token)
                .send()
                .await,
            "Pinterest user_account endpoint",
            ConnectionError::Identity,
        )
        .await?;

        Ok(ProviderIdentity {
            // Older accounts are only addressable by username.
            provider_account_id: account.id.unwrap_or_else(|| account.username.clone()),
            display_name: account
                .business_name
                .or_else(|| Some(account.username.clone())),
            avatar_url: account.profile_image,
            extra: json!({
                "username": account.username,
                "accountType": account.account_type,
            }),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.oauth.refresh(refresh_token).await
    }
}
