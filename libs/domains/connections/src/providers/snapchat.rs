use super::standard::StandardOAuth2;
use super::{ProviderAdapter, ProviderCredentials, ProviderDescriptor, read_json};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "snapchat";

const ME_QUERY: &str = "{me{externalId displayName bitmoji{avatar}}}";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "Snapchat".to_string(),
        authorize_endpoint: "https://accounts.snapchat.com/login/oauth2/authorize".to_string(),
        token_endpoint: "https://accounts.snapchat.com/login/oauth2/access_token".to_string(),
        identity_endpoint: "https://kit.snapchat.com/v1/me".to_string(),
        revocation_endpoint: None,
        token_verification_endpoint: None,
        scopes: [
            "https://auth.snapchat.com/oauth2/api/user.display_name",
            "https://auth.snapchat.com/oauth2/api/user.bitmoji.avatar",
            "https://auth.snapchat.com/oauth2/api/user.external_id",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        scope_delimiter: " ".to_string(),
        supports_refresh: true,
        supports_long_lived_exchange: false,
        target_platforms: Vec::new(),
    }
}

#[derive(Clone)]
pub struct SnapchatProvider {
    oauth: StandardOAuth2,
}

#[derive(Debug, Deserialize)]
struct MeEnvelope {
    data: MeData,
}

#[derive(Debug, Deserialize)]
struct MeData {
    me: SnapUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapUser {
    external_id: String,
    display_name: Option<String>,
    bitmoji: Option<Bitmoji>,
}

#[derive(Debug, Deserialize)]
struct Bitmoji {
    avatar: Option<String>,
}

impl SnapchatProvider {
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
impl ProviderAdapter for SnapchatProvider {
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
        let envelope: MeEnvelope = read_json(
            self.oauth
                .http()
                .get(&self.descriptor().identity_endpoint)
                .query(&[("query", ME_QUERY)])
                .bearer_auth(access_token)
                .send()
                .await,
            "Snap Kit me endpoint",
            ConnectionError::Identity,
        )
        .await?;

        let user = envelope.data.me;
        Ok(ProviderIdentity {
            provider_account_id: user.external_id,
            display_name: user.display_name,
            avatar_url: user.bitmoji.and_then(|b| b.avatar),
            extra: json!({}),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.oauth.refresh(refresh_token).await
    }
}
