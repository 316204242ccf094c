use super::standard::StandardOAuth2;
use super::{
    ProviderAdapter, ProviderCredentials, ProviderDescriptor, expect_success, read_json,
};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "google";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "YouTube".to_string(),
        authorize_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
        identity_endpoint: "https://www.googleapis.com/youtube/v3/channels".to_string(),
        revocation_endpoint: Some("https://oauth2.googleapis.com/revoke".to_string()),
        token_verification_endpoint: Some("https://oauth2.googleapis.com/tokeninfo".to_string()),
        scopes: [
            "openid",
            "https://www.googleapis.com/auth/youtube.upload",
            "https://www.googleapis.com/auth/youtube.readonly",
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

/// Google OAuth for YouTube channels. Requests offline access so a refresh token is issued.
#[derive(Clone)]
pub struct GoogleProvider {
    oauth: StandardOAuth2,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    snippet: ChannelSnippet,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: Option<String>,
    #[serde(rename = "customUrl")]
    custom_url: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
}

impl GoogleProvider {
    pub fn new(credentials: ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_descriptor(descriptor(), credentials, http)
    }

    pub fn with_descriptor(
        descriptor: ProviderDescriptor,
        credentials: ProviderCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            oauth: StandardOAuth2::new(descriptor, credentials, http)
                .with_authorize_param("access_type", "offline")
                .with_authorize_param("prompt", "consent")
                .with_authorize_param("include_granted_scopes", "true"),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.oauth.descriptor()
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        self.oauth.authorization_url(request)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> ConnectionResult<TokenSet> {
        self.oauth.exchange_code(code, code_verifier).await
    }

    async fn verify_token(&self, access_token: &str) -> ConnectionResult<bool> {
        let Some(endpoint) = &self.descriptor().token_verification_endpoint else {
            return Ok(true);
        };

        let info: TokenInfo = read_json(
            self.oauth
                .http()
                .post(endpoint)
                .form(&[("access_token", access_token)])
                .send()
                .await,
            "Google tokeninfo",
            ConnectionError::Provider,
        )
        .await?;

        Ok(info.aud.as_deref() == Some(self.oauth.credentials().client_id.as_str()))
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        _target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity> {
        let channels: ChannelList = read_json(
            self.oauth
                .http()
                .get(&self.descriptor().identity_endpoint)
                .query(&[("part", "snippet"), ("mine", "true")])
                .bearer_auth(access_token)
                .send()
                .await,
            "YouTube channels endpoint",
            ConnectionError::Identity,
        )
        .await?;

        let channel = channels.items.into_iter().next().ok_or_else(|| {
            ConnectionError::Identity("Google account has no YouTube channel".to_string())
        })?;

        Ok(ProviderIdentity {
            provider_account_id: channel.id,
            display_name: channel.snippet.title,
            avatar_url: channel
                .snippet
                .thumbnails
                .and_then(|t| t.default)
                .map(|t| t.url),
            extra: json!({ "customUrl": channel.snippet.custom_url }),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.oauth.refresh(refresh_token).await
    }

    async fn revoke(&self, access_token: &str) -> ConnectionResult<()> {
        let Some(endpoint) = &self.descriptor().revocation_endpoint else {
            return Ok(());
        };
        expect_success(
            self.oauth
                .http()
                .post(endpoint)
                .form(&[("token", access_token)])
                .send()
                .await,
            "Google revoke endpoint",
        )
        .await
    }
}
