use super::{
    ProviderAdapter, ProviderCredentials, ProviderDescriptor, expect_success, read_json,
};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use oauth2::url::Url;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "tiktok";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "TikTok".to_string(),
        authorize_endpoint: "https://www.tiktok.com/v2/auth/authorize/".to_string(),
        token_endpoint: "https://open.tiktokapis.com/v2/oauth/token/".to_string(),
        identity_endpoint: "https://open.tiktokapis.com/v2/user/info/".to_string(),
        revocation_endpoint: Some("https://open.tiktokapis.com/v2/oauth/revoke/".to_string()),
        token_verification_endpoint: None,
        scopes: ["user.info.basic", "video.upload", "video.publish"]
            .into_iter()
            .map(String::from)
            .collect(),
        scope_delimiter: ",".to_string(),
        supports_refresh: true,
        supports_long_lived_exchange: false,
        target_platforms: Vec::new(),
    }
}

/// TikTok Login Kit v2. Identifies the app with `client_key` rather than `client_id`.
#[derive(Clone)]
pub struct TikTokProvider {
    descriptor: ProviderDescriptor,
    credentials: ProviderCredentials,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TikTokToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
    open_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoEnvelope {
    data: UserInfoData,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {
    user: TikTokUser,
}

#[derive(Debug, Deserialize)]
struct TikTokUser {
    open_id: String,
    union_id: Option<String>,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
}

impl TikTokProvider {
    pub fn new(credentials: ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_descriptor(descriptor(), credentials, http)
    }

    pub fn with_descriptor(
        descriptor: ProviderDescriptor,
        credentials: ProviderCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            descriptor,
            credentials,
            http,
        }
    }

    /// TikTok's name for the client id.
    fn client_key(&self) -> &str {
        &self.credentials.client_id
    }

    async fn token_request(
        &self,
        grant: &[(&str, &str)],
        into_error: fn(String) -> ConnectionError,
    ) -> ConnectionResult<TokenSet> {
        let mut form = vec![
            ("client_key", self.client_key()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let token: TikTokToken = read_json(
            self.http
                .post(&self.descriptor.token_endpoint)
                .form(&form)
                .send()
                .await,
            "TikTok token endpoint",
            into_error,
        )
        .await?;

        if token.open_id.is_none() {
            tracing::debug!(provider = PROVIDER_ID, "Token response without open_id");
        }

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            scope: token.scope,
        })
    }
}

#[async_trait]
impl ProviderAdapter for TikTokProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        let mut url = Url::parse(&self.descriptor.authorize_endpoint).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid TikTok authorize URL: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("client_key", self.client_key())
            .append_pair("redirect_uri", &self.credentials.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.descriptor.joined_scopes())
            .append_pair("state", &request.state);

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, _code_verifier: &str) -> ConnectionResult<TokenSet> {
        self.token_request(
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ],
            ConnectionError::TokenExchange,
        )
        .await
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        _target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity> {
        let envelope: UserInfoEnvelope = read_json(
            self.http
                .get(&self.descriptor.identity_endpoint)
                .query(&[("fields", "open_id,union_id,avatar_url,display_name")])
                .bearer_auth(access_token)
                .send()
                .await,
            "TikTok user info endpoint",
            ConnectionError::Identity,
        )
        .await?;

        if let Some(error) = envelope.error
            && error.code != "ok"
        {
            return Err(ConnectionError::Identity(format!(
                "TikTok user info returned error code {}",
                error.code
            )));
        }

        let user = envelope.data.user;
        Ok(ProviderIdentity {
            provider_account_id: user.open_id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            extra: json!({ "unionId": user.union_id }),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            ConnectionError::Provider,
        )
        .await
    }

    async fn revoke(&self, access_token: &str) -> ConnectionResult<()> {
        let Some(endpoint) = &self.descriptor.revocation_endpoint else {
            return Ok(());
        };
        expect_success(
            self.http
                .post(endpoint)
                .form(&[
                    ("client_key", self.client_key()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("token", access_token),
                ])
                .send()
                .await,
            "TikTok revoke endpoint",
        )
        .await
    }
}
