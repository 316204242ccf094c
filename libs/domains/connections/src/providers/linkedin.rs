use super::{
    ProviderAdapter, ProviderCredentials, ProviderDescriptor, expect_success, read_json,
};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use oauth2::url::Url;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "linkedin";

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "LinkedIn".to_string(),
        authorize_endpoint: "https://www.linkedin.com/oauth/v2/authorization".to_string(),
        token_endpoint: "https://www.linkedin.com/oauth/v2/accessToken".to_string(),
        identity_endpoint: "https://api.linkedin.com/v2/userinfo".to_string(),
        revocation_endpoint: Some("https://www.linkedin.com/oauth/v2/revoke".to_string()),
        token_verification_endpoint: None,
        scopes: ["openid", "profile", "email", "w_member_social"]
            .into_iter()
            .map(String::from)
            .collect(),
        scope_delimiter: " ".to_string(),
        supports_refresh: true,
        supports_long_lived_exchange: false,
        target_platforms: Vec::new(),
    }
}

/// LinkedIn member posting. The token endpoint omits `token_type`, so requests are
/// issued directly instead of through the `oauth2` client.
#[derive(Clone)]
pub struct LinkedInProvider {
    descriptor: ProviderDescriptor,
    credentials: ProviderCredentials,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LinkedInToken {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
    picture: Option<String>,
    email: Option<String>,
}

impl LinkedInProvider {
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

    async fn token_request(
        &self,
        grant: &[(&str, &str)],
        into_error: fn(String) -> ConnectionError,
    ) -> ConnectionResult<TokenSet> {
        let mut form = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let token: LinkedInToken = read_json(
            self.http
                .post(&self.descriptor.token_endpoint)
                .form(&form)
                .send()
                .await,
            "LinkedIn token endpoint",
            into_error,
        )
        .await?;

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            scope: token.scope,
        })
    }
}

#[async_trait]
impl ProviderAdapter for LinkedInProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        let mut url = Url::parse(&self.descriptor.authorize_endpoint).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid LinkedIn authorize URL: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &self.credentials.redirect_uri)
            .append_pair("state", &request.state)
            .append_pair("scope", &self.descriptor.joined_scopes());

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
        let user: UserInfo = read_json(
            self.http
                .get(&self.descriptor.identity_endpoint)
                .bearer_auth(access_token)
                .send()
                .await,
            "LinkedIn userinfo endpoint",
            ConnectionError::Identity,
        )
        .await?;

        Ok(ProviderIdentity {
            provider_account_id: user.sub.clone(),
            display_name: user.name,
            avatar_url: user.picture,
            extra: json!({
                "email": user.email,
                "authorUrn": format!("urn:li:person:{}", user.sub),
            }),
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
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("token", access_token),
                ])
                .send()
                .await,
            "LinkedIn revoke endpoint",
        )
        .await
    }
}
