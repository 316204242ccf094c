//! RFC 6749 authorization-code plumbing on top of the `oauth2` crate.
//!
//! Adapters whose token endpoints return spec-compliant JSON (with
//! `token_type`) delegate their authorize URL, code exchange and refresh here.

use super::{ProviderCredentials, ProviderDescriptor};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, TokenSet};
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Clone)]
pub struct StandardOAuth2 {
    descriptor: ProviderDescriptor,
    credentials: ProviderCredentials,
    http: reqwest::Client,
    auth_type: AuthType,
    use_pkce: bool,
    extra_params: Vec<(String, String)>,
}

impl StandardOAuth2 {
    pub fn new(
        descriptor: ProviderDescriptor,
        credentials: ProviderCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            descriptor,
            credentials,
            http,
            auth_type: AuthType::BasicAuth,
            use_pkce: false,
            extra_params: Vec::new(),
        }
    }

    /// Send client credentials in the form body instead of HTTP Basic.
    pub fn with_credentials_in_body(mut self) -> Self {
        self.auth_type = AuthType::RequestBody;
        self
    }

    pub fn with_pkce(mut self) -> Self {
        self.use_pkce = true;
        self
    }

    pub fn with_authorize_param(mut self, name: &str, value: &str) -> Self {
        self.extra_params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn credentials(&self) -> &ProviderCredentials {
        &self.credentials
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn client(&self) -> ConnectionResult<ConfiguredClient> {
        let id = &self.descriptor.id;
        let auth_url = AuthUrl::new(self.descriptor.authorize_endpoint.clone()).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid authorize URL for {}: {}", id, e))
        })?;
        let token_url = TokenUrl::new(self.descriptor.token_endpoint.clone()).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid token URL for {}: {}", id, e))
        })?;
        let redirect_url = RedirectUrl::new(self.credentials.redirect_uri.clone()).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid redirect URI for {}: {}", id, e))
        })?;

        Ok(
            BasicClient::new(ClientId::new(self.credentials.client_id.clone()))
                .set_client_secret(ClientSecret::new(self.credentials.client_secret.clone()))
                .set_auth_uri(auth_url)
                .set_token_uri(token_url)
                .set_redirect_uri(redirect_url)
                .set_auth_type(self.auth_type.clone()),
        )
    }

    pub fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        let client = self.client()?;
        let mut auth_request = client.authorize_url(|| CsrfToken::new(request.state.clone()));

        if self.descriptor.scope_delimiter == " " {
            for scope in &self.descriptor.scopes {
                auth_request = auth_request.add_scope(Scope::new(scope.clone()));
            }
        } else if !self.descriptor.scopes.is_empty() {
            auth_request = auth_request.add_extra_param("scope", self.descriptor.joined_scopes());
        }

        for (name, value) in &self.extra_params {
            auth_request = auth_request.add_extra_param(name.clone(), value.clone());
        }

        if self.use_pkce {
            let verifier = PkceCodeVerifier::new(request.code_verifier.clone());
            auth_request =
                auth_request.set_pkce_challenge(PkceCodeChallenge::from_code_verifier_sha256(&verifier));
        }

        let (url, _) = auth_request.url();
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> ConnectionResult<TokenSet> {
        let client = self.client()?;
        let mut token_request = client.exchange_code(AuthorizationCode::new(code.to_string()));
        if self.use_pkce {
            token_request =
                token_request.set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()));
        }

        let response = token_request
            .request_async(&self.http)
            .await
            .map_err(|e| ConnectionError::TokenExchange(self.describe(&e)))?;

        Ok(into_token_set(&response))
    }

    pub async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        let client = self.client()?;
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| ConnectionError::Provider(self.describe(&e)))?;

        Ok(into_token_set(&response))
    }

    /// Summarise an oauth2 error without the response body.
    fn describe<RE>(&self, err: &RequestTokenError<RE, BasicErrorResponse>) -> String
    where
        RE: std::error::Error + 'static,
    {
        let id = &self.descriptor.id;
        match err {
            RequestTokenError::ServerResponse(resp) => {
                format!("{} token endpoint rejected the request ({})", id, resp.error())
            }
            RequestTokenError::Request(_) => format!("{} token endpoint unreachable", id),
            RequestTokenError::Parse(_, _) => format!("{} token endpoint returned a malformed body", id),
            RequestTokenError::Other(_) => format!("{} token endpoint returned an unexpected response", id),
        }
    }
}

fn into_token_set<T: TokenResponse>(response: &T) -> TokenSet {
    TokenSet {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response.expires_in().map(|d| d.as_secs()),
        scope: response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::google;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            redirect_uri: "https://app.test/api/auth/google/callback".into(),
        }
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            state: "signed.state".into(),
            target_platform: None,
            code_verifier: "v".repeat(43),
        }
    }

    #[test]
    fn authorization_url_carries_required_params() {
        let client = StandardOAuth2::new(google::descriptor(), credentials(), reqwest::Client::new())
            .with_authorize_param("access_type", "offline");

        let url = oauth2::url::Url::parse(&client.authorization_url(&request()).unwrap()).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "https://app.test/api/auth/google/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "signed.state");
        assert_eq!(params["access_type"], "offline");
        assert!(params["scope"].contains("youtube"));
        assert!(!params.contains_key("code_challenge"));
    }

    #[test]
    fn pkce_adds_s256_challenge() {
        let client =
            StandardOAuth2::new(google::descriptor(), credentials(), reqwest::Client::new()).with_pkce();
        let url = client.authorization_url(&request()).unwrap();
        assert!(url.contains("code_challenge="));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn exchange_maps_token_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok1",
                "refresh_token": "ref1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "openid email"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StandardOAuth2::new(
            google::descriptor().rebased(&server.uri()),
            credentials(),
            reqwest::Client::new(),
        );
        let tokens = client.exchange_code("abc123", "unused").await.unwrap();

        assert_eq!(tokens.access_token, "tok1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.scope.as_deref(), Some("openid email"));
    }

    #[tokio::test]
    async fn rejected_exchange_hides_provider_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Code was already redeemed for account 998877"
            })))
            .mount(&server)
            .await;

        let client = StandardOAuth2::new(
            google::descriptor().rebased(&server.uri()),
            credentials(),
            reqwest::Client::new(),
        );
        let err = client.exchange_code("used", "unused").await.unwrap_err();

        assert!(matches!(err, ConnectionError::TokenExchange(_)));
        assert!(err.to_string().contains("invalid_grant"));
        assert!(!err.to_string().contains("998877"));
    }
}
