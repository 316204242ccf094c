use super::{
    ProviderAdapter, ProviderCredentials, ProviderDescriptor, expect_success, read_json,
};
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{AuthorizationRequest, ProviderIdentity, TokenSet};
use async_trait::async_trait;
use oauth2::url::Url;
use serde::Deserialize;
use serde_json::json;

pub const PROVIDER_ID: &str = "meta";

const GRAPH_VERSION: &str = "v19.0";
const INSTAGRAM_SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "business_management",
];

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        id: PROVIDER_ID.to_string(),
        display_name: "Meta".to_string(),
        authorize_endpoint: format!("https://www.facebook.com/{}/dialog/oauth", GRAPH_VERSION),
        token_endpoint: format!("https://graph.facebook.com/{}/oauth/access_token", GRAPH_VERSION),
        identity_endpoint: format!("https://graph.facebook.com/{}/me", GRAPH_VERSION),
        revocation_endpoint: Some(format!(
            "https://graph.facebook.com/{}/me/permissions",
            GRAPH_VERSION
        )),
        token_verification_endpoint: Some("https://graph.facebook.com/debug_token".to_string()),
        scopes: [
            "public_profile",
            "pages_show_list",
            "pages_read_engagement",
            "pages_manage_posts",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        scope_delimiter: ",".to_string(),
        supports_refresh: false,
        supports_long_lived_exchange: true,
        target_platforms: vec!["facebook".to_string(), "instagram".to_string()],
    }
}

/// Facebook Pages and Instagram business accounts via the Graph API.
#[derive(Clone)]
pub struct MetaProvider {
    descriptor: ProviderDescriptor,
    credentials: ProviderCredentials,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphToken {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DebugTokenEnvelope {
    data: DebugTokenData,
}

#[derive(Debug, Deserialize)]
struct DebugTokenData {
    #[serde(default)]
    is_valid: bool,
    app_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    name: Option<String>,
    picture: Option<GraphPicture>,
}

#[derive(Debug, Deserialize)]
struct GraphPicture {
    data: GraphPictureData,
}

#[derive(Debug, Deserialize)]
struct GraphPictureData {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphPages {
    #[serde(default)]
    data: Vec<GraphPage>,
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    id: String,
    name: Option<String>,
    instagram_business_account: Option<InstagramAccount>,
}

#[derive(Debug, Deserialize)]
struct InstagramAccount {
    id: String,
    username: Option<String>,
    profile_picture_url: Option<String>,
}

impl MetaProvider {
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

    fn scopes_for(&self, target_platform: Option<&str>) -> String {
        let mut scopes = self.descriptor.scopes.clone();
        if target_platform == Some("instagram") {
            scopes.extend(INSTAGRAM_SCOPES.iter().map(|s| s.to_string()));
        }
        scopes.join(&self.descriptor.scope_delimiter)
    }

    fn app_access_token(&self) -> String {
        format!("{}|{}", self.credentials.client_id, self.credentials.client_secret)
    }

    async fn fetch_pages(&self, access_token: &str) -> ConnectionResult<Vec<serde_json::Value>> {
        let pages: GraphPages = read_json(
            self.http
                .get(format!("{}/accounts", self.descriptor.identity_endpoint))
                .query(&[(
                    "fields",
                    "id,name,instagram_business_account{id,username,profile_picture_url}",
                )])
                .bearer_auth(access_token)
                .send()
                .await,
            "Meta pages endpoint",
            ConnectionError::Identity,
        )
        .await?;

        Ok(pages
            .data
            .into_iter()
            .map(|page| {
                json!({
                    "id": page.id,
                    "name": page.name,
                    "instagram": page.instagram_business_account.map(|ig| json!({
                        "id": ig.id,
                        "username": ig.username,
                        "profilePictureUrl": ig.profile_picture_url,
                    })),
                })
            })
            .collect())
    }
}

#[async_trait]
impl ProviderAdapter for MetaProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        let mut url = Url::parse(&self.descriptor.authorize_endpoint).map_err(|e| {
            ConnectionError::Configuration(format!("Invalid Meta authorize URL: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &self.credentials.redirect_uri)
            .append_pair("state", &request.state)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes_for(request.target_platform.as_deref()));

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, _code_verifier: &str) -> ConnectionResult<TokenSet> {
        let token: GraphToken = read_json(
            self.http
                .get(&self.descriptor.token_endpoint)
                .query(&[
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("redirect_uri", self.credentials.redirect_uri.as_str()),
                    ("code", code),
                ])
                .send()
                .await,
            "Meta token endpoint",
            ConnectionError::TokenExchange,
        )
        .await?;

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: None,
            expires_in: token.expires_in,
            scope: None,
        })
    }

    async fn exchange_for_long_lived_token(&self, tokens: TokenSet) -> ConnectionResult<TokenSet> {
        let token: GraphToken = read_json(
            self.http
                .get(&self.descriptor.token_endpoint)
                .query(&[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("fb_exchange_token", tokens.access_token.as_str()),
                ])
                .send()
                .await,
            "Meta long-lived token exchange",
            ConnectionError::TokenExchange,
        )
        .await?;

        Ok(TokenSet {
            access_token: token.access_token,
            expires_in: token.expires_in,
            ..tokens
        })
    }

    async fn verify_token(&self, access_token: &str) -> ConnectionResult<bool> {
        let Some(endpoint) = &self.descriptor.token_verification_endpoint else {
            return Ok(true);
        };

        let envelope: DebugTokenEnvelope = read_json(
            self.http
                .get(endpoint)
                .query(&[
                    ("input_token", access_token),
                    ("access_token", self.app_access_token().as_str()),
                ])
                .send()
                .await,
            "Meta debug_token",
            ConnectionError::Provider,
        )
        .await?;

        Ok(envelope.data.is_valid
            && envelope.data.app_id.as_deref() == Some(self.credentials.client_id.as_str()))
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity> {
        let user: GraphUser = read_json(
            self.http
                .get(&self.descriptor.identity_endpoint)
                .query(&[("fields", "id,name,picture.type(large)")])
                .bearer_auth(access_token)
                .send()
                .await,
            "Meta identity endpoint",
            ConnectionError::Identity,
        )
        .await?;

        let instagram = target_platform.as_deref() == Some("instagram");
        let pages = match self.fetch_pages(access_token).await {
            Ok(pages) => pages,
            Err(err) if !instagram => {
                tracing::warn!(provider = PROVIDER_ID, error = %err, "Pages lookup failed, storing none");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        if instagram && !pages.iter().any(|p| !p["instagram"].is_null()) {
            tracing::warn!(
                provider = PROVIDER_ID,
                "No Instagram business account linked to any Page"
            );
        }

        Ok(ProviderIdentity {
            provider_account_id: user.id,
            display_name: user.name,
            avatar_url: user.picture.and_then(|p| p.data.url),
            extra: json!({
                "targetPlatform": target_platform.unwrap_or_else(|| "facebook".to_string()),
                "pages": pages,
            }),
        })
    }

    async fn revoke(&self, access_token: &str) -> ConnectionResult<()> {
        let Some(endpoint) = &self.descriptor.revocation_endpoint else {
            return Ok(());
        };
        expect_success(
            self.http.delete(endpoint).bearer_auth(access_token).send().await,
            "Meta permissions endpoint",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "meta-app".into(),
            client_secret: "meta-secret".into(),
            redirect_uri: "https://app.test/api/auth/meta/callback".into(),
        }
    }

    async fn provider(server: &MockServer) -> MetaProvider {
        MetaProvider::with_descriptor(
            descriptor().rebased(&server.uri()),
            credentials(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn authorization_url_switches_scopes_for_instagram() {
        let meta = MetaProvider::new(credentials(), reqwest::Client::new());
        let request = |target: Option<&str>| AuthorizationRequest {
            state: "s.t".into(),
            target_platform: target.map(str::to_string),
            code_verifier: String::new(),
        };

        let facebook = meta.authorization_url(&request(None)).unwrap();
        assert!(facebook.starts_with("https://www.facebook.com/v19.0/dialog/oauth?"));
        assert!(facebook.contains("client_id=meta-app"));
        assert!(facebook.contains("state=s.t"));
        assert!(!facebook.contains("instagram_basic"));

        let instagram = meta.authorization_url(&request(Some("instagram"))).unwrap();
        assert!(instagram.contains("instagram_content_publish"));
    }

    #[tokio::test]
    async fn exchanges_code_then_upgrades_to_long_lived() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v19.0/oauth/access_token"))
            .and(query_param("code", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short", "token_type": "bearer", "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v19.0/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("fb_exchange_token", "short"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "long", "token_type": "bearer", "expires_in": 5_184_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let meta = provider(&server).await;
        let short = meta.exchange_code("abc123", "").await.unwrap();
        assert_eq!(short.access_token, "short");

        let long = meta.exchange_for_long_lived_token(short).await.unwrap();
        assert_eq!(long.access_token, "long");
        assert_eq!(long.expires_in, Some(5_184_000));
    }

    #[tokio::test]
    async fn debug_token_requires_matching_app() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/debug_token"))
            .and(query_param("access_token", "meta-app|meta-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"is_valid": true, "app_id": "some-other-app"}
            })))
            .mount(&server)
            .await;

        assert!(!provider(&server).await.verify_token("tok").await.unwrap());
    }

    #[tokio::test]
    async fn identity_includes_pages_and_instagram_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v19.0/me"))
            .and(header("authorization", "Bearer long"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1017",
                "name": "Jane Doe",
                "picture": {"data": {"url": "https://cdn.test/jane.png"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v19.0/me/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "page-1",
                    "name": "Jane's Bakery",
                    "instagram_business_account": {"id": "ig-9", "username": "janebakes"}
                }]
            })))
            .mount(&server)
            .await;

        let identity = provider(&server)
            .await
            .fetch_identity("long", Some("instagram".into()))
            .await
            .unwrap();

        assert_eq!(identity.provider_account_id, "1017");
        assert_eq!(identity.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(identity.avatar_url.as_deref(), Some("https://cdn.test/jane.png"));
        assert_eq!(identity.extra["targetPlatform"], "instagram");
        assert_eq!(identity.extra["pages"][0]["instagram"]["username"], "janebakes");
    }

    async fn mount_user_with_failing_pages(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v19.0/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1017", "name": "Jane Doe"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v19.0/me/accounts"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"message": "(#10) pages_show_list permission missing", "code": 10}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn facebook_identity_survives_missing_pages_permission() {
        let server = MockServer::start().await;
        mount_user_with_failing_pages(&server).await;

        let identity = provider(&server)
            .await
            .fetch_identity("long", None)
            .await
            .unwrap();

        assert_eq!(identity.provider_account_id, "1017");
        assert_eq!(identity.extra["pages"], json!([]));
    }

    #[tokio::test]
    async fn instagram_identity_requires_pages() {
        let server = MockServer::start().await;
        mount_user_with_failing_pages(&server).await;

        let err = provider(&server)
            .await
            .fetch_identity("long", Some("instagram".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::Identity(_)));
    }

    #[tokio::test]
    async fn failed_exchange_does_not_leak_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v19.0/oauth/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Invalid verification code format for app 123456", "code": 100}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).await.exchange_code("bad", "").await.unwrap_err();
        assert!(matches!(err, ConnectionError::TokenExchange(_)));
        assert_eq!(err.to_string(), "Token exchange failed: Meta token endpoint returned HTTP 400");
    }
}
