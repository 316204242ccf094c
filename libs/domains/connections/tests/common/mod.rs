//! Shared fixtures for the connections integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use domain_connections::models::AuthorizationRequest;
use domain_connections::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const STATE_SECRET: &str = "integration-state-secret-0123456789abcdef";
pub const VAULT_SECRET: &str = "integration-vault-secret-0123456789abcdef";

/// Counts calls so tests can assert which network steps ran.
#[derive(Default)]
pub struct CallCounts {
    pub exchange: AtomicUsize,
    pub refresh: AtomicUsize,
    pub revoke: AtomicUsize,
}

impl CallCounts {
    pub fn exchange(&self) -> usize {
        self.exchange.load(Ordering::SeqCst)
    }

    pub fn refresh(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }

    pub fn revoke(&self) -> usize {
        self.revoke.load(Ordering::SeqCst)
    }
}

/// Provider that answers locally. The issued access token is `tok-{code}`.
///
/// Codes starting with `bare-` yield no refresh token or scope and belong to
/// a second remote account.
pub struct FakeProvider {
    descriptor: ProviderDescriptor,
    pub calls: Arc<CallCounts>,
}

impl FakeProvider {
    pub fn new(id: &str, supports_refresh: bool) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: id.to_string(),
                display_name: "Fake".to_string(),
                authorize_endpoint: "https://fake.test/authorize".to_string(),
                token_endpoint: "https://fake.test/token".to_string(),
                identity_endpoint: "https://fake.test/me".to_string(),
                revocation_endpoint: None,
                token_verification_endpoint: None,
                scopes: vec!["read".to_string(), "write".to_string()],
                scope_delimiter: " ".to_string(),
                supports_refresh,
                supports_long_lived_exchange: false,
                target_platforms: Vec::new(),
            },
            calls: Arc::new(CallCounts::default()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> ConnectionResult<String> {
        Ok(format!(
            "{}?client_id=fake-client&redirect_uri=https%3A%2F%2Fapp.test%2Fapi%2Fauth%2F{}%2Fcallback&response_type=code&state={}",
            self.descriptor.authorize_endpoint, self.descriptor.id, request.state
        ))
    }

    async fn exchange_code(&self, code: &str, _code_verifier: &str) -> ConnectionResult<TokenSet> {
        self.calls.exchange.fetch_add(1, Ordering::SeqCst);
        if code == "bad" {
            return Err(ConnectionError::TokenExchange("HTTP 400".to_string()));
        }
        if code.starts_with("bare-") {
            return Ok(TokenSet::new(format!("tok-{}", code)).with_expires_in(3600));
        }
        Ok(TokenSet::new(format!("tok-{}", code))
            .with_refresh_token(format!("refresh-{}", code))
            .with_expires_in(3600)
            .with_scope("read write"))
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
        _target_platform: Option<String>,
    ) -> ConnectionResult<ProviderIdentity> {
        let account = if access_token.starts_with("tok-bare-") {
            "other-account"
        } else {
            "fake-account"
        };
        Ok(ProviderIdentity {
            provider_account_id: account.to_string(),
            display_name: Some("Jane Fake".to_string()),
            avatar_url: None,
            extra: serde_json::json!({}),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectionResult<TokenSet> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        if !self.descriptor.supports_refresh {
            return Err(ConnectionError::RefreshNotSupported(self.descriptor.id.clone()));
        }
        Ok(TokenSet::new(format!("refreshed-from-{}", refresh_token)).with_expires_in(3600))
    }

    async fn revoke(&self, _access_token: &str) -> ConnectionResult<()> {
        self.calls.revoke.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub service: ConnectionService<InMemoryConnectionRepository>,
    pub repository: InMemoryConnectionRepository,
    pub calls: Arc<CallCounts>,
}

pub fn harness(provider: FakeProvider, policy: ExpiredConnectionPolicy) -> Harness {
    let calls = Arc::clone(&provider.calls);
    let mut registry = ProviderRegistry::new();
    registry
        .register(Arc::new(provider))
        .expect("fresh registry");

    let repository = InMemoryConnectionRepository::new();
    let service = ConnectionService::new(
        registry,
        StateCodec::new(STATE_SECRET),
        TokenVault::new(VAULT_SECRET),
        repository.clone(),
        EngineSettings::new("https://app.test").with_expired_policy(policy),
    );

    Harness {
        service,
        repository,
        calls,
    }
}

/// Query and cookie value as a browser would present them after `start_oauth`.
pub async fn callback_for(
    service: &ConnectionService<InMemoryConnectionRepository>,
    provider: &str,
    profile_id: &str,
    code: &str,
) -> (CallbackQuery, String) {
    let flow = service
        .start_oauth(provider, profile_id, None)
        .await
        .expect("start succeeds");
    let query = CallbackQuery {
        code: Some(code.to_string()),
        state: Some(flow.state.token.clone()),
        ..Default::default()
    };
    (query, flow.state.token)
}
