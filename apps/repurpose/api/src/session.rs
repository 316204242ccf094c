use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use domain_connections::AuthenticatedProfile;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::sync::Arc;

/// Cookie set by the identity provider's browser client.
pub const SESSION_COOKIE_NAME: &str = "sb-access-token";

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
}

/// Verifies HS256 session tokens issued by the external identity provider.
#[derive(Clone)]
pub struct SessionVerifier {
    key: Arc<DecodingKey>,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// Profile id (`sub`) of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        match decode::<SessionClaims>(token, &self.key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(data.claims.sub),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Session token rejected: {}", e);
                None
            }
        }
    }
}

/// Extract the session token from `Authorization: Bearer` or the session cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(|s| s.trim().to_string()))
        .or_else(|| {
            headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|cookies| {
                    cookies.split(';').find_map(|cookie| {
                        let (name, value) = cookie.trim().split_once('=')?;
                        (name == SESSION_COOKIE_NAME).then(|| value.to_string())
                    })
                })
        })
        .filter(|token| !token.is_empty())
}

/// Session middleware.
///
/// Attaches an [`AuthenticatedProfile`] when the request carries a valid
/// session. Handlers that need one reject anonymous requests with 401, so
/// the OAuth callback stays reachable without a session.
pub async fn session_middleware(
    State(verifier): State<SessionVerifier>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(profile_id) = extract_token(request.headers()).and_then(|t| verifier.verify(&t)) {
        request
            .extensions_mut()
            .insert(AuthenticatedProfile(profile_id));
    }
    next.run(request).await
}
