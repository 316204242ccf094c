//! Signed, time-boxed OAuth state tokens.
//!
//! Nothing is stored server-side. The token is
//! `base64url(json claims) "." base64url(HMAC-SHA256(key, first part))`,
//! delivered twice: as the `state` query parameter and in an HTTP-only cookie
//! scoped to the provider's callback path.

use crate::error::{ConnectionError, ConnectionResult};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// State token lifetime in seconds.
pub const STATE_TTL_SECS: i64 = 600;

/// Name of the cookie carrying the state token.
pub const STATE_COOKIE_NAME: &str = "oauth_state";

/// Tolerated clock skew for tokens issued by another instance.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StatePayload {
    #[serde(rename = "p")]
    provider: String,
    #[serde(rename = "sub")]
    profile_id: String,
    #[serde(rename = "n")]
    nonce: String,
    #[serde(rename = "iat")]
    issued_at: i64,
    #[serde(rename = "tp", default, skip_serializing_if = "Option::is_none")]
    target_platform: Option<String>,
}

/// A freshly minted state token and the moment it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedState {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Verified contents of a state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateClaims {
    pub profile_id: String,
    pub provider: String,
    pub target_platform: Option<String>,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StateCodec {
    key: [u8; 32],
    ttl: Duration,
}

impl StateCodec {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"repurpose:oauth-state:v1:");
        hasher.update(secret.as_bytes());

        Self {
            key: hasher.finalize().into(),
            ttl: Duration::seconds(STATE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        profile_id: &str,
        provider: &str,
        target_platform: Option<&str>,
    ) -> ConnectionResult<IssuedState> {
        self.issue_at(profile_id, provider, target_platform, Utc::now())
    }

    pub fn issue_at(
        &self,
        profile_id: &str,
        provider: &str,
        target_platform: Option<&str>,
        now: DateTime<Utc>,
    ) -> ConnectionResult<IssuedState> {
        let nonce: [u8; 16] = rand::random();
        let payload = StatePayload {
            provider: provider.to_string(),
            profile_id: profile_id.to_string(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            issued_at: now.timestamp(),
            target_platform: target_platform.map(str::to_string),
        };

        let json = serde_json::to_vec(&payload)
            .map_err(|e| ConnectionError::Internal(format!("Failed to encode state: {}", e)))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(body.as_bytes()).finalize().into_bytes());

        Ok(IssuedState {
            token: format!("{}.{}", body, signature),
            expires_at: now + self.ttl,
        })
    }

    pub fn verify(&self, token: &str, expected_provider: &str) -> ConnectionResult<StateClaims> {
        self.verify_at(token, expected_provider, Utc::now())
    }

    /// Check signature, provider binding and age, in that order.
    pub fn verify_at(
        &self,
        token: &str,
        expected_provider: &str,
        now: DateTime<Utc>,
    ) -> ConnectionResult<StateClaims> {
        let (body, signature) = token
            .split_once('.')
            .ok_or_else(|| ConnectionError::InvalidState("malformed token".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ConnectionError::InvalidState("malformed signature".to_string()))?;

        self.mac(body.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| ConnectionError::InvalidState("signature mismatch".to_string()))?;

        let payload = decode_payload(body)
            .ok_or_else(|| ConnectionError::InvalidState("malformed payload".to_string()))?;

        if payload.provider != expected_provider {
            return Err(ConnectionError::InvalidState(format!(
                "issued for '{}', presented to '{}'",
                payload.provider, expected_provider
            )));
        }

        let issued_at = DateTime::<Utc>::from_timestamp(payload.issued_at, 0)
            .ok_or_else(|| ConnectionError::InvalidState("bad issue time".to_string()))?;

        if issued_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(ConnectionError::InvalidState(
                "issued in the future".to_string(),
            ));
        }
        if now.timestamp() - payload.issued_at > self.ttl.num_seconds() {
            return Err(ConnectionError::ExpiredState);
        }

        Ok(StateClaims {
            profile_id: payload.profile_id,
            provider: payload.provider,
            target_platform: payload.target_platform,
            nonce: payload.nonce,
            issued_at,
        })
    }

    /// PKCE code verifier bound to one flow.
    ///
    /// Derived from the nonce so the callback can recompute it without the
    /// verifier ever leaving the server. 43 URL-safe characters.
    pub fn code_verifier(&self, claims: &StateClaims) -> String {
        self.verifier_from_nonce(&claims.nonce)
    }

    /// Same as [`Self::code_verifier`], computed from a freshly issued token.
    pub fn code_verifier_for(&self, issued: &IssuedState) -> ConnectionResult<String> {
        let payload = issued
            .token
            .split_once('.')
            .and_then(|(body, _)| decode_payload(body))
            .ok_or_else(|| ConnectionError::Internal("malformed issued state".to_string()))?;
        Ok(self.verifier_from_nonce(&payload.nonce))
    }

    fn verifier_from_nonce(&self, nonce: &str) -> String {
        let mut mac = self.mac(b"pkce:");
        mac.update(nonce.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(data);
        mac
    }
}

fn decode_payload(body: &str) -> Option<StatePayload> {
    let json = URL_SAFE_NO_PAD.decode(body).ok()?;
    serde_json::from_slice(&json).ok()
}

impl fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Constant-time comparison of the query `state` with the cookie copy.
pub fn state_matches_cookie(query_state: &str, cookie_state: &str) -> bool {
    query_state.as_bytes().ct_eq(cookie_state.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "state-secret-for-tests-0123456789abcdef";

    fn codec() -> StateCodec {
        StateCodec::new(SECRET)
    }

    #[test]
    fn round_trips_profile_and_target() {
        let codec = codec();
        for (profile, provider, target) in [
            ("u1", "meta", Some("instagram")),
            ("user123", "tiktok", None),
            ("6f1c1a8e-8d65-4b8e-9a36-2d6f4f0b6a11", "google", None),
        ] {
            let issued = codec.issue(profile, provider, target).unwrap();
            let claims = codec.verify(&issued.token, provider).unwrap();
            assert_eq!(claims.profile_id, profile);
            assert_eq!(claims.target_platform.as_deref(), target);
        }
    }

    #[test]
    fn expires_after_ttl() {
        let codec = codec();
        let issued_at = Utc::now();
        let issued = codec.issue_at("u1", "meta", None, issued_at).unwrap();
        assert_eq!(issued.expires_at, issued_at + Duration::seconds(600));

        let just_in_time = issued_at + Duration::seconds(STATE_TTL_SECS);
        assert!(codec.verify_at(&issued.token, "meta", just_in_time).is_ok());

        let too_late = issued_at + Duration::seconds(STATE_TTL_SECS + 1);
        assert!(matches!(
            codec.verify_at(&issued.token, "meta", too_late),
            Err(ConnectionError::ExpiredState)
        ));
    }

    #[test]
    fn bound_to_provider() {
        let codec = codec();
        let issued = codec.issue("u1", "meta", None).unwrap();
        assert!(matches!(
            codec.verify(&issued.token, "tiktok"),
            Err(ConnectionError::InvalidState(_))
        ));
    }

    #[test]
    fn rejects_foreign_and_tampered_tokens() {
        let issued = codec().issue("u1", "meta", None).unwrap();

        let other = StateCodec::new("some-other-secret-0123456789abcdef");
        assert!(matches!(
            other.verify(&issued.token, "meta"),
            Err(ConnectionError::InvalidState(_))
        ));

        // Swap the profile id while keeping the original signature.
        let (_, signature) = issued.token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            br#"{"p":"meta","sub":"attacker","n":"AAAA","iat":4102444800}"#,
        );
        let forged = format!("{}.{}", forged_payload, signature);
        assert!(matches!(
            codec().verify(&forged, "meta"),
            Err(ConnectionError::InvalidState(_))
        ));

        for garbage in ["", "abc", "abc.def", "....", "not-a-real-state"] {
            assert!(matches!(
                codec().verify(garbage, "meta"),
                Err(ConnectionError::InvalidState(_))
            ));
        }
    }

    #[test]
    fn rejects_tokens_from_the_future() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue_at("u1", "meta", None, now + Duration::minutes(5))
            .unwrap();
        assert!(matches!(
            codec.verify_at(&issued.token, "meta", now),
            Err(ConnectionError::InvalidState(_))
        ));
    }

    #[test]
    fn concurrent_starts_yield_independent_tokens() {
        let codec = codec();
        let a = codec.issue("u1", "x", None).unwrap();
        let b = codec.issue("u1", "x", None).unwrap();
        assert_ne!(a.token, b.token);
        assert!(codec.verify(&a.token, "x").is_ok());
        assert!(codec.verify(&b.token, "x").is_ok());
    }

    #[test]
    fn code_verifier_is_stable_per_flow() {
        let codec = codec();
        let issued = codec.issue("u1", "x", None).unwrap();
        let claims = codec.verify(&issued.token, "x").unwrap();

        let verifier = codec.code_verifier(&claims);
        assert_eq!(verifier.len(), 43);
        assert_eq!(codec.code_verifier_for(&issued).unwrap(), verifier);

        let other = codec.issue("u1", "x", None).unwrap();
        assert_ne!(codec.code_verifier_for(&other).unwrap(), verifier);
    }

    #[test]
    fn cookie_comparison() {
        assert!(state_matches_cookie("abc.def", "abc.def"));
        assert!(!state_matches_cookie("abc.def", "abc.deg"));
        assert!(!state_matches_cookie("abc.def", "abc"));
    }
}
