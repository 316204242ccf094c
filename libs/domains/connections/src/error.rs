use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Unknown provider: {provider}")]
    UnknownProvider {
        provider: String,
        supported: Vec<String>,
    },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("OAuth state expired")]
    ExpiredState,

    #[error("Target platform '{target}' is not supported by {provider}")]
    InvalidTargetPlatform { provider: String, target: String },

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Identity lookup failed: {0}")]
    Identity(String),

    #[error("Provider {0} does not support token refresh")]
    RefreshNotSupported(String),

    #[error("Access token for {0} has expired")]
    TokenExpired(String),

    #[error("No {0} connection exists for this profile")]
    NotConnected(String),

    #[error("Token decryption failed: {0}")]
    Decryption(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

impl ConnectionError {
    /// Stable symbolic code. Safe to place in redirect URLs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            ConnectionError::NotAuthenticated => "NOT_AUTHENTICATED",
            ConnectionError::InvalidState(_) => "INVALID_STATE",
            ConnectionError::ExpiredState => "EXPIRED_STATE",
            ConnectionError::InvalidTargetPlatform { .. } => "INVALID_TARGET_PLATFORM",
            ConnectionError::TokenExchange(_) => "TOKEN_EXCHANGE_FAILED",
            ConnectionError::Identity(_) => "IDENTITY_FETCH_FAILED",
            ConnectionError::RefreshNotSupported(_) => "REFRESH_NOT_SUPPORTED",
            ConnectionError::TokenExpired(_) => "TOKEN_EXPIRED",
            ConnectionError::NotConnected(_) => "NOT_CONNECTED",
            ConnectionError::Decryption(_) => "DECRYPTION_FAILED",
            ConnectionError::Configuration(_) => "CONFIGURATION_ERROR",
            ConnectionError::Provider(_) => "PROVIDER_ERROR",
            ConnectionError::Storage(_) => "STORAGE_ERROR",
            ConnectionError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The stored connection can no longer be used; the user has to connect again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            ConnectionError::RefreshNotSupported(_)
                | ConnectionError::TokenExpired(_)
                | ConnectionError::Decryption(_)
                | ConnectionError::NotConnected(_)
        )
    }
}

impl From<core_config::ConfigError> for ConnectionError {
    fn from(err: core_config::ConfigError) -> Self {
        ConnectionError::Configuration(err.to_string())
    }
}

impl IntoResponse for ConnectionError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (status, message) = match &self {
            ConnectionError::UnknownProvider { provider, supported } => {
                let body = json!({
                    "error": {
                        "type": code,
                        "message": format!("Unknown provider '{}'", provider),
                        "supportedProviders": supported,
                    }
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ConnectionError::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            ConnectionError::InvalidState(reason) => {
                tracing::warn!(reason = %reason, "Rejected OAuth state");
                (StatusCode::BAD_REQUEST, "Invalid OAuth state".to_string())
            }
            ConnectionError::ExpiredState => (
                StatusCode::BAD_REQUEST,
                "OAuth flow expired, please start again".to_string(),
            ),
            ConnectionError::InvalidTargetPlatform { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ConnectionError::TokenExchange(msg)
            | ConnectionError::Identity(msg)
            | ConnectionError::Provider(msg) => {
                tracing::error!(code, "Provider call failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "The provider request failed".to_string(),
                )
            }
            ConnectionError::RefreshNotSupported(_)
            | ConnectionError::TokenExpired(_)
            | ConnectionError::NotConnected(_) => (
                StatusCode::CONFLICT,
                format!("{}. Please reconnect the account.", self),
            ),
            ConnectionError::Decryption(msg) => {
                tracing::error!("Stored token could not be decrypted: {}", msg);
                (
                    StatusCode::CONFLICT,
                    "The stored connection is unusable. Please reconnect the account.".to_string(),
                )
            }
            ConnectionError::Configuration(msg)
            | ConnectionError::Storage(msg)
            | ConnectionError::Internal(msg) => {
                tracing::error!(code, "Internal failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": {
                "type": code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}
