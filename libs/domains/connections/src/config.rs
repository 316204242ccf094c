use crate::providers::ProviderCredentials;
use crate::service::{EngineSettings, ExpiredConnectionPolicy};
use core_config::{
    ConfigError, FromEnv, env_list, env_or_default, env_parse_or_default, env_required,
    env_secret,
};
use std::time::Duration;

pub const ALL_PROVIDERS: &[&str] = &[
    "meta",
    "tiktok",
    "google",
    "x",
    "linkedin",
    "pinterest",
    "snapchat",
];

const MIN_SECRET_LEN: usize = 32;

/// Configuration for the connection engine.
///
/// | Variable | Default |
/// |---|---|
/// | `APP_BASE_URL` | required |
/// | `OAUTH_CALLBACK_BASE_URL` | `{APP_BASE_URL}/api/auth` |
/// | `OAUTH_STATE_SECRET`, `TOKEN_ENCRYPTION_KEY` | required, 32+ chars |
/// | `OAUTH_SUCCESS_PATH`, `OAUTH_FAILURE_PATH` | `/settings/connections` |
/// | `OAUTH_HTTP_TIMEOUT_SECS` | 15 |
/// | `OAUTH_TOKEN_REFRESH_MARGIN_SECS` | 60 |
/// | `OAUTH_EXPIRED_CONNECTION_POLICY` | `row_exists` |
/// | `OAUTH_ENABLED_PROVIDERS` | all |
/// | `{PROVIDER}_CLIENT_ID`, `{PROVIDER}_CLIENT_SECRET` | required per enabled provider |
#[derive(Clone)]
pub struct ConnectionsConfig {
    pub app_base_url: String,
    pub callback_base_url: String,
    pub state_secret: String,
    pub token_encryption_key: String,
    pub success_path: String,
    pub failure_path: String,
    pub http_timeout: Duration,
    pub refresh_margin: Duration,
    pub expired_policy: ExpiredConnectionPolicy,
    /// Enabled providers in configuration order.
    pub providers: Vec<(String, ProviderCredentials)>,
}

impl ConnectionsConfig {
    pub fn redirect_uri(callback_base_url: &str, provider: &str) -> String {
        format!("{}/{}/callback", callback_base_url.trim_end_matches('/'), provider)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            app_base_url: self.app_base_url.clone(),
            success_path: self.success_path.clone(),
            failure_path: self.failure_path.clone(),
            refresh_margin: chrono::Duration::from_std(self.refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            expired_policy: self.expired_policy,
        }
    }
}

impl std::fmt::Debug for ConnectionsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionsConfig")
            .field("app_base_url", &self.app_base_url)
            .field("callback_base_url", &self.callback_base_url)
            .field("http_timeout", &self.http_timeout)
            .field("refresh_margin", &self.refresh_margin)
            .field("expired_policy", &self.expired_policy)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl FromEnv for ConnectionsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let app_base_url = env_required("APP_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let callback_base_url = env_or_default(
            "OAUTH_CALLBACK_BASE_URL",
            &format!("{}/api/auth", app_base_url),
        );

        let timeout_secs: u64 = env_parse_or_default("OAUTH_HTTP_TIMEOUT_SECS", 15)?;
        if !(1..=60).contains(&timeout_secs) {
            return Err(ConfigError::ParseError {
                key: "OAUTH_HTTP_TIMEOUT_SECS".to_string(),
                details: "must be between 1 and 60".to_string(),
            });
        }

        let policy_raw = env_or_default("OAUTH_EXPIRED_CONNECTION_POLICY", "row_exists");
        let expired_policy =
            policy_raw
                .parse()
                .map_err(|details: String| ConfigError::ParseError {
                    key: "OAUTH_EXPIRED_CONNECTION_POLICY".to_string(),
                    details,
                })?;

        let mut providers = Vec::new();
        for provider in env_list("OAUTH_ENABLED_PROVIDERS", ALL_PROVIDERS) {
            let provider = provider.to_ascii_lowercase();
            if !ALL_PROVIDERS.contains(&provider.as_str()) {
                return Err(ConfigError::ParseError {
                    key: "OAUTH_ENABLED_PROVIDERS".to_string(),
                    details: format!("unknown provider '{}'", provider),
                });
            }
            let prefix = provider.to_ascii_uppercase();
            let credentials = ProviderCredentials {
                client_id: env_required(&format!("{}_CLIENT_ID", prefix))?,
                client_secret: env_required(&format!("{}_CLIENT_SECRET", prefix))?,
                redirect_uri: Self::redirect_uri(&callback_base_url, &provider),
            };
            providers.push((provider, credentials));
        }

        Ok(Self {
            app_base_url,
            callback_base_url,
            state_secret: env_secret("OAUTH_STATE_SECRET", MIN_SECRET_LEN)?,
            token_encryption_key: env_secret("TOKEN_ENCRYPTION_KEY", MIN_SECRET_LEN)?,
            success_path: env_or_default("OAUTH_SUCCESS_PATH", "/settings/connections"),
            failure_path: env_or_default("OAUTH_FAILURE_PATH", "/settings/connections"),
            http_timeout: Duration::from_secs(timeout_secs),
            refresh_margin: Duration::from_secs(env_parse_or_default(
                "OAUTH_TOKEN_REFRESH_MARGIN_SECS",
                60u64,
            )?),
            expired_policy,
            providers,
        })
    }
}
