use core_config::{
    ConfigError, FromEnv, env_parse_or_default, env_required, env_secret, server::ServerConfig,
};
use domain_connections::ConnectionsConfig;
use sea_orm::ConnectOptions;
use std::time::Duration;

pub use core_config::Environment;

/// PostgreSQL pool settings.
///
/// - `DATABASE_URL` (required)
/// - `DB_MAX_CONNECTIONS` (default: 20)
/// - `DB_MIN_CONNECTIONS` (default: 2)
/// - `DB_CONNECT_TIMEOUT_SECS` (default: 8)
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(&self.url);
        opt.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);
        opt
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl FromEnv for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections: env_parse_or_default("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_parse_or_default("DB_MIN_CONNECTIONS", 2)?,
            connect_timeout: Duration::from_secs(env_parse_or_default(
                "DB_CONNECT_TIMEOUT_SECS",
                8,
            )?),
        })
    }
}

/// Verification key for session JWTs issued by the identity provider.
#[derive(Clone)]
pub struct SessionConfig {
    pub jwt_secret: String,
}

impl FromEnv for SessionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            jwt_secret: env_secret("SESSION_JWT_SECRET", 32)?,
        })
    }
}

/// Application configuration, composed from the shared config pieces.
#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub connections: ConnectionsConfig,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            session: SessionConfig::from_env()?,
            connections: ConnectionsConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_defaults() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://app:pw@localhost/repurpose")),
                ("DB_MAX_CONNECTIONS", None),
                ("DB_MIN_CONNECTIONS", None),
                ("DB_CONNECT_TIMEOUT_SECS", Some("3")),
            ],
            || {
                let db = DatabaseConfig::from_env().unwrap();
                assert_eq!(db.max_connections, 20);
                assert_eq!(db.min_connections, 2);
                assert_eq!(db.connect_timeout, Duration::from_secs(3));
                assert!(!format!("{:?}", db).contains("pw@"));
            },
        );
    }

    #[test]
    fn session_secret_is_required() {
        temp_env::with_var_unset("SESSION_JWT_SECRET", || {
            assert!(matches!(
                SessionConfig::from_env(),
                Err(ConfigError::MissingEnvVar(_))
            ));
        });
    }
}
