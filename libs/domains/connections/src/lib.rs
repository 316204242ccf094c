//! Connections Domain
//!
//! Links a profile to its accounts on third-party social platforms through
//! OAuth 2.0 and keeps the resulting tokens usable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  ← start / callback / status / disconnect routes
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐      ┌──────────────────┐
//! │   Service   │ ───▶ │ ProviderRegistry │ ← one adapter per platform
//! └──────┬──────┘      └──────────────────┘
//!        │  StateCodec (signed state), TokenVault (AES-GCM)
//! ┌──────▼──────┐
//! │ Repository  │  ← one row per (profile, provider)
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use core_config::FromEnv;
//! use domain_connections::{
//!     ConnectionService, ConnectionsConfig, CookieSettings, InMemoryConnectionRepository,
//!     handlers,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionsConfig::from_env()?;
//! let service = ConnectionService::from_config(&config, InMemoryConnectionRepository::new())?;
//! let router = handlers::router(service, CookieSettings::new("/api/auth", true));
//! # let _ = router;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod postgres;
pub mod providers;
pub mod repository;
pub mod service;
pub mod state;

pub use config::ConnectionsConfig;
pub use crypto::TokenVault;
pub use error::{ConnectionError, ConnectionResult};
pub use handlers::{AuthenticatedProfile, CookieSettings};
pub use models::{
    CallbackOutcome, CallbackQuery, ConnectionStatus, OAuthConnection, ProviderIdentity,
    ProviderSummary, TokenSet,
};
pub use postgres::PgConnectionRepository;
pub use providers::{ProviderAdapter, ProviderDescriptor, ProviderRegistry, build_registry};
pub use repository::{ConnectionRepository, InMemoryConnectionRepository};
pub use service::{ConnectionService, EngineSettings, ExpiredConnectionPolicy};
pub use state::StateCodec;
