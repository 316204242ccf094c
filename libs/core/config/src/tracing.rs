use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const PRODUCTION_DIRECTIVES: &str = "info,sqlx=warn,sea_orm=warn,hyper_util=warn";
const DEVELOPMENT_DIRECTIVES: &str = "debug,sqlx=info,hyper_util=info,reqwest=info";

/// Install color-eyre with a project-standard configuration.
///
/// Call this first in `main()`. Safe to call multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Build the filter used by [`init_tracing`]. `RUST_LOG` wins when set.
pub fn env_filter(environment: &Environment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if environment.is_production() {
            EnvFilter::new(PRODUCTION_DIRECTIVES)
        } else {
            EnvFilter::new(DEVELOPMENT_DIRECTIVES)
        }
    })
}

/// Initialize tracing with environment-aware output and span capture.
///
/// - **Production**: flattened JSON events, no module targets.
/// - **Development**: pretty, human-readable output.
///
/// Both install `tracing_error::ErrorLayer` so eyre reports carry span traces.
/// Repeated calls are ignored (common in tests).
pub fn init_tracing(environment: &Environment) {
    let filter = env_filter(environment);

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}
