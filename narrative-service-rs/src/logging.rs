//! Tracing setup for the service binary.

use config_rs::LoggingSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// `log` records (emitted by `config-rs`) are forwarded into tracing.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", settings.level)));

    let json_layer = settings.json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!settings.json).then(|| fmt::layer().with_target(true));

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|err| format!("failed to install tracing subscriber: {}", err))?;

    tracing::info!(level = %settings.level, json = settings.json, "logging initialized");
    Ok(())
}
