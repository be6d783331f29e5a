//! Structured logging with JSON or pretty output.
//!
//! Events go to stderr so that command output on stdout stays parseable.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level unless `RUST_LOG` is set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// An engine was initialized for an issuer.
    pub const INITIALIZED: &str = "initialized";

    /// An engine released its issuer state.
    pub const UNINITIALIZED: &str = "uninitialized";

    /// TLS verification was disabled.
    pub const INSECURE_TRANSPORT: &str = "insecure_transport";

    /// Provider metadata and keys were fetched; the engine is ready.
    pub const DISCOVERY_SUCCEEDED: &str = "discovery_succeeded";

    /// A discovery attempt failed and will be retried.
    pub const DISCOVERY_RETRY: &str = "discovery_retry";

    /// Discovery gave up after the last attempt.
    pub const DISCOVERY_FAILED: &str = "discovery_failed";

    /// The key set was replaced.
    pub const KEYS_REFRESHED: &str = "keys_refreshed";

    /// A key set refresh failed; the previous set stays in use.
    pub const KEY_REFRESH_FAILED: &str = "key_refresh_failed";

    /// A token failed validation.
    pub const TOKEN_REJECTED: &str = "token_rejected";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_initialized {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::INITIALIZED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_uninitialized {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::UNINITIALIZED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_insecure_transport {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::INSECURE_TRANSPORT,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_discovery_succeeded {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::DISCOVERY_SUCCEEDED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_discovery_retry {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::DISCOVERY_RETRY,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_discovery_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::DISCOVERY_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_keys_refreshed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::KEYS_REFRESHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_key_refresh_failed {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::KEY_REFRESH_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_token_rejected {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::TOKEN_REJECTED,
            $($field)*
        )
    };
}
