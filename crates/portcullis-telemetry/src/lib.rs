//! Logging infrastructure for Portcullis.
//!
//! This crate provides:
//! - Structured logging (JSON or pretty) on stderr
//! - Standard event names and `log_*!` macros used by the engine
//!
//! # Usage
//!
//! ```ignore
//! use portcullis_telemetry::{LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("info")
//!     .with_log_format(LogFormat::Json);
//!
//! portcullis_telemetry::init(&config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Initialize telemetry with the given configuration.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    logging::init_logging(config)?;
    tracing::debug!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}
