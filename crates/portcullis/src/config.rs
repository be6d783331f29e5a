//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::discovery;
use crate::error::{Error, Result};

/// Upper bound for request and connect timeouts (one day).
const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;

/// Upper bound for the periodic refresh interval (one week).
const MAX_REFRESH_SECONDS: u64 = 7 * 86_400;

/// Tunables for an [`Engine`](crate::Engine).
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Discovery document URL override. Defaults to
    /// `{issuer}/.well-known/openid-configuration`.
    pub discovery_endpoint: Option<String>,

    /// Expected audience (`aud` claim). Unchecked when unset.
    pub audience: Option<String>,

    /// Clock skew tolerance in seconds for `exp`/`nbf`.
    pub leeway_seconds: u64,

    /// Discovery attempts before readiness fails.
    pub discovery_max_attempts: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    pub retry_initial_backoff_ms: u64,

    /// Upper bound for the retry delay in milliseconds.
    pub retry_max_backoff_ms: u64,

    /// Interval of the background metadata/JWKS refresh in seconds.
    pub jwks_refresh_seconds: u64,

    /// Minimum spacing between refreshes triggered by unknown key ids.
    pub key_refresh_cooldown_seconds: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_seconds: f64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_seconds: f64,

    /// Allow plaintext `http` endpoints on non-loopback hosts.
    pub allow_plaintext: bool,

    /// Worker threads of the engine runtime.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_endpoint: None,
            audience: None,
            leeway_seconds: 0,
            discovery_max_attempts: 5,
            retry_initial_backoff_ms: 1000,
            retry_max_backoff_ms: 30_000,
            jwks_refresh_seconds: 300,
            key_refresh_cooldown_seconds: 30,
            request_timeout_seconds: 30.0,
            connect_timeout_seconds: 10.0,
            allow_plaintext: false,
            worker_threads: 2,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "discovery_max_attempts must be at least 1".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        if self.jwks_refresh_seconds == 0 || self.jwks_refresh_seconds > MAX_REFRESH_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "jwks_refresh_seconds must be between 1 and {}",
                MAX_REFRESH_SECONDS
            )));
        }
        if self.retry_max_backoff_ms > MAX_TIMEOUT_SECONDS as u64 * 1000 {
            return Err(Error::InvalidConfig(format!(
                "retry_max_backoff_ms must be at most {}",
                MAX_TIMEOUT_SECONDS as u64 * 1000
            )));
        }
        for (name, value) in [
            ("request_timeout_seconds", self.request_timeout_seconds),
            ("connect_timeout_seconds", self.connect_timeout_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 || value > MAX_TIMEOUT_SECONDS {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive and at most {}",
                    name, MAX_TIMEOUT_SECONDS
                )));
            }
        }
        Ok(())
    }

    pub fn with_discovery_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.discovery_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway_seconds = leeway.as_secs();
        self
    }

    pub fn with_discovery_max_attempts(mut self, attempts: u32) -> Self {
        self.discovery_max_attempts = attempts;
        self
    }

    /// Set the initial and maximum retry delay.
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_backoff_ms = initial.as_millis() as u64;
        self.retry_max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_jwks_refresh_interval(mut self, interval: Duration) -> Self {
        self.jwks_refresh_seconds = interval.as_secs();
        self
    }

    pub fn with_key_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_refresh_cooldown_seconds = cooldown.as_secs();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_seconds = timeout.as_secs_f64();
        self
    }

    pub fn with_allow_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub(crate) fn retry_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_initial_backoff_ms)
    }

    pub(crate) fn retry_max_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_max_backoff_ms)
    }

    pub(crate) fn jwks_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_seconds)
    }

    pub(crate) fn key_refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.key_refresh_cooldown_seconds)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_seconds)
    }
}

/// The issuer an engine was initialized for.
///
/// Immutable for the lifetime of one initialize/uninitialize cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    issuer_url: String,
    discovery_endpoint: String,
    insecure_mode: bool,
}

impl IssuerConfig {
    /// Validate `issuer` and derive the discovery endpoint.
    pub fn new(issuer: &str, config: &EngineConfig, insecure_mode: bool) -> Result<Self> {
        discovery::validate_issuer_url(issuer, config.allow_plaintext)?;

        let discovery_endpoint = match &config.discovery_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => discovery::discovery_endpoint(issuer),
        };

        Ok(Self {
            issuer_url: issuer.to_string(),
            discovery_endpoint,
            insecure_mode,
        })
    }

    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    pub fn discovery_endpoint(&self) -> &str {
        &self.discovery_endpoint
    }

    pub fn insecure_mode(&self) -> bool {
        self.insecure_mode
    }
}
