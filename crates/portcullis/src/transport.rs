//! Outbound HTTP for discovery, JWKS and userinfo.
//!
//! [`TransportPolicy`] decides whether TLS verification is enforced. Every
//! client the engine builds goes through it, so the policy applies to all
//! three endpoints at once.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::EngineConfig;

/// Engine-wide TLS verification policy.
#[derive(Debug, Default)]
pub struct TransportPolicy {
    insecure: AtomicBool,
}

impl TransportPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable certificate-chain and hostname verification.
    pub fn set_insecure(&self, enabled: bool) {
        let was = self.insecure.swap(enabled, Ordering::SeqCst);
        if enabled {
            portcullis_telemetry::log_insecure_transport!(
                "TLS certificate and hostname verification disabled, this is insecure"
            );
        } else if was {
            tracing::info!("TLS verification re-enabled");
        }
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure.load(Ordering::SeqCst)
    }

    /// Restore the secure default.
    pub fn reset(&self) {
        self.insecure.store(false, Ordering::SeqCst);
    }

    /// Build a client reflecting the current policy.
    pub(crate) fn build_client(&self, config: &EngineConfig) -> Result<HttpClient, TransportError> {
        HttpClient::new(config, self.is_insecure())
    }
}

/// HTTP client with connection pooling, timeouts and the plaintext guard.
#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Client,
    allow_plaintext: bool,
}

impl HttpClient {
    pub(crate) fn new(config: &EngineConfig, insecure: bool) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("portcullis/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            // With rustls this also skips hostname verification.
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            client,
            allow_plaintext: config.allow_plaintext,
        })
    }

    /// Parse `url` and enforce the plaintext rule.
    pub(crate) fn check_url(&self, url: &str) -> Result<Url, TransportError> {
        let parsed = url
            .parse::<Url>()
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;

        match parsed.scheme() {
            "https" => Ok(parsed),
            "http" if self.allow_plaintext || is_loopback(&parsed) => Ok(parsed),
            "http" => Err(TransportError::PlaintextNotAllowed(url.to_string())),
            other => Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                other
            ))),
        }
    }

    /// GET `url` and decode a successful JSON response.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<T, TransportError> {
        let url = self.check_url(url)?;

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::ConnectionFailed(e.to_string())
            } else {
                TransportError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| TransportError::InvalidBody(e.to_string()))
    }
}

/// Plain `http` is tolerated for local development issuers.
pub(crate) fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

/// HTTP client errors.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("plaintext HTTP not allowed: {0}")]
    PlaintextNotAllowed(String),

    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl TransportError {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status(status) => Some(*status),
            _ => None,
        }
    }
}
