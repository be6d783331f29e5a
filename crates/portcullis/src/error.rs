//! Error taxonomy for the validation engine.
//!
//! Every failure surfaced to a caller is exactly one [`Error`]. Callers branch
//! on [`Error::kind`], never on the message text.

use std::fmt;

use thiserror::Error;

/// Engine error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Configuration
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("engine is already initialized")]
    AlreadyInitialized,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    // Readiness
    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("timed out waiting for OIDC discovery")]
    NotReadyTimeout,

    // Keys
    #[error("no matching signing key (kid: {0})")]
    UnknownKey(String),

    #[error("JWKS fetch failed: {0}")]
    KeyFetchFailed(String),

    // Token
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token signature verification failed")]
    SignatureInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not yet valid")]
    TokenNotYetValid,

    #[error("token issuer mismatch: {0}")]
    IssuerMismatch(String),

    #[error("token audience mismatch")]
    AudienceMismatch,

    // Transport
    #[error("userinfo request failed: {reason}")]
    UserInfoRequestFailed {
        /// HTTP status, when the endpoint answered.
        status: Option<u16>,
        reason: String,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidIssuer,
    AlreadyInitialized,
    NotInitialized,
    InvalidConfig,
    Runtime,
    DiscoveryFailed,
    NotReadyTimeout,
    UnknownKey,
    KeyFetchFailed,
    MalformedToken,
    UnsupportedAlgorithm,
    SignatureInvalid,
    TokenExpired,
    TokenNotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    UserInfoRequestFailed,
}

/// Broad grouping of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Readiness,
    Key,
    Token,
    Transport,
}

impl Error {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidIssuer(_) => ErrorKind::InvalidIssuer,
            Error::AlreadyInitialized => ErrorKind::AlreadyInitialized,
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::DiscoveryFailed(_) => ErrorKind::DiscoveryFailed,
            Error::NotReadyTimeout => ErrorKind::NotReadyTimeout,
            Error::UnknownKey(_) => ErrorKind::UnknownKey,
            Error::KeyFetchFailed(_) => ErrorKind::KeyFetchFailed,
            Error::MalformedToken(_) => ErrorKind::MalformedToken,
            Error::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Error::SignatureInvalid => ErrorKind::SignatureInvalid,
            Error::TokenExpired => ErrorKind::TokenExpired,
            Error::TokenNotYetValid => ErrorKind::TokenNotYetValid,
            Error::IssuerMismatch(_) => ErrorKind::IssuerMismatch,
            Error::AudienceMismatch => ErrorKind::AudienceMismatch,
            Error::UserInfoRequestFailed { .. } => ErrorKind::UserInfoRequestFailed,
        }
    }

    /// HTTP status carried by a userinfo failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::UserInfoRequestFailed { status, .. } => *status,
            _ => None,
        }
    }
}

impl ErrorKind {
    /// Stable snake_case code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidIssuer => "invalid_issuer",
            ErrorKind::AlreadyInitialized => "already_initialized",
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Runtime => "runtime",
            ErrorKind::DiscoveryFailed => "discovery_failed",
            ErrorKind::NotReadyTimeout => "not_ready_timeout",
            ErrorKind::UnknownKey => "unknown_key",
            ErrorKind::KeyFetchFailed => "key_fetch_failed",
            ErrorKind::MalformedToken => "malformed_token",
            ErrorKind::UnsupportedAlgorithm => "unsupported_algorithm",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::TokenNotYetValid => "token_not_yet_valid",
            ErrorKind::IssuerMismatch => "issuer_mismatch",
            ErrorKind::AudienceMismatch => "audience_mismatch",
            ErrorKind::UserInfoRequestFailed => "userinfo_request_failed",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::InvalidIssuer
            | ErrorKind::AlreadyInitialized
            | ErrorKind::NotInitialized
            | ErrorKind::InvalidConfig
            | ErrorKind::Runtime => ErrorCategory::Configuration,
            ErrorKind::DiscoveryFailed | ErrorKind::NotReadyTimeout => ErrorCategory::Readiness,
            ErrorKind::UnknownKey | ErrorKind::KeyFetchFailed => ErrorCategory::Key,
            ErrorKind::MalformedToken
            | ErrorKind::UnsupportedAlgorithm
            | ErrorKind::SignatureInvalid
            | ErrorKind::TokenExpired
            | ErrorKind::TokenNotYetValid
            | ErrorKind::IssuerMismatch
            | ErrorKind::AudienceMismatch => ErrorCategory::Token,
            ErrorKind::UserInfoRequestFailed => ErrorCategory::Transport,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
