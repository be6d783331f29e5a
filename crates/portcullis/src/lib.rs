//! OpenID Connect token validation engine.
//!
//! Portcullis discovers an issuer's provider metadata and signing keys in the
//! background, gates validation behind a readiness barrier until that first
//! discovery completes, verifies bearer tokens and checks their claims, and
//! fetches userinfo for access tokens.
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use portcullis::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! engine.initialize("https://idp.example.com")?;
//! engine.wait_until_ready(Duration::from_secs(10))?;
//!
//! let result = engine.validate(token)?;
//! println!("subject: {}", result.subject_id);
//!
//! engine.uninitialize()?;
//! ```
//!
//! The public API is blocking; network work runs on a small runtime owned by
//! the engine.

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod jwks;
pub mod readiness;
pub(crate) mod runtime;
pub mod transport;
pub mod userinfo;
pub mod validate;

pub use config::{EngineConfig, IssuerConfig};
pub use crypto::Algorithm;
pub use discovery::ProviderMetadata;
pub use engine::Engine;
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use readiness::ReadinessState;
pub use transport::TransportPolicy;
pub use userinfo::UserInfo;
pub use validate::{StandardClaims, TokenType, ValidationResult};
