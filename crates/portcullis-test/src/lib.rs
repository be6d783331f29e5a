//! Test harnesses for Portcullis.
//!
//! Provides `TestKey` for minting signed tokens, `TestIssuer`, a mock
//! OIDC provider for end-to-end engine tests, and `TlsIssuer`, which serves
//! the same documents behind a self-signed certificate.

pub mod issuer;
pub mod key;
pub mod tls;

pub use issuer::TestIssuer;
pub use key::{jwks, TestKey};
pub use tls::TlsIssuer;

use thiserror::Error;

/// Errors from harness setup.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("invalid fixture: {0}")]
    Fixture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Base URL of a loopback port with nothing listening on it.
pub fn unreachable_issuer() -> String {
    let port = find_available_port().expect("bind an ephemeral port");
    format!("http://127.0.0.1:{}", port)
}

fn find_available_port() -> Result<u16, TestError> {
    // Bind to port 0 to get an OS-assigned port
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
