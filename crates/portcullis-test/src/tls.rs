//! TlsIssuer: a minimal OIDC provider behind a self-signed certificate.
//!
//! Serves discovery and JWKS over HTTPS with a certificate generated per
//! instance, so no client trusts it unless verification is disabled.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_rustls::TlsAcceptor;

use crate::key::{jwks, TestKey};
use crate::TestError;

const MAX_REQUEST_HEAD: usize = 16 * 1024;

struct Routes {
    discovery: Value,
    jwks: Value,
    discovery_requests: AtomicUsize,
    jwks_requests: AtomicUsize,
}

impl Routes {
    fn respond(&self, path: &str) -> (&'static str, String) {
        match path {
            "/.well-known/openid-configuration" => {
                self.discovery_requests.fetch_add(1, Ordering::SeqCst);
                ("200 OK", self.discovery.to_string())
            }
            "/jwks" => {
                self.jwks_requests.fetch_add(1, Ordering::SeqCst);
                ("200 OK", self.jwks.to_string())
            }
            _ => ("404 Not Found", "{}".to_string()),
        }
    }
}

/// HTTPS issuer on a random loopback port with a self-signed certificate.
pub struct TlsIssuer {
    addr: SocketAddr,
    routes: Arc<Routes>,
    _runtime: Runtime,
}

impl TlsIssuer {
    /// Start an issuer publishing `keys`.
    pub fn start(keys: Vec<TestKey>) -> Self {
        let acceptor = acceptor().expect("self-signed TLS config builds");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("test runtime starts");

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("bind an ephemeral port");
        let addr = listener.local_addr().expect("listener has an address");

        let base = format!("https://{}", addr);
        let routes = Arc::new(Routes {
            discovery: json!({
                "issuer": base,
                "jwks_uri": format!("{}/jwks", base),
                "id_token_signing_alg_values_supported": ["RS256", "ES256"],
            }),
            jwks: jwks(&keys),
            discovery_requests: AtomicUsize::new(0),
            jwks_requests: AtomicUsize::new(0),
        });

        runtime.spawn(serve(listener, acceptor, Arc::clone(&routes)));

        Self {
            addr,
            routes,
            _runtime: runtime,
        }
    }

    /// Issuer identifier (`https://127.0.0.1:<port>`).
    pub fn issuer(&self) -> String {
        format!("https://{}", self.addr)
    }

    /// Discovery requests that completed the TLS handshake.
    pub fn discovery_requests(&self) -> usize {
        self.routes.discovery_requests.load(Ordering::SeqCst)
    }

    pub fn jwks_requests(&self) -> usize {
        self.routes.jwks_requests.load(Ordering::SeqCst)
    }
}

fn acceptor() -> Result<TlsAcceptor, TestError> {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(|e| TestError::Fixture(format!("certificate generation: {}", e)))?;
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TestError::Fixture(format!("TLS versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|e| TestError::Fixture(format!("TLS certificate: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn serve(listener: TcpListener, acceptor: TlsAcceptor, routes: Arc<Routes>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        let acceptor = acceptor.clone();
        let routes = Arc::clone(&routes);

        tokio::spawn(async move {
            // A verifying client aborts the handshake here.
            let Ok(mut tls) = acceptor.accept(stream).await else {
                return;
            };

            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match tls.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&chunk[..n]),
                }
                if head.len() > MAX_REQUEST_HEAD {
                    return;
                }
            }

            let request = String::from_utf8_lossy(&head);
            let path = request.split_whitespace().nth(1).unwrap_or("/");
            let (status, body) = routes.respond(path);
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = tls.write_all(response.as_bytes()).await;
            let _ = tls.shutdown().await;
        });
    }
}
