//! TLS verification against an issuer with a self-signed certificate.

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use portcullis::{Engine, EngineConfig, ErrorKind, ReadinessState};
use portcullis_test::{TestKey, TlsIssuer};
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

fn config() -> EngineConfig {
    EngineConfig::new()
        .with_discovery_max_attempts(1)
        .with_request_timeout(Duration::from_secs(2))
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn self_signed_issuer_rejected_by_default() {
    let issuer = TlsIssuer::start(vec![TestKey::rsa_k1()]);
    let engine = Engine::new(config()).unwrap();
    assert!(!engine.is_insecure());

    engine.initialize(&issuer.issuer()).unwrap();
    let err = engine.wait_until_ready(READY_TIMEOUT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiscoveryFailed);
    assert_eq!(engine.state(), ReadinessState::Failed);
    // The handshake never completed, so no request reached the issuer.
    assert_eq!(issuer.discovery_requests(), 0);

    engine.uninitialize().unwrap();
}

#[test]
fn insecure_mode_accepts_self_signed_issuer() {
    let issuer = TlsIssuer::start(vec![TestKey::rsa_k1()]);
    let engine = Engine::new(config()).unwrap();

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(logs.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || engine.set_insecure(true)).unwrap();
    assert!(logs.contents().contains("\"event\":\"insecure_transport\""));
    assert!(logs.contents().contains("WARN"));

    engine.initialize(&issuer.issuer()).unwrap();
    assert!(engine.issuer().unwrap().insecure_mode());
    engine.wait_until_ready(READY_TIMEOUT).unwrap();
    assert_eq!(issuer.discovery_requests(), 1);
    assert_eq!(issuer.jwks_requests(), 1);

    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    let token = TestKey::rsa_k1().sign(&json!({
        "sub": "u1",
        "iss": issuer.issuer(),
        "exp": exp,
    }));
    assert_eq!(engine.validate(&token).unwrap().subject_id, "u1");

    engine.uninitialize().unwrap();
    assert!(!engine.is_insecure());
}

#[test]
fn insecure_mode_ends_with_the_cycle() {
    let issuer = TlsIssuer::start(vec![TestKey::rsa_k1()]);
    let engine = Engine::new(config()).unwrap();

    engine.set_insecure(true).unwrap();
    engine.initialize(&issuer.issuer()).unwrap();
    engine.wait_until_ready(READY_TIMEOUT).unwrap();
    engine.uninitialize().unwrap();

    // Next cycle is back to verifying certificates.
    engine.initialize(&issuer.issuer()).unwrap();
    let err = engine.wait_until_ready(READY_TIMEOUT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiscoveryFailed);
    assert_eq!(issuer.discovery_requests(), 1);
}
