//! CLI regression tests for the `portcullis` binary.
//!
//! These run the binary as a subprocess against a mock issuer to pin flag
//! names, exit codes and the report format.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::{json, Value};

use portcullis_test::{unreachable_issuer, TestIssuer, TestKey};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns an assert_cmd Command wrapping the `portcullis` binary.
fn portcullis() -> Command {
    // cargo_bin is deprecated for custom build-dir setups; fine for standard workspace use.
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("portcullis").expect("portcullis binary not found");
    for var in [
        "PORTCULLIS_AUDIENCE",
        "PORTCULLIS_CONFIG",
        "PORTCULLIS_INSECURE",
        "PORTCULLIS_WAIT_SECONDS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token_for(issuer: &TestIssuer, key: &TestKey, sub: &str, exp: u64) -> String {
    key.sign(&json!({
        "sub": sub,
        "iss": issuer.issuer(),
        "aud": "portcullis-tests",
        "exp": exp,
        "scope": "openid profile",
    }))
}

// ---------------------------------------------------------------------------
// Argument handling
// ---------------------------------------------------------------------------

#[test]
fn help_lists_validate() {
    portcullis()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("validate"));
}

#[test]
fn validate_without_token_is_a_usage_error() {
    portcullis()
        .args(["validate", "https://idp.example.com"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_issuer_exits_one() {
    portcullis()
        .args(["validate", "ftp://idp.example.com", "a.b.c"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("invalid_issuer"));
}

#[test]
fn missing_config_file_exits_one() {
    portcullis()
        .args(["validate", "https://idp.example.com", "a.b.c"])
        .args(["--config", "/nonexistent/portcullis.toml"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("failed to load config"));
}

#[test]
fn unreachable_issuer_reports_discovery_failure() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        config,
        "discovery_max_attempts = 1\nrequest_timeout_seconds = 2.0"
    )
    .unwrap();

    portcullis()
        .args(["validate", &unreachable_issuer(), "a.b.c"])
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .code(1)
        .stderr(contains("discovery_failed"));
}

// ---------------------------------------------------------------------------
// Validation reports
// ---------------------------------------------------------------------------

#[test]
fn valid_token_prints_subject_and_userinfo() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let token = token_for(&issuer, &TestKey::rsa_k1(), "alice", now() + 3600);
    issuer.set_userinfo(&token, json!({ "sub": "alice", "email": "alice@example.com" }));

    portcullis()
        .args(["validate", &issuer.issuer(), &token])
        .assert()
        .success()
        .stdout(contains("alice -> valid"))
        .stdout(contains("> Result        : ok"))
        .stdout(contains("> Token type    : bearer"))
        .stdout(contains("\"scope\":\"openid profile\""))
        .stdout(contains("alice@example.com"));

    assert_eq!(issuer.userinfo_requests(), 1);
}

#[test]
fn expired_token_exits_one_with_kind() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let token = token_for(&issuer, &TestKey::rsa_k1(), "alice", now() - 60);

    portcullis()
        .args(["validate", &issuer.issuer(), &token])
        .assert()
        .failure()
        .code(1)
        .stdout(contains("-> invalid"))
        .stdout(contains("token_expired"));

    assert_eq!(issuer.userinfo_requests(), 0);
}

#[test]
fn audience_from_environment_is_enforced() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let token = token_for(&issuer, &TestKey::rsa_k1(), "alice", now() + 3600);

    portcullis()
        .args(["validate", &issuer.issuer(), &token])
        .env("PORTCULLIS_AUDIENCE", "someone-else")
        .assert()
        .failure()
        .code(1)
        .stdout(contains("audience_mismatch"));
}

#[test]
fn json_report_for_access_token() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let key = TestKey::rsa_k1().with_typ("at+jwt");
    let token = token_for(&issuer, &key, "bob", now() + 3600);
    issuer.set_userinfo(&token, json!({ "sub": "bob", "name": "Bob" }));

    let output = portcullis()
        .args(["validate", &issuer.issuer(), &token, "--format", "json"])
        .args(["--audience", "portcullis-tests"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], json!(true));
    assert_eq!(report["result"], json!("ok"));
    assert_eq!(report["subject"], json!("bob"));
    assert_eq!(report["token_type"], json!("access"));
    assert_eq!(report["standard_claims"]["aud"], json!(["portcullis-tests"]));
    assert_eq!(report["extra_claims"]["scope"], json!("openid profile"));
    assert_eq!(report["userinfo"]["name"], json!("Bob"));
}

#[test]
fn userinfo_failure_does_not_change_the_verdict() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let token = token_for(&issuer, &TestKey::rsa_k1(), "carol", now() + 3600);

    portcullis()
        .args(["validate", &issuer.issuer(), &token])
        .assert()
        .success()
        .stdout(contains("carol -> valid"))
        .stdout(contains("> Userinfo      : failed"));
}

#[test]
fn id_token_also_gets_userinfo() {
    let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
    let token = TestKey::rsa_k1().sign(&json!({
        "sub": "dave",
        "iss": issuer.issuer(),
        "exp": now() + 3600,
        "nonce": "n-0S6_WzA2Mj",
    }));
    issuer.set_userinfo(&token, json!({ "sub": "dave", "email": "dave@example.com" }));

    portcullis()
        .args(["validate", &issuer.issuer(), &token])
        .assert()
        .success()
        .stdout(contains("> Token type    : id"))
        .stdout(contains("dave@example.com"));

    assert_eq!(issuer.userinfo_requests(), 1);
}
