//! UserInfo endpoint client.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::transport::HttpClient;

/// Claims returned by the userinfo endpoint, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserInfo(Map<String, Value>);

impl UserInfo {
    pub fn claims(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The `sub` claim, which OpenID Connect requires in every response.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.0
    }
}

/// GET `endpoint` with `access_token` as bearer credential.
pub(crate) async fn fetch(
    http: &HttpClient,
    endpoint: Option<&str>,
    access_token: &str,
) -> Result<UserInfo> {
    let endpoint = endpoint.ok_or_else(|| Error::UserInfoRequestFailed {
        status: None,
        reason: "issuer does not advertise a userinfo endpoint".into(),
    })?;

    http.get_json::<Map<String, Value>>(endpoint, Some(access_token))
        .await
        .map(UserInfo)
        .map_err(|e| Error::UserInfoRequestFailed {
            status: e.status(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use portcullis_test::{TestIssuer, TestKey};
    use serde_json::json;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn http() -> HttpClient {
        HttpClient::new(&EngineConfig::default(), false).unwrap()
    }

    #[test]
    fn returns_payload_unmodified() {
        let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
        issuer.set_userinfo(
            "good-token",
            json!({ "sub": "u1", "email": "u1@example.com", "groups": ["a"] }),
        );

        let info = run(fetch(&http(), Some(&issuer.userinfo_endpoint()), "good-token")).unwrap();
        assert_eq!(info.subject(), Some("u1"));
        assert_eq!(info.get("groups"), Some(&json!(["a"])));
        assert_eq!(info.claims().len(), 3);
    }

    #[test]
    fn rejected_token_reports_status() {
        let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
        issuer.set_userinfo("good-token", json!({ "sub": "u1" }));

        let err = run(fetch(&http(), Some(&issuer.userinfo_endpoint()), "bad-token")).unwrap_err();
        assert!(matches!(err, Error::UserInfoRequestFailed { .. }));
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn missing_endpoint_has_no_status() {
        let err = run(fetch(&http(), None, "token")).unwrap_err();
        assert!(matches!(err, Error::UserInfoRequestFailed { status: None, .. }));
    }

    #[test]
    fn transport_failure_has_no_status() {
        let endpoint = format!("{}/userinfo", portcullis_test::unreachable_issuer());
        let err = run(fetch(&http(), Some(&endpoint), "token")).unwrap_err();
        assert!(matches!(err, Error::UserInfoRequestFailed { status: None, .. }));
    }

    #[test]
    fn responses_are_never_cached() {
        let issuer = TestIssuer::start(vec![TestKey::rsa_k1()]);
        issuer.set_userinfo("t", json!({ "sub": "u1" }));

        let client = http();
        let endpoint = issuer.userinfo_endpoint();
        run(fetch(&client, Some(&endpoint), "t")).unwrap();
        run(fetch(&client, Some(&endpoint), "t")).unwrap();
        assert_eq!(issuer.userinfo_requests(), 2);
    }
}
