//! TestIssuer: a mock OIDC provider.
//!
//! Serves discovery, JWKS and userinfo from a wiremock server. Responses are
//! computed per request from shared state, so tests can rotate keys or break
//! endpoints while an engine is running against the issuer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::key::{jwks, TestKey};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const JWKS_PATH: &str = "/jwks";
const USERINFO_PATH: &str = "/userinfo";

struct State {
    base_url: String,
    advertised_issuer: Option<String>,
    userinfo_advertised: bool,
    discovery_delay: Duration,
    jwks: Value,
    jwks_status: Option<u16>,
    userinfo: HashMap<String, Value>,
    discovery_requests: usize,
    jwks_requests: usize,
    userinfo_requests: usize,
}

impl State {
    fn discovery_document(&self) -> Value {
        let base = &self.base_url;
        let mut doc = json!({
            "issuer": self.advertised_issuer.as_deref().unwrap_or(base),
            "jwks_uri": format!("{}{}", base, JWKS_PATH),
            "authorization_endpoint": format!("{}/authorize", base),
            "token_endpoint": format!("{}/token", base),
            "id_token_signing_alg_values_supported": ["RS256", "ES256"],
        });
        if self.userinfo_advertised {
            doc["userinfo_endpoint"] = json!(format!("{}{}", base, USERINFO_PATH));
        }
        doc
    }
}

#[derive(Clone, Copy)]
enum Endpoint {
    Discovery,
    Jwks,
    UserInfo,
}

struct Route {
    state: Arc<Mutex<State>>,
    endpoint: Endpoint,
}

impl Respond for Route {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock();
        match self.endpoint {
            Endpoint::Discovery => {
                state.discovery_requests += 1;
                ResponseTemplate::new(200)
                    .set_body_json(state.discovery_document())
                    .set_delay(state.discovery_delay)
            }
            Endpoint::Jwks => {
                state.jwks_requests += 1;
                match state.jwks_status {
                    Some(status) => ResponseTemplate::new(status),
                    None => ResponseTemplate::new(200).set_body_json(state.jwks.clone()),
                }
            }
            Endpoint::UserInfo => {
                state.userinfo_requests += 1;
                let token = request
                    .headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "));
                match token.and_then(|t| state.userinfo.get(t)) {
                    Some(claims) => ResponseTemplate::new(200).set_body_json(claims.clone()),
                    None => ResponseTemplate::new(401)
                        .insert_header("WWW-Authenticate", "Bearer error=\"invalid_token\""),
                }
            }
        }
    }
}

/// Mock OIDC issuer on a random loopback port.
pub struct TestIssuer {
    server: MockServer,
    state: Arc<Mutex<State>>,
    _runtime: Runtime,
}

impl TestIssuer {
    /// Start an issuer publishing `keys`.
    pub fn start(keys: Vec<TestKey>) -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime starts");
        let server = runtime.block_on(MockServer::start());

        let state = Arc::new(Mutex::new(State {
            base_url: server.uri(),
            advertised_issuer: None,
            userinfo_advertised: true,
            discovery_delay: Duration::ZERO,
            jwks: jwks(&keys),
            jwks_status: None,
            userinfo: HashMap::new(),
            discovery_requests: 0,
            jwks_requests: 0,
            userinfo_requests: 0,
        }));

        runtime.block_on(async {
            for (endpoint, route_path) in [
                (Endpoint::Discovery, DISCOVERY_PATH),
                (Endpoint::Jwks, JWKS_PATH),
                (Endpoint::UserInfo, USERINFO_PATH),
            ] {
                Mock::given(method("GET"))
                    .and(path(route_path))
                    .respond_with(Route {
                        state: Arc::clone(&state),
                        endpoint,
                    })
                    .mount(&server)
                    .await;
            }
        });

        Self {
            server,
            state,
            _runtime: runtime,
        }
    }

    /// Issuer identifier (the server's base URL).
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.server.uri(), DISCOVERY_PATH)
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    pub fn userinfo_endpoint(&self) -> String {
        format!("{}{}", self.server.uri(), USERINFO_PATH)
    }

    /// Replace the published key set. Also clears [`fail_jwks`](Self::fail_jwks).
    pub fn publish(&self, keys: Vec<TestKey>) {
        let mut state = self.state.lock();
        state.jwks = jwks(&keys);
        state.jwks_status = None;
    }

    /// Answer JWKS requests with `status` and no body.
    pub fn fail_jwks(&self, status: u16) {
        self.state.lock().jwks_status = Some(status);
    }

    /// Advertise a different `issuer` in the discovery document.
    pub fn advertise_issuer(&self, issuer: &str) {
        self.state.lock().advertised_issuer = Some(issuer.to_string());
    }

    /// Leave `userinfo_endpoint` out of the discovery document.
    pub fn hide_userinfo_endpoint(&self) {
        self.state.lock().userinfo_advertised = false;
    }

    /// Hold every discovery response for `delay`.
    pub fn delay_discovery(&self, delay: Duration) {
        self.state.lock().discovery_delay = delay;
    }

    /// Accept `token` at the userinfo endpoint and answer with `claims`.
    pub fn set_userinfo(&self, token: &str, claims: Value) {
        self.state.lock().userinfo.insert(token.to_string(), claims);
    }

    pub fn discovery_requests(&self) -> usize {
        self.state.lock().discovery_requests
    }

    pub fn jwks_requests(&self) -> usize {
        self.state.lock().jwks_requests
    }

    pub fn userinfo_requests(&self) -> usize {
        self.state.lock().userinfo_requests
    }
}
