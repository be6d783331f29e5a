//! JWKS key store.
//!
//! The current [`KeySet`] is published through `arc-swap`, so lookups never
//! block on a refresh. Refreshes are single-flight: callers that miss while a
//! fetch is running wait for it and then look again instead of fetching a
//! second time. Miss-triggered refreshes are additionally spaced by a
//! cooldown so that tokens carrying made-up key ids cannot hammer the issuer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::Deserialize;
use tokio::runtime::Handle;

use crate::crypto::{Algorithm, PublicKey};
use crate::error::{Error, Result};
use crate::runtime;
use crate::transport::HttpClient;

/// Raw JWK Set document. Keys stay untyped so one bad entry does not reject
/// the whole set.
#[derive(Debug, Deserialize)]
pub(crate) struct JwkSetDocument {
    keys: Vec<serde_json::Value>,
}

/// A single JWK (subset of fields needed for verification).
#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

/// A usable verification key.
#[derive(Debug)]
pub struct KeyEntry {
    kid: Option<String>,
    alg: Option<Algorithm>,
    key: PublicKey,
}

impl KeyEntry {
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithm pinned by the JWK `alg` member, if any.
    pub fn alg(&self) -> Option<Algorithm> {
        self.alg
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    fn accepts(&self, alg: Algorithm) -> bool {
        self.key.supports(alg) && self.alg.map_or(true, |pinned| pinned == alg)
    }
}

/// Immutable snapshot of an issuer's signing keys.
#[derive(Debug)]
pub struct KeySet {
    keys: Vec<Arc<KeyEntry>>,
    fetched_at: Instant,
}

impl KeySet {
    /// Parse a JWK Set, skipping keys that cannot verify signatures.
    ///
    /// A set without a single usable key is an error.
    pub(crate) fn from_document(doc: JwkSetDocument) -> Result<Self> {
        let total = doc.keys.len();
        let keys: Vec<Arc<KeyEntry>> = doc
            .keys
            .into_iter()
            .filter_map(|value| match parse_jwk(value) {
                Ok(entry) => Some(Arc::new(entry)),
                Err(reason) => {
                    tracing::debug!(reason = %reason, "skipping JWK");
                    None
                }
            })
            .collect();

        if keys.is_empty() {
            return Err(Error::KeyFetchFailed(format!(
                "no usable signing keys among {} published",
                total
            )));
        }

        Ok(Self {
            keys,
            fetched_at: Instant::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Key ids present in this set.
    pub fn kids(&self) -> HashSet<&str> {
        self.keys.iter().filter_map(|k| k.kid()).collect()
    }

    /// Find the key for `kid`, or the first compatible key when the token
    /// carries no `kid`.
    pub fn find(&self, kid: Option<&str>, alg: Algorithm) -> Option<Arc<KeyEntry>> {
        self.keys
            .iter()
            .find(|entry| {
                let kid_matches = match kid {
                    Some(kid) => entry.kid() == Some(kid),
                    None => true,
                };
                kid_matches && entry.accepts(alg)
            })
            .cloned()
    }
}

fn parse_jwk(value: serde_json::Value) -> std::result::Result<KeyEntry, String> {
    let jwk: Jwk = serde_json::from_value(value).map_err(|e| format!("invalid JWK: {}", e))?;

    if let Some(key_use) = jwk.key_use.as_deref() {
        if key_use != "sig" {
            return Err(format!("key use is {}", key_use));
        }
    }

    let alg = match jwk.alg.as_deref() {
        Some(name) => Some(
            name.parse::<Algorithm>()
                .map_err(|name| format!("unsupported key algorithm: {}", name))?,
        ),
        None => None,
    };

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or("missing RSA modulus (n)")?;
            let e = jwk.e.as_deref().ok_or("missing RSA exponent (e)")?;
            PublicKey::rsa_from_jwk(n, e)?
        }
        "EC" => {
            let crv = jwk.crv.as_deref().ok_or("missing EC curve (crv)")?;
            let x = jwk.x.as_deref().ok_or("missing EC x coordinate")?;
            let y = jwk.y.as_deref().ok_or("missing EC y coordinate")?;
            PublicKey::ec_from_jwk(crv, x, y)?
        }
        other => return Err(format!("unsupported key type: {}", other)),
    };

    if let Some(alg) = alg {
        if !key.supports(alg) {
            return Err(format!("key cannot be used with {}", alg));
        }
    }

    Ok(KeyEntry {
        kid: jwk.kid,
        alg,
        key,
    })
}

/// Resolves the verification key for a token header.
pub trait KeyResolver {
    fn resolve(&self, kid: Option<&str>, alg: Algorithm) -> Result<Arc<KeyEntry>>;
}

impl KeyResolver for KeySet {
    fn resolve(&self, kid: Option<&str>, alg: Algorithm) -> Result<Arc<KeyEntry>> {
        self.find(kid, alg)
            .ok_or_else(|| Error::UnknownKey(kid.unwrap_or("<none>").to_string()))
    }
}

/// Cached, rotating key set for one issuer.
pub(crate) struct KeyStore {
    http: HttpClient,
    current: ArcSwapOption<KeySet>,
    refresh_lock: tokio::sync::Mutex<()>,
    last_miss_refresh: parking_lot::Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl KeyStore {
    pub(crate) fn new(http: HttpClient, cooldown: Duration) -> Self {
        Self {
            http,
            current: ArcSwapOption::empty(),
            refresh_lock: tokio::sync::Mutex::new(()),
            last_miss_refresh: parking_lot::Mutex::new(None),
            cooldown,
        }
    }

    pub(crate) fn current(&self) -> Option<Arc<KeySet>> {
        self.current.load_full()
    }

    /// Drop the cached key set.
    pub(crate) fn clear(&self) {
        self.current.store(None);
    }

    fn fetched_at(&self) -> Option<Instant> {
        self.current().map(|set| set.fetched_at)
    }

    /// Fetch `jwks_uri` and replace the key set. The previous set is kept
    /// when the fetch fails.
    pub(crate) async fn refresh(&self, jwks_uri: &str) -> Result<Arc<KeySet>> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_store(jwks_uri).await
    }

    /// Refresh after a lookup miss observed against the set fetched at
    /// `seen`. Skipped when someone else refreshed in the meantime or when
    /// the cooldown has not elapsed.
    async fn refresh_after_miss(&self, jwks_uri: &str, seen: Option<Instant>) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.fetched_at() != seen {
            return Ok(());
        }
        if !self.claim_miss_refresh() {
            tracing::debug!(jwks_uri, "key refresh suppressed by cooldown");
            return Ok(());
        }

        self.fetch_and_store(jwks_uri).await.map(|_| ())
    }

    fn claim_miss_refresh(&self) -> bool {
        let mut last = self.last_miss_refresh.lock();
        match *last {
            Some(at) if at.elapsed() < self.cooldown => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn fetch_and_store(&self, jwks_uri: &str) -> Result<Arc<KeySet>> {
        let doc: JwkSetDocument = self
            .http
            .get_json(jwks_uri, None)
            .await
            .map_err(|e| Error::KeyFetchFailed(e.to_string()))?;

        let set = Arc::new(KeySet::from_document(doc)?);
        self.current.store(Some(Arc::clone(&set)));

        portcullis_telemetry::log_keys_refreshed!(
            jwks_uri,
            keys = set.len(),
            "Signing keys refreshed"
        );
        Ok(set)
    }

    /// Look up a key, refreshing at most once on a miss.
    pub(crate) fn get_key(
        self: &Arc<Self>,
        handle: &Handle,
        jwks_uri: &str,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Arc<KeyEntry>> {
        let snapshot = self.current();
        if let Some(entry) = snapshot.as_ref().and_then(|set| set.find(kid, alg)) {
            return Ok(entry);
        }

        let seen = snapshot.map(|set| set.fetched_at);
        let store = Arc::clone(self);
        let uri = jwks_uri.to_string();
        runtime::block_on(handle, async move {
            store.refresh_after_miss(&uri, seen).await
        })??;

        self.current()
            .and_then(|set| set.find(kid, alg))
            .ok_or_else(|| Error::UnknownKey(kid.unwrap_or("<none>").to_string()))
    }
}

/// [`KeyResolver`] over a [`KeyStore`] bound to the engine runtime.
pub(crate) struct StoreResolver<'a> {
    pub(crate) store: &'a Arc<KeyStore>,
    pub(crate) handle: &'a Handle,
    pub(crate) jwks_uri: &'a str,
}

impl KeyResolver for StoreResolver<'_> {
    fn resolve(&self, kid: Option<&str>, alg: Algorithm) -> Result<Arc<KeyEntry>> {
        self.store.get_key(self.handle, self.jwks_uri, kid, alg)
    }
}
