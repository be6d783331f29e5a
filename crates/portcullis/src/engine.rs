//! Engine lifecycle.
//!
//! An [`Engine`] is an explicit acquire/release pair around one issuer:
//! `initialize` starts background discovery, `uninitialize` (or dropping the
//! engine) stops it and forgets everything learned about the issuer.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime};

use crate::config::{EngineConfig, IssuerConfig};
use crate::discovery::{DiscoveryContext, DiscoveryManager, ProviderMetadata, Schedule};
use crate::error::{Error, Result};
use crate::jwks::{KeyStore, StoreResolver};
use crate::readiness::{ReadinessGate, ReadinessState};
use crate::runtime;
use crate::transport::{HttpClient, TransportPolicy};
use crate::userinfo::{self, UserInfo};
use crate::validate::{self, ValidationPolicy, ValidationResult};

/// State that lives for one initialize/uninitialize cycle.
struct Session {
    issuer: IssuerConfig,
    http: HttpClient,
    metadata: Arc<ArcSwapOption<ProviderMetadata>>,
    keys: Arc<KeyStore>,
}

/// OIDC token validation engine for a single issuer.
///
/// All methods are blocking and may be called from any number of threads,
/// including threads that belong to another async runtime.
pub struct Engine {
    config: EngineConfig,
    transport: TransportPolicy,
    gate: Arc<ReadinessGate>,
    session: RwLock<Option<Arc<Session>>>,
    /// Serializes initialize, uninitialize and set_insecure.
    discovery: Mutex<Option<DiscoveryManager>>,
    runtime: Option<Runtime>,
}

impl Engine {
    /// Create an engine and its runtime. No network traffic happens until
    /// [`initialize`](Self::initialize).
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let runtime = runtime::build(config.worker_threads)?;

        Ok(Self {
            config,
            transport: TransportPolicy::new(),
            gate: Arc::new(ReadinessGate::new()),
            session: RwLock::new(None),
            discovery: Mutex::new(None),
            runtime: Some(runtime),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Disable (or re-enable) TLS verification for all issuer traffic.
    ///
    /// Only allowed while uninitialized.
    pub fn set_insecure(&self, enabled: bool) -> Result<()> {
        let _lifecycle = self.discovery.lock();
        if self.session.read().is_some() {
            return Err(Error::AlreadyInitialized);
        }
        self.transport.set_insecure(enabled);
        Ok(())
    }

    pub fn is_insecure(&self) -> bool {
        self.transport.is_insecure()
    }

    /// Start discovery for `issuer_url`. Returns without waiting for it.
    pub fn initialize(&self, issuer_url: &str) -> Result<()> {
        let mut discovery = self.discovery.lock();
        if self.session.read().is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let handle = self.handle()?;
        let issuer = IssuerConfig::new(issuer_url, &self.config, self.transport.is_insecure())?;
        let http = self
            .transport
            .build_client(&self.config)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let session = Arc::new(Session {
            issuer: issuer.clone(),
            http: http.clone(),
            metadata: Arc::new(ArcSwapOption::empty()),
            keys: Arc::new(KeyStore::new(http.clone(), self.config.key_refresh_cooldown())),
        });
        *self.session.write() = Some(Arc::clone(&session));

        self.gate.begin();
        *discovery = Some(DiscoveryManager::start(
            handle,
            DiscoveryContext {
                issuer,
                http,
                metadata: Arc::clone(&session.metadata),
                keys: Arc::clone(&session.keys),
                gate: Arc::clone(&self.gate),
                schedule: Schedule::from_config(&self.config),
            },
        ));

        portcullis_telemetry::log_initialized!(
            issuer = %session.issuer.issuer_url(),
            discovery_endpoint = %session.issuer.discovery_endpoint(),
            insecure = session.issuer.insecure_mode(),
            "Engine initialized"
        );
        Ok(())
    }

    /// Stop discovery and release all issuer state.
    pub fn uninitialize(&self) -> Result<()> {
        let mut discovery = self.discovery.lock();
        let session = self.session.write().take().ok_or(Error::NotInitialized)?;

        if let Some(manager) = discovery.take() {
            let handle = self.handle()?;
            manager.stop(handle);
        }

        session.metadata.store(None);
        session.keys.clear();
        self.gate.reset();
        self.transport.reset();

        portcullis_telemetry::log_uninitialized!(
            issuer = %session.issuer.issuer_url(),
            "Engine uninitialized"
        );
        Ok(())
    }

    /// Block until the first discovery cycle finished or `timeout` elapsed.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        self.gate.wait_until_ready(timeout)
    }

    pub fn state(&self) -> ReadinessState {
        self.gate.state()
    }

    /// Issuer of the current cycle, if initialized.
    pub fn issuer(&self) -> Option<IssuerConfig> {
        self.session.read().as_ref().map(|s| s.issuer.clone())
    }

    /// Provider metadata, once discovery succeeded.
    pub fn provider_metadata(&self) -> Option<Arc<ProviderMetadata>> {
        self.session
            .read()
            .as_ref()
            .and_then(|s| s.metadata.load_full())
    }

    /// Verify `token` and extract its identity.
    pub fn validate(&self, token: &str) -> Result<ValidationResult> {
        let session = self.ready_session()?;
        let metadata = session.metadata.load_full().ok_or(Error::NotInitialized)?;
        let handle = self.handle()?;

        let supported_algs = metadata.supported_algs();
        let policy = ValidationPolicy {
            issuer: session.issuer.issuer_url(),
            supported_algs: &supported_algs,
            audience: self.config.audience.as_deref(),
            leeway: self.config.leeway_seconds,
        };
        let resolver = StoreResolver {
            store: &session.keys,
            handle,
            jwks_uri: &metadata.jwks_uri,
        };

        let result = validate::validate(token, &policy, &resolver, validate::unix_now());
        if let Err(e) = &result {
            portcullis_telemetry::log_token_rejected!(
                reason = e.kind().as_str(),
                error = %e,
                "Token rejected"
            );
        }
        result
    }

    /// Fetch the userinfo claims for `access_token`. Never cached.
    pub fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo> {
        let session = self.ready_session()?;
        let endpoint = session
            .metadata
            .load_full()
            .and_then(|m| m.userinfo_endpoint.clone());
        let http = session.http.clone();
        let token = access_token.to_string();

        runtime::block_on(self.handle()?, async move {
            userinfo::fetch(&http, endpoint.as_deref(), &token).await
        })?
    }

    fn ready_session(&self) -> Result<Arc<Session>> {
        if !self.gate.is_ready() {
            return Err(Error::NotInitialized);
        }
        self.session.read().clone().ok_or(Error::NotInitialized)
    }

    fn handle(&self) -> Result<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| Error::Runtime("engine runtime is gone".into()))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.uninitialize();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
