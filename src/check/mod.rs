//! Check resolution and metric registration
//!
//! `CheckResolver` lazily locates (or provisions) the remote check that owns
//! the trap, derives the submission target from it, and keeps the check's
//! metric inventory in step with what the client emits.
//!
//! Resolution runs at most once at a time: the attempt holds an async mutex for
//! its full duration and later callers re-check the `ready` flag after
//! acquiring it. A failed attempt leaves nothing behind, so the next call starts
//! over.

pub mod broker;
pub mod tls;

pub use broker::{BrokerProbe, BrokerSelector, BrokerSource, TcpProbe};
pub use tls::{CertPool, broker_server_name};

use crate::api::{ApiClient, Broker, CheckBundle, CheckBundleConfig, CheckBundleMetric, ResourceApi};
use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::metric::NewMetric;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reporting period, in seconds, of provisioned check bundles
pub const DEFAULT_CHECK_PERIOD: u32 = 60;
/// Timeout, in seconds, of provisioned check bundles
pub const DEFAULT_CHECK_TIMEOUT: f32 = 10.0;

const SECRET_LENGTH: usize = 16;

/// Where and how to submit metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapTarget {
    pub url: String,
    pub tls: bool,
    /// Certificate name the trap presents; `None` for plaintext targets
    pub server_name: Option<String>,
    /// Trust roots for the TLS handshake; `None` for plaintext targets
    pub cert_pool: Option<CertPool>,
}

impl TrapTarget {
    pub fn plaintext(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: false,
            server_name: None,
            cert_pool: None,
        }
    }
}

/// Random check secret: SHA-256 of 2048 random bytes, hex, first 16 characters
pub fn generate_secret() -> String {
    let mut seed = [0u8; 2048];
    rand::rng().fill(&mut seed[..]);
    let digest = Sha256::digest(seed);
    hex::encode(digest)[..SECRET_LENGTH].to_string()
}

/// Lookup keys that change as resolution learns more; guarded by the resolve lock
#[derive(Debug)]
struct Identity {
    submission_url: Option<String>,
    check_id: Option<u64>,
}

#[derive(Debug, Clone)]
struct Resolved {
    target: TrapTarget,
    bundle: Option<CheckBundle>,
    broker: Option<Broker>,
}

#[derive(Debug, Default)]
struct PendingTags {
    tags: HashMap<String, Vec<String>>,
    needs_update: bool,
}

/// Check-related settings copied out of `Config` at construction
#[derive(Debug, Clone)]
struct CheckSettings {
    management_enabled: bool,
    check_type: String,
    target_host: String,
    display_name: String,
    search_tag: String,
    tags: Vec<String>,
    secret: Option<String>,
    force_metric_activation: bool,
    broker_source: BrokerSource,
    ca_file: Option<PathBuf>,
}

/// Lazily resolves the submission target and tracks the active metric set
pub struct CheckResolver {
    settings: CheckSettings,
    api: Option<Arc<dyn ResourceApi>>,
    brokers: Option<BrokerSelector>,
    ready: AtomicBool,
    resolve_lock: tokio::sync::Mutex<Identity>,
    register_lock: tokio::sync::Mutex<()>,
    resolved: RwLock<Option<Resolved>>,
    /// Metric name → active on the remote check
    active_metrics: RwLock<HashMap<String, bool>>,
    pending_tags: Mutex<PendingTags>,
}

impl std::fmt::Debug for CheckResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckResolver")
            .field("ready", &self.is_ready())
            .field("management_enabled", &self.settings.management_enabled)
            .field("active_metrics", &self.active_metrics.read().len())
            .finish()
    }
}

impl CheckResolver {
    /// Build a resolver using the HTTP API client and TCP broker probe
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the configuration cannot identify a check.
    pub fn from_config(config: &Config) -> ClientResult<Self> {
        let api: Option<Arc<dyn ResourceApi>> = if config.check_management_enabled() {
            Some(Arc::new(ApiClient::new(&config.api)?))
        } else {
            None
        };
        Self::new(config, api, Arc::new(TcpProbe))
    }

    /// Build a resolver with explicit collaborators
    ///
    /// `api` must be present when the configuration enables check management.
    pub fn new(
        config: &Config,
        api: Option<Arc<dyn ResourceApi>>,
        probe: Arc<dyn BrokerProbe>,
    ) -> ClientResult<Self> {
        config.validate()?;

        let management_enabled = config.check_management_enabled();
        if management_enabled && api.is_none() {
            return Err(ClientError::Config(
                "check management is enabled but no resource API client was supplied".to_string(),
            ));
        }
        let api = if management_enabled { api } else { None };

        let brokers = api.as_ref().map(|api| {
            BrokerSelector::new(api.clone(), probe, config.broker.max_response_time())
        });

        let settings = CheckSettings {
            management_enabled,
            check_type: config.check.check_type.clone(),
            target_host: config.target_host(),
            display_name: config.display_name(),
            search_tag: config.search_tag(),
            tags: config.check.tags.clone(),
            secret: config.check.secret.clone().filter(|s| !s.is_empty()),
            force_metric_activation: config.check.force_metric_activation,
            broker_source: BrokerSource::from_config(&config.broker),
            ca_file: config.api.ca_file.clone(),
        };

        Ok(Self {
            settings,
            api,
            brokers,
            ready: AtomicBool::new(false),
            resolve_lock: tokio::sync::Mutex::new(Identity {
                submission_url: config.check.submission_url.clone(),
                check_id: config.check.id,
            }),
            register_lock: tokio::sync::Mutex::new(()),
            resolved: RwLock::new(None),
            active_metrics: RwLock::new(HashMap::new()),
            pending_tags: Mutex::new(PendingTags::default()),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Resolved submission target, once ready
    pub fn target(&self) -> Option<TrapTarget> {
        self.resolved.read().as_ref().map(|r| r.target.clone())
    }

    /// Cached check bundle, once ready with check management enabled
    pub fn bundle(&self) -> Option<CheckBundle> {
        self.resolved.read().as_ref().and_then(|r| r.bundle.clone())
    }

    pub fn broker(&self) -> Option<Broker> {
        self.resolved.read().as_ref().and_then(|r| r.broker.clone())
    }

    /// Resolve the submission target if not already resolved
    ///
    /// Concurrent callers wait for the in-flight attempt instead of starting
    /// their own, so at most one check is ever provisioned.
    pub async fn resolve(&self) -> ClientResult<TrapTarget> {
        if let Some(target) = self.ready_target() {
            return Ok(target);
        }

        let mut identity = self.resolve_lock.lock().await;
        if let Some(target) = self.ready_target() {
            return Ok(target);
        }

        tracing::debug!(
            submission_url = ?identity.submission_url,
            check_id = ?identity.check_id,
            "Resolving check"
        );

        let resolved = match self.resolve_locked(&mut identity).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, "Check resolution failed");
                return Err(e);
            }
        };
        let target = resolved.target.clone();
        self.install(resolved);

        tracing::info!(
            url = %target.url,
            tls = target.tls,
            server_name = ?target.server_name,
            "Check resolved"
        );
        Ok(target)
    }

    fn ready_target(&self) -> Option<TrapTarget> {
        if self.is_ready() { self.target() } else { None }
    }

    fn install(&self, resolved: Resolved) {
        let active: HashMap<String, bool> = resolved
            .bundle
            .iter()
            .flat_map(|b| b.metrics.iter())
            .map(|m| (m.name.clone(), m.is_active()))
            .collect();

        *self.active_metrics.write() = active;
        *self.resolved.write() = Some(resolved);
        self.ready.store(true, Ordering::Release);
    }

    async fn resolve_locked(&self, identity: &mut Identity) -> ClientResult<Resolved> {
        let Some(api) = self.api.as_deref() else {
            let url = identity.submission_url.clone().ok_or_else(|| {
                ClientError::Config(
                    "check management is disabled and no submission URL is configured".to_string(),
                )
            })?;
            return Ok(self.unmanaged(url).await);
        };

        if let Some(url) = identity.submission_url.clone() {
            if url.starts_with("http://") {
                return Ok(Resolved {
                    target: TrapTarget::plaintext(url),
                    bundle: None,
                    broker: None,
                });
            }

            let check = api.fetch_check_by_submission_url(&url).await?;
            let id = check.id().ok_or_else(|| ClientError::ApiDecode {
                endpoint: "/check".to_string(),
                reason: format!("check cid '{}' has no numeric id", check.cid),
            })?;
            // The trap URL changes if the broker assignment does; the id does not.
            identity.check_id = Some(id);
            identity.submission_url = None;

            let bundle = api.fetch_check_bundle_by_cid(&check.check_bundle).await?;
            return self.complete(api, bundle, None).await;
        }

        if let Some(id) = identity.check_id {
            let check = api.fetch_check_by_id(id).await?;
            let bundle = api.fetch_check_bundle_by_cid(&check.check_bundle).await?;
            return self.complete(api, bundle, None).await;
        }

        match self.search(api).await? {
            Some(bundle) => self.complete(api, bundle, None).await,
            None => {
                let (bundle, broker) = self.provision(api).await?;
                self.complete(api, bundle, Some(broker)).await
            }
        }
    }

    /// Target for a submission URL used without check management
    async fn unmanaged(&self, url: String) -> Resolved {
        let target = if url.starts_with("https://") {
            TrapTarget {
                server_name: tls::url_host(&url).ok(),
                cert_pool: Some(tls::load_cert_pool(None, self.settings.ca_file.as_deref()).await),
                tls: true,
                url,
            }
        } else {
            TrapTarget::plaintext(url)
        };

        Resolved {
            target,
            bundle: None,
            broker: None,
        }
    }

    fn search_query(&self) -> String {
        format!(
            "(active:1)(host:\"{}\")(type:\"{}\")(tags:{})",
            self.settings.target_host, self.settings.check_type, self.settings.search_tag
        )
    }

    async fn search(&self, api: &dyn ResourceApi) -> ClientResult<Option<CheckBundle>> {
        let query = self.search_query();
        let mut bundles = api.search_check_bundles(&query).await?;

        tracing::debug!(query = %query, matches = bundles.len(), "Searched check bundles");

        match bundles.len() {
            0 => Ok(None),
            1 => Ok(bundles.pop()),
            matched => {
                let mut active: Vec<CheckBundle> =
                    bundles.into_iter().filter(CheckBundle::is_active).collect();
                if active.len() == 1 {
                    Ok(active.pop())
                } else {
                    Err(ClientError::AmbiguousCheck {
                        matched,
                        active: active.len(),
                    })
                }
            }
        }
    }

    async fn provision(&self, api: &dyn ResourceApi) -> ClientResult<(CheckBundle, Broker)> {
        let selector = self.brokers.as_ref().ok_or_else(|| {
            ClientError::Internal("broker selector missing with check management enabled".to_string())
        })?;
        let broker = selector
            .select_broker(&self.settings.check_type, &self.settings.broker_source)
            .await?;

        let secret = self.settings.secret.clone().unwrap_or_else(generate_secret);

        let mut tags = vec![self.settings.search_tag.clone()];
        for tag in &self.settings.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let request = CheckBundle {
            brokers: vec![broker.cid.clone()],
            config: CheckBundleConfig {
                async_metrics: Some("true".to_string()),
                secret: Some(secret),
                ..CheckBundleConfig::default()
            },
            display_name: self.settings.display_name.clone(),
            metrics: Vec::new(),
            period: DEFAULT_CHECK_PERIOD,
            status: "active".to_string(),
            tags,
            target: self.settings.target_host.clone(),
            timeout: DEFAULT_CHECK_TIMEOUT,
            check_type: self.settings.check_type.clone(),
            ..CheckBundle::default()
        };

        let created = api.create_check_bundle(&request).await?;
        tracing::info!(
            bundle = ?created.cid,
            broker = %broker.cid,
            target = %created.target,
            "Created check bundle"
        );
        Ok((created, broker))
    }

    async fn complete(
        &self,
        api: &dyn ResourceApi,
        bundle: CheckBundle,
        broker: Option<Broker>,
    ) -> ClientResult<Resolved> {
        let url = bundle.config.submission_url.clone().ok_or_else(|| ClientError::ApiDecode {
            endpoint: bundle.cid.clone().unwrap_or_default(),
            reason: "check bundle has no config.submission_url".to_string(),
        })?;

        let broker = match broker {
            Some(broker) => broker,
            None => {
                let cid = bundle.brokers.first().ok_or_else(|| ClientError::ApiDecode {
                    endpoint: bundle.cid.clone().unwrap_or_default(),
                    reason: "check bundle lists no brokers".to_string(),
                })?;
                api.fetch_broker_by_cid(cid).await?
            }
        };

        let target = if url.starts_with("https:") {
            let server_name = broker_server_name(&broker, &url)?;
            let cert_pool = tls::load_cert_pool(Some(api), self.settings.ca_file.as_deref()).await;
            TrapTarget {
                url,
                tls: true,
                server_name: Some(server_name),
                cert_pool: Some(cert_pool),
            }
        } else {
            TrapTarget::plaintext(url)
        };

        Ok(Resolved {
            target,
            bundle: Some(bundle),
            broker: Some(broker),
        })
    }

    // ─── Active metric inventory ───────────────────────────────────────────

    /// Whether the remote check currently accepts `name`
    pub fn is_metric_active(&self, name: &str) -> bool {
        self.active_metrics.read().get(name).copied().unwrap_or(false)
    }

    /// Whether `name` must be registered before it is accepted
    ///
    /// True for metrics the check has never declared, and for declared but
    /// inactive metrics when `force_metric_activation` is set.
    pub fn activate_metric(&self, name: &str) -> bool {
        match self.active_metrics.read().get(name) {
            Some(true) => false,
            Some(false) => self.settings.force_metric_activation,
            None => true,
        }
    }

    /// Whether tag changes are waiting for the next registration update
    pub fn needs_update(&self) -> bool {
        self.pending_tags.lock().needs_update
    }

    /// Declare new metrics (and any pending tag changes) on the remote check
    ///
    /// A no-op before the resolver is ready. Without a managed bundle the
    /// metrics are marked active locally. On failure nothing changes, so the
    /// same metrics are offered again on the next flush.
    pub async fn register_metrics(&self, new_metrics: &[NewMetric]) -> ClientResult<()> {
        if !self.is_ready() {
            return Ok(());
        }

        let _guard = self.register_lock.lock().await;

        let (api, bundle) = match (self.api.as_deref(), self.bundle()) {
            (Some(api), Some(bundle)) => (api, bundle),
            _ => {
                let mut active = self.active_metrics.write();
                for metric in new_metrics {
                    active.insert(metric.name.clone(), true);
                }
                return Ok(());
            }
        };

        let pending = {
            let pending = self.pending_tags.lock();
            if new_metrics.is_empty() && !pending.needs_update {
                return Ok(());
            }
            pending.tags.clone()
        };

        let mut update = bundle;
        update.metrics.reserve(new_metrics.len());
        for metric in new_metrics {
            match update.metrics.iter_mut().find(|m| m.name == metric.name) {
                Some(existing) => existing.status = "active".to_string(),
                None => update.metrics.push(CheckBundleMetric {
                    name: metric.name.clone(),
                    metric_type: metric.kind.as_str().to_string(),
                    status: "active".to_string(),
                    tags: pending.get(&metric.name).cloned().unwrap_or_default(),
                    units: None,
                }),
            }
        }
        let mut applied: Vec<&str> = Vec::with_capacity(pending.len());
        for (name, tags) in &pending {
            if let Some(metric) = update.metrics.iter_mut().find(|m| &m.name == name) {
                metric.tags = tags.clone();
                applied.push(name);
            }
        }

        let stored = api.update_check_bundle(&update).await?;

        {
            let mut active = self.active_metrics.write();
            for metric in &stored.metrics {
                active.insert(metric.name.clone(), metric.is_active());
            }
            for metric in new_metrics {
                active.insert(metric.name.clone(), true);
            }
        }
        {
            let mut tags = self.pending_tags.lock();
            tags.tags.retain(|name, current| {
                !applied.contains(&name.as_str()) || pending.get(name) != Some(current)
            });
            tags.needs_update = tags
                .tags
                .keys()
                .any(|name| stored.metrics.iter().any(|m| &m.name == name));
        }
        if let Some(resolved) = self.resolved.write().as_mut() {
            resolved.bundle = Some(stored);
        }

        tracing::info!(
            new_metrics = new_metrics.len(),
            tag_updates = applied.len(),
            "Updated check bundle metrics"
        );
        Ok(())
    }

    /// Replace the tags of a metric; returns true if the tag set changed
    pub fn set_metric_tags(&self, name: &str, tags: &[String]) -> bool {
        let mut desired: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !desired.contains(tag) {
                desired.push(tag.clone());
            }
        }
        self.stage_tags(name, desired)
    }

    /// Append tags to a metric; returns true if any tag was new
    pub fn add_metric_tags(&self, name: &str, tags: &[String]) -> bool {
        let mut desired = self.current_tags(name);
        for tag in tags {
            if !desired.contains(tag) {
                desired.push(tag.clone());
            }
        }
        self.stage_tags(name, desired)
    }

    fn current_tags(&self, name: &str) -> Vec<String> {
        if let Some(tags) = self.pending_tags.lock().tags.get(name) {
            return tags.clone();
        }
        self.resolved
            .read()
            .as_ref()
            .and_then(|r| r.bundle.as_ref())
            .and_then(|b| b.metrics.iter().find(|m| m.name == name))
            .map(|m| m.tags.clone())
            .unwrap_or_default()
    }

    /// Whether `name` is declared on the cached bundle; true before resolution
    fn is_declared(&self, name: &str) -> bool {
        self.resolved
            .read()
            .as_ref()
            .and_then(|r| r.bundle.as_ref())
            .is_none_or(|b| b.metrics.iter().any(|m| m.name == name))
    }

    /// Tags for undeclared metrics wait for that metric's registration
    fn stage_tags(&self, name: &str, desired: Vec<String>) -> bool {
        if self.current_tags(name) == desired {
            return false;
        }
        let declared = self.is_declared(name);
        let mut pending = self.pending_tags.lock();
        pending.tags.insert(name.to_string(), desired);
        pending.needs_update |= declared;
        true
    }
}
