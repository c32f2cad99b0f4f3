//! Orchestrator: the outer retry loop plus the seven-stage startup sequence. Owns nothing of
//! substance itself - its job is wiring every other component to the bus in the right order and
//! tearing an iteration down cleanly when the config changes underneath it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commentator::{Commentator, DEFAULT_RING_BUFFER_CAPACITY};
use crate::config::loader::{self, parse_config, parse_credentials};
use crate::config::{Config, StoreKind, WatchedResource};
use crate::deploy::deployer::Deployer;
use crate::deploy::discovery::Discovery;
use crate::deploy::drift::run_drift_monitor;
use crate::deploy::scheduler::Scheduler;
use crate::error::CoreError;
use crate::event::bus::EventBus;
use crate::event::{
    ConfigValidated, CredentialsUpdated, Event, EventKind, ReconciliationTriggered, ResourceChanged,
    ResourceEnvelope,
};
use crate::executor::run_executor;
use crate::external::{
    DataplaneClient, HaproxyValidator, InformerFactory, JsonPathEvaluator, KubeClient,
    LeaderElectionEvent, LeaderElectorFactory, TemplateEngine,
};
use crate::reconcile::{run_reconciler, DEFAULT_DEBOUNCE_INTERVAL};
use crate::render::haproxy_validator::ValidatorAdapter;
use crate::render::Renderer;
use crate::state_cache::StateCache;
use crate::validate::base::run_validator;
use crate::validate::basic::validate_basic;
use crate::validate::change_handler::run_change_handler;
use crate::validate::jsonpath::validate_jsonpaths;
use crate::validate::template::validate_templates;
use crate::watch::index_tracker::run_index_tracker;
use crate::watch::store::{MemoryStore, OnDemandStore, ResourceFetcher, Store, StoreKey};
use crate::watch::watcher::{merge_ignore_fields, run_watcher, HAPROXY_PODS_RESOURCE_TYPE};

pub const RETRY_DELAY: Duration = Duration::from_secs(5);
const DRAIN_GRACE_PERIOD: Duration = Duration::from_millis(500);
const VALIDATION_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Every external collaborator the orchestrator needs to construct one iteration's pipeline.
/// All `Arc`-based so the same handles are cheap to share across every component that needs
/// one, with no `Box`/`Arc` mismatch at the call sites.
pub struct Collaborators {
    pub kube_client: Arc<dyn KubeClient>,
    pub informer_factory: Arc<dyn InformerFactory>,
    pub leader_elector: Arc<dyn LeaderElectorFactory>,
    pub jsonpath_evaluator: Arc<dyn JsonPathEvaluator>,
    pub template_engine: Arc<dyn TemplateEngine>,
    pub haproxy_validator: Arc<dyn HaproxyValidator>,
    pub dataplane_client: Arc<dyn DataplaneClient>,
    pub metrics: Arc<crate::metrics::Metrics>,
}

pub struct Orchestrator {
    collaborators: Collaborators,
    config_resource_name: String,
    secret_resource_name: String,
    state_handle: watch::Sender<Option<Arc<StateCache>>>,
}

enum IterationExit {
    ConfigChanged,
    Cancelled,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config_resource_name: String, secret_resource_name: String) -> Self {
        let (state_handle, _) = watch::channel(None);
        Self {
            collaborators,
            config_resource_name,
            secret_resource_name,
            state_handle,
        }
    }

    /// Hands the binary's debug-vars endpoint a live handle to the current iteration's
    /// State Cache. `None` until Stage 1 of the first iteration has spun up; flips back to
    /// `None` between an iteration tearing down and its successor reaching Stage 1 again.
    pub fn subscribe_state(&self) -> watch::Receiver<Option<Arc<StateCache>>> {
        self.state_handle.subscribe()
    }

    /// Retries a failed iteration after [`RETRY_DELAY`]; restarts immediately when an
    /// iteration ends because its config changed.
    pub async fn run(&self, parent_cancel: CancellationToken) {
        loop {
            if parent_cancel.is_cancelled() {
                return;
            }
            let outcome = self.run_iteration(&parent_cancel).await;
            let _ = self.state_handle.send(None);
            match outcome {
                Ok(IterationExit::ConfigChanged) => {
                    info!("configuration changed, starting a fresh iteration");
                }
                Ok(IterationExit::Cancelled) => {
                    info!("orchestrator cancelled, exiting outer loop");
                    return;
                }
                Err(err) => {
                    error!(%err, "iteration failed, retrying after delay");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn run_iteration(&self, parent_cancel: &CancellationToken) -> Result<IterationExit, CoreError> {
        let iteration_cancel = parent_cancel.child_token();

        // Stage 0 - fetch and structurally validate initial state before anything else spins up.
        let (config_envelope, secret_envelope) = tokio::try_join!(
            self.collaborators.kube_client.get_resource(&self.config_resource_name),
            self.collaborators.kube_client.get_resource(&self.secret_resource_name),
        )
        .map_err(CoreError::TransientInit)?;

        let config = parse_config(&config_envelope).map_err(|e| CoreError::TransientInit(e.to_string()))?;
        let credentials = parse_credentials(&secret_envelope).map_err(|e| CoreError::TransientInit(e.to_string()))?;
        self.validate_structurally(&config)?;

        let bus = Arc::new(EventBus::new());

        // Stage 1 - always-running components.
        let commentator = Arc::new(Commentator::new(DEFAULT_RING_BUFFER_CAPACITY));
        tokio::spawn(commentator.run(bus.subscribe(256)));
        tokio::spawn(loader::run_config_loader(bus.clone(), bus.subscribe(16)));
        tokio::spawn(loader::run_credentials_loader(bus.clone(), bus.subscribe(16)));
        self.spawn_validators(&bus);

        let (reinit_tx, mut reinit_rx) = watch::channel(None);
        tokio::spawn(run_change_handler(
            bus.clone(),
            bus.subscribe(16),
            reinit_tx,
            VALIDATION_REQUEST_TIMEOUT,
            config_envelope.resource_version.clone(),
        ));

        let stores = build_stores(&config, &self.collaborators.kube_client);
        let state_cache = Arc::new(StateCache::new(stores.clone()));
        tokio::spawn(Arc::clone(&state_cache).run(bus.subscribe(64)));
        let _ = self.state_handle.send(Some(state_cache.clone()));
        tokio::spawn(Arc::clone(&self.collaborators.metrics).run(bus.subscribe(256)));

        let leader_feed = self.collaborators.leader_elector.elect(&config.controller.leader_election.lease_name);
        tokio::spawn(forward_leader_election(leader_feed, bus.clone()));

        // Every always-running Stage 1 subscriber, plus the State Cache the data model calls
        // out by name, is registered by now, so it's safe to go live: a publish while the bus
        // is unstarted only reaches the pre-start buffer, not any subscriber, so starting any
        // later would deadlock Stage 2/3's blocking waits against their own events.
        bus.start();

        // Stage 2 - resource watchers, including the auto-injected haproxy-pods watcher, gated
        // on the Index Tracker observing every expected resource type.
        let mut expected_types: Vec<String> = config.watched_resources.keys().cloned().collect();
        expected_types.push(HAPROXY_PODS_RESOURCE_TYPE.to_string());
        let index_tracker = tokio::spawn(run_index_tracker(expected_types, bus.clone(), bus.subscribe(64)));

        self.spawn_resource_watchers(&config, &stores, &bus);

        tokio::select! {
            result = index_tracker => { result.map_err(|e| CoreError::TransientInit(e.to_string()))?; }
            _ = iteration_cancel.cancelled() => return Ok(IterationExit::Cancelled),
        }

        // Stage 3 - config/credentials informers feed the loaders spawned in Stage 1 via the
        // generic *ResourceChanged events; Stage 0's snapshot only bootstraps this iteration.
        // A named-resource watch has exactly one object to list, so its first observation (or
        // an explicit Synced marker) is that watch's whole initial sync; forwarding continues
        // in the background once this iteration stops blocking on it.
        let config_informer = self.collaborators.informer_factory.watch_named_resource(&self.config_resource_name);
        let secret_informer = self.collaborators.informer_factory.watch_named_resource(&self.secret_resource_name);
        let config_synced = spawn_single_resource_watch(config_informer, bus.clone(), true);
        let secret_synced = spawn_single_resource_watch(secret_informer, bus.clone(), false);

        tokio::select! {
            _ = async { let _ = tokio::join!(config_synced, secret_synced); } => {}
            _ = iteration_cancel.cancelled() => return Ok(IterationExit::Cancelled),
        }

        // Stage 4 - folded into the bus.start() call above: the State Cache subscribed before
        // it, so it observes live events from here on and catches up on initial state via
        // Stage 5's republish below.

        // Stage 5 - the reconciliation and leader-only deployment pipelines.
        tokio::spawn(run_reconciler(bus.clone(), bus.subscribe(64), DEFAULT_DEBOUNCE_INTERVAL));

        let renderer = Arc::new(Renderer::new(self.collaborators.template_engine.clone(), stores.clone()));
        tokio::spawn(Arc::clone(&renderer).run(bus.clone(), bus.subscribe(16)));

        let validator_adapter = Arc::new(ValidatorAdapter::new(self.collaborators.haproxy_validator.clone()));
        tokio::spawn(Arc::clone(&validator_adapter).run(bus.clone(), bus.subscribe(16)));

        tokio::spawn(run_executor(bus.clone(), bus.subscribe(32)));

        let discovery = Arc::new(Discovery::new(stores[HAPROXY_PODS_RESOURCE_TYPE].clone(), config.dataplane.port));
        tokio::spawn(Arc::clone(&discovery).run(bus.clone(), bus.subscribe(16)));

        let deployer = Arc::new(Deployer::new(self.collaborators.dataplane_client.clone()));
        tokio::spawn(Arc::clone(&deployer).run(bus.clone(), bus.subscribe(16)));

        let scheduler = Arc::new(Scheduler::new(config.dataplane.min_deployment_interval));
        tokio::spawn(Arc::clone(&scheduler).run(bus.clone(), bus.subscribe(16)));

        tokio::spawn(run_drift_monitor(bus.clone(), bus.subscribe(8), config.dataplane.drift_prevention_interval));

        republish_initial_state(&bus, &config, &config_envelope, &secret_envelope, credentials);

        // Stage 6 - auxiliary HTTP servers (health/metrics/debug-vars) are owned by the binary,
        // which holds `state_cache` and `bus` handles for that purpose; nothing further to do here.

        tokio::select! {
            _ = iteration_cancel.cancelled() => Ok(IterationExit::Cancelled),
            changed = reinit_rx.changed() => {
                if changed.is_err() {
                    return Ok(IterationExit::Cancelled);
                }
                iteration_cancel.cancel();
                tokio::time::sleep(DRAIN_GRACE_PERIOD).await;
                Ok(IterationExit::ConfigChanged)
            }
        }
    }

    fn validate_structurally(&self, config: &Config) -> Result<(), CoreError> {
        if let Err(errors) = validate_basic(config) {
            return Err(CoreError::InvalidConfig(BTreeMap::from([("basic".to_string(), errors)])));
        }
        if let Err(errors) = validate_templates(config, self.collaborators.template_engine.as_ref()) {
            return Err(CoreError::InvalidConfig(BTreeMap::from([("template".to_string(), errors)])));
        }
        if let Err(errors) = validate_jsonpaths(config, self.collaborators.jsonpath_evaluator.as_ref()) {
            return Err(CoreError::InvalidConfig(BTreeMap::from([("jsonpath".to_string(), errors)])));
        }
        Ok(())
    }

    fn spawn_validators(&self, bus: &Arc<EventBus>) {
        tokio::spawn(run_validator("basic".to_string(), bus.clone(), bus.subscribe(16), validate_basic));

        let engine = self.collaborators.template_engine.clone();
        tokio::spawn(run_validator("template".to_string(), bus.clone(), bus.subscribe(16), move |config: &Config| {
            validate_templates(config, engine.as_ref())
        }));

        let evaluator = self.collaborators.jsonpath_evaluator.clone();
        tokio::spawn(run_validator("jsonpath".to_string(), bus.clone(), bus.subscribe(16), move |config: &Config| {
            validate_jsonpaths(config, evaluator.as_ref())
        }));
    }

    fn spawn_resource_watchers(&self, config: &Config, stores: &BTreeMap<String, Arc<dyn Store>>, bus: &Arc<EventBus>) {
        for (name, descriptor) in &config.watched_resources {
            let informer = self.collaborators.informer_factory.watch_resource(descriptor);
            let ignore_fields = merge_ignore_fields(&config.watched_resources_ignore_fields, &[]);
            tokio::spawn(run_watcher(
                name.clone(),
                informer,
                descriptor.index_by.clone(),
                ignore_fields,
                stores[name].clone(),
                self.collaborators.jsonpath_evaluator.clone(),
                bus.clone(),
            ));
        }

        let pods_informer = self.collaborators.informer_factory.watch_named_resource(HAPROXY_PODS_RESOURCE_TYPE);
        tokio::spawn(run_watcher(
            HAPROXY_PODS_RESOURCE_TYPE.to_string(),
            pods_informer,
            vec![],
            vec![],
            stores[HAPROXY_PODS_RESOURCE_TYPE].clone(),
            self.collaborators.jsonpath_evaluator.clone(),
            bus.clone(),
        ));
    }
}

fn build_stores(config: &Config, kube_client: &Arc<dyn KubeClient>) -> BTreeMap<String, Arc<dyn Store>> {
    let cache_ttl = crate::watch::store::on_demand_cache_ttl(config.dataplane.drift_prevention_interval);
    let mut stores: BTreeMap<String, Arc<dyn Store>> = BTreeMap::new();
    for (name, descriptor) in &config.watched_resources {
        let store: Arc<dyn Store> = match descriptor.store {
            StoreKind::Full => Arc::new(MemoryStore::new()),
            StoreKind::OnDemand => {
                let fetcher = Arc::new(KubeResourceFetcher {
                    kube_client: kube_client.clone(),
                    descriptor: descriptor.clone(),
                });
                Arc::new(OnDemandStore::new(cache_ttl, fetcher))
            }
        };
        stores.insert(name.clone(), store);
    }
    stores.insert(HAPROXY_PODS_RESOURCE_TYPE.to_string(), Arc::new(MemoryStore::new()));
    stores
}

fn republish_initial_state(
    bus: &Arc<EventBus>,
    config: &Config,
    config_envelope: &ResourceEnvelope,
    secret_envelope: &ResourceEnvelope,
    credentials: crate::config::Credentials,
) {
    bus.publish(Event::new(EventKind::ConfigValidated(ConfigValidated {
        config: config.clone(),
        version: config_envelope.resource_version.clone(),
        secret_version: Some(secret_envelope.resource_version.clone()),
    })));
    bus.publish(Event::new(EventKind::CredentialsUpdated(CredentialsUpdated {
        credentials,
        version: secret_envelope.resource_version.clone(),
    })));
    bus.publish(Event::new(EventKind::ReconciliationTriggered(ReconciliationTriggered {
        reason: "initial_sync_complete".to_string(),
    })));
}

/// Spawns a task forwarding a named-resource informer's callbacks into the generic
/// `ConfigResourceChanged`/`SecretResourceChanged` events the Stage 1 loaders expect, returning
/// a receiver that resolves once the first observation (or an explicit `Synced` marker) has
/// been published - there is exactly one object behind a named-resource watch, so that first
/// observation is this watch's whole initial sync.
fn spawn_single_resource_watch(
    mut informer: Box<dyn crate::external::ResourceInformer>,
    bus: Arc<EventBus>,
    is_config: bool,
) -> tokio::sync::oneshot::Receiver<()> {
    let (synced_tx, synced_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let mut synced_tx = Some(synced_tx);
        while let Some(event) = informer.next().await {
            match event {
                crate::external::InformerEvent::Applied(body) => {
                    match envelope_from_value(body) {
                        Some(envelope) => {
                            let changed = ResourceChanged { envelope };
                            let kind = if is_config {
                                EventKind::ConfigResourceChanged(changed)
                            } else {
                                EventKind::SecretResourceChanged(changed)
                            };
                            bus.publish(Event::new(kind));
                        }
                        None => warn!("resource informer produced a body without a usable data map"),
                    }
                    if let Some(tx) = synced_tx.take() {
                        let _ = tx.send(());
                    }
                }
                crate::external::InformerEvent::Deleted(_) => {}
                crate::external::InformerEvent::Synced => {
                    if let Some(tx) = synced_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    });
    synced_rx
}

fn envelope_from_value(value: serde_json::Value) -> Option<ResourceEnvelope> {
    let resource_version = value
        .pointer("/metadata/resourceVersion")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let data: BTreeMap<String, String> = serde_json::from_value(value.get("data")?.clone()).ok()?;
    Some(ResourceEnvelope { resource_version, data })
}

/// Translates the leader-election adapter's callback feed into `BecameLeader`/`LostLeadership`/
/// `NewLeaderObserved` bus events. The election algorithm itself lives entirely outside the core.
async fn forward_leader_election(mut feed: Box<dyn crate::external::LeaderElectionFeed>, bus: Arc<EventBus>) {
    bus.publish(Event::new(EventKind::LeaderElectionStarted));
    while let Some(event) = feed.next().await {
        let kind = match event {
            LeaderElectionEvent::StartedLeading => EventKind::BecameLeader,
            LeaderElectionEvent::StoppedLeading => EventKind::LostLeadership,
            LeaderElectionEvent::NewLeader(identity) => {
                EventKind::NewLeaderObserved(crate::event::NewLeaderObserved { identity })
            }
        };
        bus.publish(Event::new(kind));
    }
}

/// Lazily fetches an on-demand store's bodies one key at a time via the Kubernetes client,
/// rather than holding every object of that type in memory the way `MemoryStore` does.
struct KubeResourceFetcher {
    kube_client: Arc<dyn KubeClient>,
    descriptor: WatchedResource,
}

#[async_trait::async_trait]
impl ResourceFetcher for KubeResourceFetcher {
    async fn fetch(&self, key: &StoreKey) -> Option<serde_json::Value> {
        self.kube_client.fetch_dynamic_resource(&self.descriptor, key).await
    }
}
