//! Narrow interfaces to the external collaborators named in the data model: the template
//! rendering engine, the JSONPath evaluator, the HAProxy binary/dataplane validator, and the
//! Dataplane HTTP client. Only inputs/outputs matter here - none of these traits know what an
//! event is.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::Stream;

use crate::config::{Config, WatchedResource};
use crate::watch::store::{StoreKey, StoreSnapshot};

#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    pub config_bytes: Vec<u8>,
    pub aux_files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("{template_name}: {message}")]
pub struct TemplateError {
    pub template_name: String,
    pub message: String,
}

/// The rendering engine: turns a config plus the current cluster state into a HAProxy
/// config string and an auxiliary-files tree, or validates a template body in isolation.
pub trait TemplateEngine: Send + Sync {
    fn render(
        &self,
        config: &Config,
        stores: &BTreeMap<String, StoreSnapshot>,
    ) -> Result<RenderedTemplate, TemplateError>;

    /// Syntax-only parse used by the template validator; does not require cluster state.
    fn validate(&self, template_body: &str) -> Result<(), TemplateError>;
}

/// JSONPath expression validation/extraction, used by the JSONPath validator and by Store
/// indexing.
pub trait JsonPathEvaluator: Send + Sync {
    fn validate_expr(&self, expr: &str) -> Result<(), String>;
    fn extract(&self, obj: &serde_json::Value, expr: &str) -> Option<serde_json::Value>;
}

#[derive(Debug, Clone, Default)]
pub struct HaproxySemanticReport {
    pub warnings: Vec<String>,
}

/// Invokes the HAProxy binary (or its dataplane-side equivalent) against a rendered config
/// and aux-files tree written into the expected filesystem layout.
#[async_trait]
pub trait HaproxyValidator: Send + Sync {
    async fn validate_syntax(&self, config_bytes: &[u8]) -> Result<(), Vec<String>>;
    async fn validate_semantic(
        &self,
        config_bytes: &[u8],
        aux_files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<HaproxySemanticReport, Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct DataplanePushResult {
    pub reload_required: bool,
}

/// Per-instance Dataplane API client.
#[async_trait]
pub trait DataplaneClient: Send + Sync {
    async fn push(
        &self,
        endpoint: &crate::event::PodEndpoint,
        config_bytes: &[u8],
        aux_files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<DataplanePushResult, DataplaneError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DataplaneError {
    #[error("transport error talking to {0}: {1}")]
    Transport(String, String),
    #[error("rejected by {0}: {1}")]
    Rejected(String, String),
}

impl DataplaneError {
    /// Per the error taxonomy: connection-level failures are worth retrying on the next
    /// reconciliation cycle, outright rejections are not.
    pub fn retryable(&self) -> bool {
        matches!(self, DataplaneError::Transport(_, _))
    }
}

/// One raw callback from the Kubernetes informer machinery: add/update collapse into
/// `Applied` (the core never cares which), `Deleted` carries the last known body, and
/// `Synced` marks the end of the informer's initial list.
#[derive(Debug, Clone)]
pub enum InformerEvent {
    Applied(serde_json::Value),
    Deleted(serde_json::Value),
    Synced,
}

/// A `Watcher` is handed one of these per resource type; the informer machinery that
/// produces it (label selectors, namespace scoping, relisting) lives entirely outside the
/// core, wired up by the binary.
pub trait ResourceInformer: Stream<Item = InformerEvent> + Send + Unpin {}
impl<T> ResourceInformer for T where T: Stream<Item = InformerEvent> + Send + Unpin {}

/// One-shot fetch of a named resource (a ConfigMap/Secret), used by Stage 0's initial
/// config/credentials fetch, plus the on-demand lazy fetch a `StoreKind::OnDemand` watched
/// resource needs to resolve a single indexed key back into its full body.
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_resource(&self, resource_name: &str) -> Result<crate::event::ResourceEnvelope, String>;

    /// `key` is the `index_by` tuple that produced it; by convention an on-demand resource's
    /// `index_by` is `["metadata.namespace", "metadata.name"]` so a key resolves to a single
    /// namespaced GET. Returns `None` on any error, including not-found - the on-demand store
    /// treats a miss as "temporarily unavailable", not as a hard failure.
    async fn fetch_dynamic_resource(&self, resource: &WatchedResource, key: &StoreKey) -> Option<serde_json::Value>;
}

/// Builds a fresh informer stream per call. A watcher's stream is one-shot (it ends when the
/// underlying watch does), so re-entering a stage on reinit needs a factory rather than a
/// pre-built stream.
pub trait InformerFactory: Send + Sync {
    fn watch_resource(&self, resource: &crate::config::WatchedResource) -> Box<dyn ResourceInformer>;
    fn watch_named_resource(&self, resource_name: &str) -> Box<dyn ResourceInformer>;
}

/// One callback from the leader-election adapter. The election algorithm itself (lease
/// acquisition, renewal, contention) is entirely out of scope here - this is just the
/// `OnStartedLeading`/`OnStoppedLeading`/`OnNewLeader` callback surface translated into a
/// stream the orchestrator can fold into bus events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderElectionEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(String),
}

pub trait LeaderElectionFeed: Stream<Item = LeaderElectionEvent> + Send + Unpin {}
impl<T> LeaderElectionFeed for T where T: Stream<Item = LeaderElectionEvent> + Send + Unpin {}

/// Builds a fresh leader-election feed per iteration, mirroring `InformerFactory`.
pub trait LeaderElectorFactory: Send + Sync {
    fn elect(&self, lease_name: &str) -> Box<dyn LeaderElectionFeed>;
}
