//! The event catalog: every message type that crosses the bus.
//!
//! `Event` is the opaque, immutable-after-publication value from the data model. It is a
//! plain enum rather than a trait object: every subscriber gets its own `.clone()`, and
//! because every payload below owns its data (no `Rc`/`Arc` on mutable fields), cloning is
//! always a deep copy. That is the whole immutability story - there is no separate
//! defensive-copy step because there is nothing to alias.

pub mod bus;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{Config, Credentials};

/// A resource snapshot as handed over by the external Kubernetes client: the generic
/// envelope around a ConfigMap/Secret's `data` field plus its resourceVersion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEnvelope {
    pub resource_version: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodEndpoint {
    pub namespace: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
}

/// One event, carrying its own publication timestamp.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Stable name used for ring-buffer indexing and log correlation.
    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    /// `request_id` for events that are `Request`s in the data-model sense.
    pub fn request_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ConfigValidationRequest(r) => Some(&r.request_id),
            _ => None,
        }
    }

    /// `(request_id, responder_name)` for events that are `Response`s; `None` otherwise.
    /// This is the one place the bus's scatter-gather needs to know about a concrete
    /// event shape, since the catalog currently defines exactly one request/response pair.
    pub fn as_response(&self) -> Option<(&str, &str)> {
        match &self.kind {
            EventKind::ConfigValidationResponse(r) => Some((&r.request_id, &r.responder_name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventKind {
    // lifecycle
    ControllerStarted,
    ControllerShutdown,

    // config
    ConfigResourceChanged(ResourceChanged),
    ConfigParsed(ConfigParsed),
    ConfigValidationRequest(ConfigValidationRequest),
    ConfigValidationResponse(ConfigValidationResponse),
    ConfigValidated(ConfigValidated),
    ConfigInvalid(ConfigInvalid),

    // credentials
    SecretResourceChanged(ResourceChanged),
    CredentialsUpdated(CredentialsUpdated),
    CredentialsInvalid(CredentialsInvalid),

    // resources
    ResourceIndexUpdated(ResourceIndexUpdated),
    ResourceSyncComplete(ResourceSyncComplete),
    IndexSynchronized(IndexSynchronized),

    // reconciliation
    ReconciliationTriggered(ReconciliationTriggered),
    ReconciliationStarted,
    ReconciliationCompleted(ReconciliationCompleted),
    ReconciliationFailed(ReconciliationFailed),

    // template
    TemplateRendered(TemplateRendered),
    TemplateRenderFailed(TemplateRenderFailed),

    // validation
    ValidationStarted,
    ValidationCompleted(ValidationCompleted),
    ValidationFailed(ValidationFailed),

    // deployment
    DeploymentScheduled,
    DeploymentStarted(DeploymentStarted),
    InstanceDeployed(InstanceDeployed),
    InstanceDeploymentFailed(InstanceDeploymentFailed),
    DeploymentCompleted(DeploymentCompleted),
    DriftPreventionTriggered(DriftPreventionTriggered),

    // pods
    HAProxyPodsDiscovered(HAProxyPodsDiscovered),
    HAProxyPodAdded(PodEndpoint),
    HAProxyPodRemoved(PodEndpoint),
    HAProxyPodTerminated(PodEndpoint),

    // leadership
    LeaderElectionStarted,
    BecameLeader,
    LostLeadership,
    NewLeaderObserved(NewLeaderObserved),
}

impl EventKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventKind::ControllerStarted => "ControllerStarted",
            EventKind::ControllerShutdown => "ControllerShutdown",
            EventKind::ConfigResourceChanged(_) => "ConfigResourceChanged",
            EventKind::ConfigParsed(_) => "ConfigParsed",
            EventKind::ConfigValidationRequest(_) => "ConfigValidationRequest",
            EventKind::ConfigValidationResponse(_) => "ConfigValidationResponse",
            EventKind::ConfigValidated(_) => "ConfigValidated",
            EventKind::ConfigInvalid(_) => "ConfigInvalid",
            EventKind::SecretResourceChanged(_) => "SecretResourceChanged",
            EventKind::CredentialsUpdated(_) => "CredentialsUpdated",
            EventKind::CredentialsInvalid(_) => "CredentialsInvalid",
            EventKind::ResourceIndexUpdated(_) => "ResourceIndexUpdated",
            EventKind::ResourceSyncComplete(_) => "ResourceSyncComplete",
            EventKind::IndexSynchronized(_) => "IndexSynchronized",
            EventKind::ReconciliationTriggered(_) => "ReconciliationTriggered",
            EventKind::ReconciliationStarted => "ReconciliationStarted",
            EventKind::ReconciliationCompleted(_) => "ReconciliationCompleted",
            EventKind::ReconciliationFailed(_) => "ReconciliationFailed",
            EventKind::TemplateRendered(_) => "TemplateRendered",
            EventKind::TemplateRenderFailed(_) => "TemplateRenderFailed",
            EventKind::ValidationStarted => "ValidationStarted",
            EventKind::ValidationCompleted(_) => "ValidationCompleted",
            EventKind::ValidationFailed(_) => "ValidationFailed",
            EventKind::DeploymentScheduled => "DeploymentScheduled",
            EventKind::DeploymentStarted(_) => "DeploymentStarted",
            EventKind::InstanceDeployed(_) => "InstanceDeployed",
            EventKind::InstanceDeploymentFailed(_) => "InstanceDeploymentFailed",
            EventKind::DeploymentCompleted(_) => "DeploymentCompleted",
            EventKind::DriftPreventionTriggered(_) => "DriftPreventionTriggered",
            EventKind::HAProxyPodsDiscovered(_) => "HAProxyPodsDiscovered",
            EventKind::HAProxyPodAdded(_) => "HAProxyPodAdded",
            EventKind::HAProxyPodRemoved(_) => "HAProxyPodRemoved",
            EventKind::HAProxyPodTerminated(_) => "HAProxyPodTerminated",
            EventKind::LeaderElectionStarted => "LeaderElectionStarted",
            EventKind::BecameLeader => "BecameLeader",
            EventKind::LostLeadership => "LostLeadership",
            EventKind::NewLeaderObserved(_) => "NewLeaderObserved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChanged {
    pub envelope: ResourceEnvelope,
}

#[derive(Debug, Clone)]
pub struct ConfigParsed {
    pub config: Config,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConfigValidationRequest {
    pub request_id: String,
    pub config: Config,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConfigValidationResponse {
    pub request_id: String,
    pub responder_name: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigValidated {
    pub config: Config,
    pub version: String,
    pub secret_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInvalid {
    pub errors: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CredentialsUpdated {
    pub credentials: Credentials,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsInvalid {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIndexUpdated {
    pub resource_type: String,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub is_initial_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSyncComplete {
    pub resource_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSynchronized {
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationTriggered {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationCompleted {
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationFailed {
    pub phase: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRendered {
    pub config_bytes: Vec<u8>,
    pub aux_file_count: usize,
    pub aux_files: BTreeMap<String, Vec<u8>>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRenderFailed {
    pub template_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCompleted {
    pub duration: Duration,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailed {
    pub errors: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStarted {
    pub endpoints: Vec<PodEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDeployed {
    pub endpoint: PodEndpoint,
    pub duration: Duration,
    pub reload_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDeploymentFailed {
    pub endpoint: PodEndpoint,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentCompleted {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftPreventionTriggered {
    pub time_since_last: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HAProxyPodsDiscovered {
    pub count: usize,
    pub endpoints: Vec<PodEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLeaderObserved {
    pub identity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_event_does_not_alias_original() {
        let mut event = Event::new(EventKind::ConfigInvalid(ConfigInvalid {
            errors: BTreeMap::from([("basic".to_string(), vec!["bad port".to_string()])]),
        }));
        let clone = event.clone();
        if let EventKind::ConfigInvalid(ref mut invalid) = event.kind {
            invalid.errors.get_mut("basic").unwrap().push("mutated".to_string());
        }
        let EventKind::ConfigInvalid(ref invalid) = clone.kind else {
            panic!("wrong kind");
        };
        assert_eq!(invalid.errors["basic"], vec!["bad port".to_string()]);
    }

    #[test]
    fn type_tags_are_stable() {
        assert_eq!(Event::new(EventKind::BecameLeader).type_tag(), "BecameLeader");
    }
}
