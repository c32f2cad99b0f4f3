//! Prometheus metrics assembled from the event stream: the Metrics component subscribes like
//! any other always-running Stage 1 component, except it turns every event it sees into a
//! counter/histogram update instead of a log line.

use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};

use crate::event::{Event, EventKind};

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ErrorCategoryLabel {
    pub category: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct PhaseLabel {
    pub phase: String,
}

#[derive(Clone)]
pub struct Metrics {
    errors_total: Family<ErrorCategoryLabel, Counter>,
    reconciliations_total: Counter,
    reconciliation_duration: Histogram,
    render_failures_total: Family<PhaseLabel, Counter>,
    validation_failures_total: Counter,
    deployments_total: Counter,
    instances_deployed_total: Counter,
    instances_deployment_failures_total: Family<PhaseLabel, Counter>,
    drift_triggers_total: Counter,
    watched_resources: Gauge,
    is_leader: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("htic");
        Self::new(&mut registry)
    }
}

impl Metrics {
    /// Registers every metric into a caller-supplied registry, so the binary can serve them
    /// from the same `/metrics` endpoint as the Kubernetes client's own request metrics.
    pub fn new(registry: &mut Registry) -> Self {
        let errors_total = Family::<ErrorCategoryLabel, Counter>::default();
        registry.register(
            "errors",
            "Errors observed on the event bus, by taxonomy category",
            errors_total.clone(),
        );

        let reconciliations_total = Counter::default();
        registry.register(
            "reconciliations",
            "Completed reconciliation cycles",
            reconciliations_total.clone(),
        );

        let reconciliation_duration = Histogram::new([0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10.].into_iter());
        registry.register_with_unit(
            "reconciliation_duration",
            "Time from ReconciliationTriggered to completion",
            Unit::Seconds,
            reconciliation_duration.clone(),
        );

        let render_failures_total = Family::<PhaseLabel, Counter>::default();
        registry.register(
            "render_failures",
            "Template render failures",
            render_failures_total.clone(),
        );

        let validation_failures_total = Counter::default();
        registry.register(
            "validation_failures",
            "HAProxy config validation failures",
            validation_failures_total.clone(),
        );

        let deployments_total = Counter::default();
        registry.register("deployments", "Completed deployment cycles", deployments_total.clone());

        let instances_deployed_total = Counter::default();
        registry.register(
            "instances_deployed",
            "Successful per-instance Dataplane pushes",
            instances_deployed_total.clone(),
        );

        let instances_deployment_failures_total = Family::<PhaseLabel, Counter>::default();
        registry.register(
            "instance_deployment_failures",
            "Failed per-instance Dataplane pushes, by retryable/non-retryable",
            instances_deployment_failures_total.clone(),
        );

        let drift_triggers_total = Counter::default();
        registry.register(
            "drift_prevention_triggers",
            "Drift-prevention re-deployments triggered by an idle period",
            drift_triggers_total.clone(),
        );

        let watched_resources = Gauge::default();
        registry.register(
            "watched_resource_types",
            "Number of resource types the Index Tracker is waiting on or has synced",
            watched_resources.clone(),
        );

        let is_leader = Gauge::default();
        registry.register("is_leader", "1 if this instance currently holds leadership", is_leader.clone());

        Self {
            errors_total,
            reconciliations_total,
            reconciliation_duration,
            render_failures_total,
            validation_failures_total,
            deployments_total,
            instances_deployed_total,
            instances_deployment_failures_total,
            drift_triggers_total,
            watched_resources,
            is_leader,
        }
    }

    fn record(&self, event: &Event) {
        match &event.kind {
            EventKind::ConfigInvalid(_) => self.bump_category("invalid_config"),
            EventKind::CredentialsInvalid(_) => self.bump_category("invalid_config"),
            EventKind::TemplateRenderFailed(f) => {
                self.bump_category("render_error");
                self.render_failures_total
                    .get_or_create(&PhaseLabel {
                        phase: f.template_name.clone(),
                    })
                    .inc();
            }
            EventKind::ValidationFailed(_) => {
                self.bump_category("validation_error");
                self.validation_failures_total.inc();
            }
            EventKind::ReconciliationFailed(f) => {
                self.bump_category("render_error");
                self.render_failures_total
                    .get_or_create(&PhaseLabel { phase: f.phase.clone() })
                    .inc();
            }
            EventKind::InstanceDeploymentFailed(f) => {
                self.bump_category("instance_deployment_error");
                let phase = if f.retryable { "retryable" } else { "permanent" };
                self.instances_deployment_failures_total
                    .get_or_create(&PhaseLabel { phase: phase.to_string() })
                    .inc();
            }
            EventKind::ReconciliationCompleted(c) => {
                self.reconciliations_total.inc();
                self.reconciliation_duration.observe(c.duration.as_secs_f64());
            }
            EventKind::InstanceDeployed(_) => {
                self.instances_deployed_total.inc();
            }
            EventKind::DeploymentCompleted(_) => {
                self.deployments_total.inc();
            }
            EventKind::DriftPreventionTriggered(_) => {
                self.drift_triggers_total.inc();
            }
            EventKind::IndexSynchronized(s) => {
                self.watched_resources.set(s.counts.len() as i64);
            }
            EventKind::BecameLeader => self.is_leader.set(1),
            EventKind::LostLeadership => self.is_leader.set(0),
            _ => {}
        }
    }

    fn bump_category(&self, category: &str) {
        self.errors_total
            .get_or_create(&ErrorCategoryLabel {
                category: category.to_string(),
            })
            .inc();
    }

    pub async fn run(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.record(&event);
        }
    }
}
