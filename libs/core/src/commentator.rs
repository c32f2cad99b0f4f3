//! Event Commentator: subscribes to every event, keeps a fixed-capacity ring buffer for
//! correlation, and emits one structured log line per event at a domain-appropriate level.
//! Must be extended whenever a new event type is added to the catalog.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::event::{Event, EventKind};

pub const DEFAULT_RING_BUFFER_CAPACITY: usize = 1000;

pub struct Commentator {
    capacity: usize,
    ring: Mutex<VecDeque<Event>>,
}

impl Commentator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn remember(&self, event: &Event) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());
    }

    /// Count of events of `type_tag` seen since the buffer last wrapped, used to detect a
    /// slow-subscriber drop pattern (e.g. many `TemplateRenderFailed` in a short window).
    pub fn count_since(&self, type_tag: &str) -> usize {
        self.ring.lock().unwrap().iter().filter(|e| e.type_tag() == type_tag).count()
    }

    fn comment(&self, event: &Event) {
        let tag = event.type_tag();
        match &event.kind {
            EventKind::ReconciliationFailed(f) => {
                error!(phase = %f.phase, error = %f.error, event = tag, "reconciliation failed");
            }
            EventKind::TemplateRenderFailed(f) => {
                error!(template = %f.template_name, error = %f.error, event = tag, "template render failed");
            }
            EventKind::ValidationFailed(f) => {
                error!(errors = ?f.errors, duration_ms = %f.duration.as_millis(), event = tag, "validation failed");
            }
            EventKind::InstanceDeploymentFailed(f) => {
                error!(namespace = %f.endpoint.namespace, name = %f.endpoint.name, retryable = f.retryable, event = tag, "instance deployment failed");
            }
            EventKind::ConfigInvalid(i) => {
                warn!(errors = ?i.errors, event = tag, "config rejected by validators");
            }
            EventKind::CredentialsInvalid(i) => {
                warn!(errors = ?i.errors, event = tag, "credentials rejected");
            }
            EventKind::ReconciliationCompleted(c) => {
                let since_last = self.time_since_last_completion(event);
                info!(duration_ms = %c.duration.as_millis(), since_last_s = ?since_last, event = tag, "reconciliation completed");
            }
            EventKind::ValidationCompleted(c) => {
                info!(duration_ms = %c.duration.as_millis(), warnings = c.warnings.len(), event = tag, "validation completed");
            }
            EventKind::DeploymentCompleted(c) => {
                info!(total = c.total, succeeded = c.succeeded, failed = c.failed, duration_ms = %c.duration.as_millis(), event = tag, "deployment completed");
            }
            EventKind::BecameLeader | EventKind::LostLeadership | EventKind::ControllerStarted | EventKind::ControllerShutdown => {
                info!(event = tag, "lifecycle transition");
            }
            _ => {
                debug!(event = tag, "event observed");
            }
        }
    }

    fn time_since_last_completion(&self, current: &Event) -> Option<chrono::Duration> {
        let ring = self.ring.lock().unwrap();
        ring.iter()
            .rev()
            .find(|e| matches!(e.kind, EventKind::ReconciliationCompleted(_)) && e.timestamp < current.timestamp)
            .map(|previous| current.timestamp - previous.timestamp)
    }

    pub async fn run(self: std::sync::Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.comment(&event);
            self.remember(&event);
        }
    }
}
