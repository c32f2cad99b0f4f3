//! Deployer (leader-only, stateless across cycles): on `DeploymentScheduled`, pushes the last
//! cached rendered artifact to every currently known HAProxy endpoint in parallel, reports
//! per-instance outcomes, then one aggregate `DeploymentCompleted`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use crate::event::bus::EventBus;
use crate::event::{
    DeploymentCompleted, DeploymentStarted, Event, EventKind, InstanceDeployed, InstanceDeploymentFailed, PodEndpoint,
};
use crate::external::DataplaneClient;

struct DeployerState {
    config_bytes: Vec<u8>,
    aux_files: BTreeMap<String, Vec<u8>>,
    endpoints: Vec<PodEndpoint>,
}

pub struct Deployer {
    client: Arc<dyn DataplaneClient>,
    state: Mutex<DeployerState>,
}

impl Deployer {
    pub fn new(client: Arc<dyn DataplaneClient>) -> Self {
        Self {
            client,
            state: Mutex::new(DeployerState {
                config_bytes: Vec::new(),
                aux_files: BTreeMap::new(),
                endpoints: Vec::new(),
            }),
        }
    }

    async fn deploy(&self, bus: &EventBus) {
        let (config_bytes, aux_files, endpoints) = {
            let state = self.state.lock().unwrap();
            (state.config_bytes.clone(), state.aux_files.clone(), state.endpoints.clone())
        };
        bus.publish(Event::new(EventKind::DeploymentStarted(DeploymentStarted {
            endpoints: endpoints.clone(),
        })));

        let started = Instant::now();
        let total = endpoints.len();

        let pushes = endpoints.into_iter().map(|endpoint| {
            let client = Arc::clone(&self.client);
            let config_bytes = config_bytes.clone();
            let aux_files = aux_files.clone();
            async move {
                let result = client.push(&endpoint, &config_bytes, &aux_files).await;
                (endpoint, result)
            }
        });
        let results = join_all(pushes).await;

        let mut succeeded = 0;
        for (endpoint, result) in results {
            match result {
                Ok(push) => {
                    succeeded += 1;
                    info!(namespace = %endpoint.namespace, name = %endpoint.name, "instance deployed");
                    bus.publish(Event::new(EventKind::InstanceDeployed(InstanceDeployed {
                        endpoint,
                        duration: started.elapsed(),
                        reload_required: push.reload_required,
                    })));
                }
                Err(err) => {
                    warn!(namespace = %endpoint.namespace, name = %endpoint.name, %err, "instance deployment failed");
                    bus.publish(Event::new(EventKind::InstanceDeploymentFailed(InstanceDeploymentFailed {
                        endpoint,
                        error: err.to_string(),
                        retryable: err.retryable(),
                    })));
                }
            }
        }

        bus.publish(Event::new(EventKind::DeploymentCompleted(DeploymentCompleted {
            total,
            succeeded,
            failed: total - succeeded,
            duration: started.elapsed(),
        })));
    }

    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::TemplateRendered(rendered) => {
                    let mut state = self.state.lock().unwrap();
                    state.config_bytes = rendered.config_bytes;
                    state.aux_files = rendered.aux_files;
                }
                EventKind::HAProxyPodsDiscovered(discovered) => {
                    self.state.lock().unwrap().endpoints = discovered.endpoints;
                }
                EventKind::DeploymentScheduled => {
                    self.deploy(&bus).await;
                }
                _ => {}
            }
        }
    }
}
