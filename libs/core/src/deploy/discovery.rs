//! Discovery: watches the auto-injected haproxy-pods store and publishes
//! `HAProxyPodsDiscovered` whenever the resolved endpoint set actually changes, or on
//! `BecameLeader` replay of the last known set.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, HAProxyPodsDiscovered, PodEndpoint};
use crate::watch::store::Store;
use crate::watch::watcher::HAPROXY_PODS_RESOURCE_TYPE;

fn pod_to_endpoint(value: &serde_json::Value, port: u16) -> Option<PodEndpoint> {
    let namespace = value.pointer("/metadata/namespace")?.as_str()?.to_string();
    let name = value.pointer("/metadata/name")?.as_str()?.to_string();
    let ip = value.pointer("/status/podIP")?.as_str()?.to_string();
    Some(PodEndpoint {
        namespace,
        name,
        ip,
        port,
    })
}

pub struct Discovery {
    store: Arc<dyn Store>,
    port: u16,
    last: Mutex<Option<Vec<PodEndpoint>>>,
}

impl Discovery {
    pub fn new(store: Arc<dyn Store>, port: u16) -> Self {
        Self {
            store,
            port,
            last: Mutex::new(None),
        }
    }

    async fn recompute_and_maybe_publish(&self, bus: &EventBus) {
        let snapshot = self.store.list().await;
        let mut endpoints: Vec<PodEndpoint> = snapshot
            .items
            .iter()
            .filter_map(|(_, value)| pod_to_endpoint(value, self.port))
            .collect();
        endpoints.sort();

        let mut last = self.last.lock().unwrap();
        if last.as_ref() == Some(&endpoints) {
            return;
        }
        debug!(count = endpoints.len(), "haproxy pod endpoint set changed");
        let event = HAProxyPodsDiscovered {
            count: endpoints.len(),
            endpoints: endpoints.clone(),
        };
        *last = Some(endpoints);
        drop(last);
        bus.publish(Event::new(EventKind::HAProxyPodsDiscovered(event)));
    }

    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::ResourceIndexUpdated(update) if update.resource_type == HAPROXY_PODS_RESOURCE_TYPE => {
                    self.recompute_and_maybe_publish(&bus).await;
                }
                EventKind::BecameLeader => {
                    let last = self.last.lock().unwrap().clone();
                    if let Some(endpoints) = last {
                        bus.publish(Event::new(EventKind::HAProxyPodsDiscovered(HAProxyPodsDiscovered {
                            count: endpoints.len(),
                            endpoints,
                        })));
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ResourceIndexUpdated;
    use crate::watch::store::MemoryStore;

    #[tokio::test]
    async fn publishes_only_when_endpoint_set_changes() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        let store = Arc::new(MemoryStore::new());
        store.upsert(
            vec!["default".to_string(), "pod-a".to_string()],
            serde_json::json!({"metadata": {"namespace": "default", "name": "pod-a"}, "status": {"podIP": "10.0.0.1"}}),
        );
        let discovery = Arc::new(Discovery::new(store.clone(), 5555));
        let handle = tokio::spawn(Arc::clone(&discovery).run(bus.clone(), rx));

        tx.send(Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
            resource_type: HAPROXY_PODS_RESOURCE_TYPE.to_string(),
            created: 1,
            modified: 0,
            deleted: 0,
            is_initial_sync: true,
        })))
        .await
        .unwrap();
        let discovered = output.recv().await.unwrap();
        let EventKind::HAProxyPodsDiscovered(discovered) = discovered.kind else {
            panic!("wrong kind");
        };
        assert_eq!(discovered.count, 1);

        // no change in the resolved set: nothing further should publish
        tx.send(Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
            resource_type: HAPROXY_PODS_RESOURCE_TYPE.to_string(),
            created: 0,
            modified: 1,
            deleted: 0,
            is_initial_sync: false,
        })))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();
        assert!(output.try_recv().is_err());
    }
}
