//! Index Tracker: waits for every expected resource type's `ResourceSyncComplete` and then
//! emits a single `IndexSynchronized`, gating the first reconciliation on having seen a
//! consistent initial snapshot of everything the config asked to watch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, IndexSynchronized};

/// Runs until every name in `expected` has reported a `ResourceSyncComplete`, then publishes
/// `IndexSynchronized` once and returns. A resource type outside `expected` is ignored so the
/// auto-injected haproxy-pods watcher (tracked separately by Discovery) doesn't gate this.
pub async fn run_index_tracker(
    expected: Vec<String>,
    bus: Arc<EventBus>,
    mut rx: tokio::sync::mpsc::Receiver<Event>,
) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    if expected.is_empty() {
        bus.publish(Event::new(EventKind::IndexSynchronized(IndexSynchronized {
            counts,
        })));
        return;
    }

    while let Some(event) = rx.recv().await {
        let EventKind::ResourceSyncComplete(complete) = event.kind else {
            continue;
        };
        if !expected.contains(&complete.resource_type) {
            continue;
        }
        counts.insert(complete.resource_type, complete.count);
        if expected.iter().all(|name| counts.contains_key(name)) {
            info!(resource_types = expected.len(), "all watched resources synchronized");
            bus.publish(Event::new(EventKind::IndexSynchronized(IndexSynchronized {
                counts,
            })));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ResourceSyncComplete;

    #[tokio::test]
    async fn emits_once_all_expected_types_report() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(run_index_tracker(
            vec!["ingresses".to_string(), "services".to_string()],
            bus.clone(),
            rx,
        ));

        tx.send(Event::new(EventKind::ResourceSyncComplete(ResourceSyncComplete {
            resource_type: "ingresses".to_string(),
            count: 3,
        })))
        .await
        .unwrap();

        assert!(tokio::time::timeout(std::time::Duration::from_millis(30), output.recv())
            .await
            .is_err());

        tx.send(Event::new(EventKind::ResourceSyncComplete(ResourceSyncComplete {
            resource_type: "services".to_string(),
            count: 5,
        })))
        .await
        .unwrap();
        drop(tx);

        let event = output.recv().await.unwrap();
        let EventKind::IndexSynchronized(synced) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(synced.counts["ingresses"], 3);
        assert_eq!(synced.counts["services"], 5);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_expected_set_emits_immediately() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        run_index_tracker(vec![], bus.clone(), rx).await;
        let event = output.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::IndexSynchronized(_)));
    }
}
