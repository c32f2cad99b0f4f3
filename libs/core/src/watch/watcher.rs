//! Resource Watchers. Each is bound to one watched-resource descriptor and an externally
//! supplied informer stream; it owns a `Store`, publishes `ResourceIndexUpdated` per change,
//! and summarizes its initial list as a single `is_initial_sync` event followed by
//! `ResourceSyncComplete`.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, ResourceIndexUpdated, ResourceSyncComplete};
use crate::external::{InformerEvent, JsonPathEvaluator, ResourceInformer};
use crate::watch::store::{Store, StoreKey};

pub const HAPROXY_PODS_RESOURCE_TYPE: &str = "haproxy-pods";

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn default_key(obj: &serde_json::Value) -> StoreKey {
    let namespace = obj
        .pointer("/metadata/namespace")
        .map(stringify)
        .unwrap_or_default();
    let name = obj.pointer("/metadata/name").map(stringify).unwrap_or_default();
    vec![namespace, name]
}

pub fn extract_key(
    obj: &serde_json::Value,
    index_by: &[String],
    evaluator: &dyn JsonPathEvaluator,
) -> StoreKey {
    if index_by.is_empty() {
        return default_key(obj);
    }
    index_by
        .iter()
        .map(|expr| {
            evaluator
                .extract(obj, expr)
                .as_ref()
                .map(stringify)
                .unwrap_or_default()
        })
        .collect()
}

/// Strips `ignore_fields` JSONPath locations from a resource body before it is stored, so
/// volatile fields (status, managedFields, ...) never trigger a spurious "modified" count.
pub fn strip_ignored_fields(
    mut obj: serde_json::Value,
    ignore_fields: &[String],
    evaluator: &dyn JsonPathEvaluator,
) -> serde_json::Value {
    for expr in ignore_fields {
        if evaluator.validate_expr(expr).is_ok() {
            if let Some(pointer) = jsonpath_to_pointer(expr) {
                if let Some(target) = obj.pointer_mut(&pointer) {
                    *target = serde_json::Value::Null;
                }
            }
        }
    }
    obj
}

/// Converts a dotted JSONPath such as `$.metadata.managedFields` into a JSON pointer.
/// Only the simple dotted subset used by `ignore_fields`/`index_by` is supported; anything
/// else is left unstripped rather than risk silently dropping real data.
fn jsonpath_to_pointer(expr: &str) -> Option<String> {
    let trimmed = expr.trim_start_matches("$.").trim_start_matches('$');
    if trimmed.is_empty() || trimmed.contains('[') {
        return None;
    }
    Some(format!("/{}", trimmed.replace('.', "/")))
}

pub fn merge_ignore_fields(global: &[String], per_resource: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = global.iter().cloned().chain(per_resource.iter().cloned()).collect();
    merged.sort();
    merged.dedup();
    merged
}

/// Runs one watcher's event loop to completion (informer stream exhausted or cancelled).
pub async fn run_watcher(
    resource_type: String,
    mut informer: impl ResourceInformer,
    index_by: Vec<String>,
    ignore_fields: Vec<String>,
    store: Arc<dyn Store>,
    evaluator: Arc<dyn JsonPathEvaluator>,
    bus: Arc<EventBus>,
) {
    let mut initial_sync_done = false;
    let mut pending_created = 0usize;

    while let Some(event) = informer.next().await {
        match event {
            InformerEvent::Applied(raw) => {
                let stripped = strip_ignored_fields(raw, &ignore_fields, evaluator.as_ref());
                let key = extract_key(&stripped, &index_by, evaluator.as_ref());
                let is_new = store.len();
                store.upsert(key, stripped);
                let became_new = store.len() > is_new;

                if !initial_sync_done {
                    if became_new {
                        pending_created += 1;
                    }
                    continue;
                }

                bus.publish(Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
                    resource_type: resource_type.clone(),
                    created: if became_new { 1 } else { 0 },
                    modified: if became_new { 0 } else { 1 },
                    deleted: 0,
                    is_initial_sync: false,
                })));
            }
            InformerEvent::Deleted(raw) => {
                let key = extract_key(&raw, &index_by, evaluator.as_ref());
                store.remove(&key);
                if initial_sync_done {
                    bus.publish(Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
                        resource_type: resource_type.clone(),
                        created: 0,
                        modified: 0,
                        deleted: 1,
                        is_initial_sync: false,
                    })));
                }
            }
            InformerEvent::Synced => {
                if initial_sync_done {
                    warn!(resource_type, "received duplicate Synced event, ignoring");
                    continue;
                }
                initial_sync_done = true;
                debug!(resource_type, count = pending_created, "initial sync complete");
                bus.publish(Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
                    resource_type: resource_type.clone(),
                    created: pending_created,
                    modified: 0,
                    deleted: 0,
                    is_initial_sync: true,
                })));
                bus.publish(Event::new(EventKind::ResourceSyncComplete(ResourceSyncComplete {
                    resource_type: resource_type.clone(),
                    count: store.len(),
                })));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::store::MemoryStore;
    use futures::stream;

    struct IdentityEvaluator;
    impl JsonPathEvaluator for IdentityEvaluator {
        fn validate_expr(&self, _expr: &str) -> Result<(), String> {
            Ok(())
        }
        fn extract(&self, obj: &serde_json::Value, expr: &str) -> Option<serde_json::Value> {
            let pointer = jsonpath_to_pointer(expr)?;
            obj.pointer(&pointer).cloned()
        }
    }

    #[tokio::test]
    async fn initial_sync_is_summarized_once() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut rx = bus.subscribe(16);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let evaluator: Arc<dyn JsonPathEvaluator> = Arc::new(IdentityEvaluator);

        let events = vec![
            InformerEvent::Applied(serde_json::json!({"metadata": {"namespace": "default", "name": "a"}})),
            InformerEvent::Applied(serde_json::json!({"metadata": {"namespace": "default", "name": "b"}})),
            InformerEvent::Synced,
            InformerEvent::Applied(serde_json::json!({"metadata": {"namespace": "default", "name": "c"}})),
        ];
        run_watcher(
            "ingresses".to_string(),
            stream::iter(events),
            vec![],
            vec![],
            store.clone(),
            evaluator,
            bus.clone(),
        )
        .await;

        let first = rx.recv().await.unwrap();
        let EventKind::ResourceIndexUpdated(update) = first.kind else {
            panic!()
        };
        assert!(update.is_initial_sync);
        assert_eq!(update.created, 2);

        let second = rx.recv().await.unwrap();
        let EventKind::ResourceSyncComplete(complete) = second.kind else {
            panic!()
        };
        assert_eq!(complete.count, 2);

        let third = rx.recv().await.unwrap();
        let EventKind::ResourceIndexUpdated(update) = third.kind else {
            panic!()
        };
        assert!(!update.is_initial_sync);
        assert_eq!(update.created, 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn merge_ignore_fields_dedupes_and_sorts() {
        let merged = merge_ignore_fields(
            &["$.metadata.managedFields".to_string(), "$.status".to_string()],
            &["$.status".to_string()],
        );
        assert_eq!(
            merged,
            vec!["$.metadata.managedFields".to_string(), "$.status".to_string()]
        );
    }
}
