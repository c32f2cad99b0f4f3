//! Reconciler: debounces the resource-change stream into `ReconciliationTriggered` events.
//! Precedence, top-down: initial-sync updates are ignored, haproxy-pods index updates are
//! ignored (their targets are routed separately through Discovery), a `ConfigValidated`
//! cancels any pending timer and fires immediately, a non-initial `ResourceIndexUpdated`
//! resets the debounce timer, and every other event kind - including the pipeline's own
//! downstream output - is ignored outright.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, ReconciliationTriggered};
use crate::watch::watcher::HAPROXY_PODS_RESOURCE_TYPE;

pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

enum TimerCommand {
    Reset,
    Cancel,
}

/// Runs until `rx` closes. The debounce timer is its own task, driven by `TimerCommand`s sent
/// from the main select loop below, so a fresh "any other change" event can restart the clock
/// without the outer loop itself doing any sleeping.
pub async fn run_reconciler(bus: Arc<EventBus>, mut rx: mpsc::Receiver<Event>, debounce_interval: Duration) {
    let (timer_tx, mut timer_rx) = mpsc::channel::<TimerCommand>(8);
    let (fire_tx, mut fire_rx) = mpsc::channel::<()>(1);

    let timer_task = tokio::spawn(async move {
        let sleep = tokio::time::sleep(Duration::MAX);
        tokio::pin!(sleep);
        let mut armed = false;
        loop {
            tokio::select! {
                command = timer_rx.recv() => {
                    match command {
                        Some(TimerCommand::Reset) => {
                            sleep.as_mut().reset(tokio::time::Instant::now() + debounce_interval);
                            armed = true;
                        }
                        Some(TimerCommand::Cancel) => {
                            sleep.as_mut().reset(tokio::time::Instant::now() + Duration::from_secs(3600 * 24));
                            armed = false;
                        }
                        None => break,
                    }
                }
                _ = &mut sleep, if armed => {
                    armed = false;
                    if fire_tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                handle_event(&bus, &timer_tx, event).await;
            }
            fired = fire_rx.recv() => {
                if fired.is_none() {
                    break;
                }
                bus.publish(Event::new(EventKind::ReconciliationTriggered(ReconciliationTriggered {
                    reason: "debounce_timer".to_string(),
                })));
            }
        }
    }

    debug!("reconciler shutting down, dropping any pending debounce trigger");
    timer_task.abort();
}

async fn handle_event(bus: &EventBus, timer_tx: &mpsc::Sender<TimerCommand>, event: Event) {
    match &event.kind {
        EventKind::ResourceIndexUpdated(update) => {
            if update.is_initial_sync {
                return;
            }
            if update.resource_type == HAPROXY_PODS_RESOURCE_TYPE {
                return;
            }
            let _ = timer_tx.send(TimerCommand::Reset).await;
        }
        EventKind::ConfigValidated(_) => {
            let _ = timer_tx.send(TimerCommand::Cancel).await;
            bus.publish(Event::new(EventKind::ReconciliationTriggered(ReconciliationTriggered {
                reason: "config_change".to_string(),
            })));
        }
        // Everything else, including the reconciliation pipeline's own output
        // (TemplateRendered, ValidationStarted/Completed, ReconciliationStarted/Completed,
        // DeploymentScheduled, HAProxyPodsDiscovered, ...) and unrelated bus traffic
        // (CredentialsUpdated, IndexSynchronized, leader-election, drift triggers), is not a
        // resource change and must not re-arm the debounce timer.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::{ConfigValidated, ResourceIndexUpdated};

    fn index_update(resource_type: &str, is_initial_sync: bool) -> Event {
        Event::new(EventKind::ResourceIndexUpdated(ResourceIndexUpdated {
            resource_type: resource_type.to_string(),
            created: 1,
            modified: 0,
            deleted: 0,
            is_initial_sync,
        }))
    }

    #[tokio::test]
    async fn initial_sync_and_haproxy_pods_updates_are_ignored() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_reconciler(bus.clone(), rx, Duration::from_millis(30)));

        tx.send(index_update("ingresses", true)).await.unwrap();
        tx.send(index_update(HAPROXY_PODS_RESOURCE_TYPE, false)).await.unwrap();
        drop(tx);

        assert!(tokio::time::timeout(Duration::from_millis(80), output.recv())
            .await
            .is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn config_validated_fires_immediately_and_cancels_timer() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_reconciler(bus.clone(), rx, Duration::from_millis(500)));

        tx.send(index_update("ingresses", false)).await.unwrap();
        tx.send(Event::new(EventKind::ConfigValidated(ConfigValidated {
            config: Config::default_for_test(),
            version: "v1".to_string(),
            secret_version: None,
        })))
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_millis(100), output.recv())
            .await
            .unwrap()
            .unwrap();
        let EventKind::ReconciliationTriggered(triggered) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(triggered.reason, "config_change");

        // the earlier debounce timer was cancelled, so nothing else fires for a while
        assert!(tokio::time::timeout(Duration::from_millis(200), output.recv())
            .await
            .is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn unrelated_event_kinds_do_not_arm_the_debounce_timer() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_reconciler(bus.clone(), rx, Duration::from_millis(30)));

        tx.send(Event::new(EventKind::CredentialsUpdated(crate::event::CredentialsUpdated {
            credentials: crate::config::Credentials {
                values: std::collections::BTreeMap::new(),
            },
            version: "v1".to_string(),
        })))
        .await
        .unwrap();
        tx.send(Event::new(EventKind::TemplateRendered(crate::event::TemplateRendered {
            config_bytes: b"global\n".to_vec(),
            aux_file_count: 0,
            aux_files: std::collections::BTreeMap::new(),
            duration: Duration::from_millis(1),
        })))
        .await
        .unwrap();
        drop(tx);

        assert!(tokio::time::timeout(Duration::from_millis(80), output.recv())
            .await
            .is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn burst_of_changes_yields_single_debounce_trigger() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_reconciler(bus.clone(), rx, Duration::from_millis(150)));

        for _ in 0..6 {
            tx.send(index_update("ingresses", false)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let event = tokio::time::timeout(Duration::from_millis(400), output.recv())
            .await
            .unwrap()
            .unwrap();
        let EventKind::ReconciliationTriggered(triggered) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(triggered.reason, "debounce_timer");

        assert!(tokio::time::timeout(Duration::from_millis(200), output.recv())
            .await
            .is_err());
        handle.abort();
    }
}
