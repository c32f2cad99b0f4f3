//! Executor: turns the trio (ReconciliationTriggered, render outcome, validation outcome) into
//! the `ReconciliationStarted/Completed/Failed` trilogy, purely by watching the bus - it never
//! calls the renderer or validator directly, so it stays honest to the "coordinate through
//! events only" rule the rest of the pipeline follows.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, ReconciliationCompleted, ReconciliationFailed};

/// Runs until `rx` closes. At most one cycle is ever "open" at a time; a `TemplateRenderFailed`
/// or `ValidationFailed` closes the cycle as a failure and a later `ValidationCompleted`
/// without an in-progress cycle is ignored (it can only be a leadership replay).
pub async fn run_executor(bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
    let mut cycle_started: Option<Instant> = None;

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::ReconciliationTriggered(_) => {
                cycle_started = Some(Instant::now());
                bus.publish(Event::new(EventKind::ReconciliationStarted));
            }
            EventKind::TemplateRenderFailed(failed) => {
                if cycle_started.take().is_some() {
                    bus.publish(Event::new(EventKind::ReconciliationFailed(ReconciliationFailed {
                        phase: "render".to_string(),
                        error: failed.error,
                    })));
                }
            }
            EventKind::ValidationFailed(failed) => {
                if cycle_started.take().is_some() {
                    bus.publish(Event::new(EventKind::ReconciliationFailed(ReconciliationFailed {
                        phase: "validate".to_string(),
                        error: failed.errors.join("; "),
                    })));
                }
            }
            EventKind::ValidationCompleted(_) => {
                if let Some(started) = cycle_started.take() {
                    bus.publish(Event::new(EventKind::ReconciliationCompleted(ReconciliationCompleted {
                        duration: started.elapsed(),
                    })));
                } else {
                    warn!("ValidationCompleted with no open reconciliation cycle, treating as a leadership replay");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ReconciliationTriggered, TemplateRenderFailed, ValidationCompleted, ValidationFailed};

    #[tokio::test]
    async fn happy_path_emits_started_then_completed() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(run_executor(bus.clone(), rx));

        tx.send(Event::new(EventKind::ReconciliationTriggered(ReconciliationTriggered {
            reason: "debounce_timer".to_string(),
        })))
        .await
        .unwrap();
        let started = output.recv().await.unwrap();
        assert!(matches!(started.kind, EventKind::ReconciliationStarted));

        tx.send(Event::new(EventKind::ValidationCompleted(ValidationCompleted {
            duration: std::time::Duration::from_millis(5),
            warnings: vec![],
        })))
        .await
        .unwrap();
        let completed = output.recv().await.unwrap();
        assert!(matches!(completed.kind, EventKind::ReconciliationCompleted(_)));
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn render_failure_emits_failed_with_render_phase() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(run_executor(bus.clone(), rx));

        tx.send(Event::new(EventKind::ReconciliationTriggered(ReconciliationTriggered {
            reason: "config_change".to_string(),
        })))
        .await
        .unwrap();
        let _started = output.recv().await.unwrap();

        tx.send(Event::new(EventKind::TemplateRenderFailed(TemplateRenderFailed {
            template_name: "haproxy_config".to_string(),
            error: "unexpected eof".to_string(),
        })))
        .await
        .unwrap();
        let failed = output.recv().await.unwrap();
        let EventKind::ReconciliationFailed(failure) = failed.kind else {
            panic!("wrong kind");
        };
        assert_eq!(failure.phase, "render");
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn validation_completed_replay_without_open_cycle_is_ignored() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(run_executor(bus.clone(), rx));

        tx.send(Event::new(EventKind::ValidationCompleted(ValidationCompleted {
            duration: std::time::Duration::from_millis(1),
            warnings: vec![],
        })))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();
        assert!(output.try_recv().is_err());
        let _ = ValidationFailed {
            errors: vec![],
            duration: std::time::Duration::ZERO,
        };
    }
}
