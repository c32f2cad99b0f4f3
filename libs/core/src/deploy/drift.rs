//! Drift Prevention Monitor (leader-only): arms a timer for `drift_prevention_interval` and
//! resets it on every `DeploymentCompleted`. On expiry it publishes `DriftPreventionTriggered`
//! and rearms, forcing a periodic redeploy even when nothing in the cluster has changed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::bus::EventBus;
use crate::event::{DriftPreventionTriggered, Event, EventKind};

enum TimerCommand {
    Reset,
    Stop,
}

pub async fn run_drift_monitor(bus: Arc<EventBus>, mut rx: mpsc::Receiver<Event>, drift_prevention_interval: Duration) {
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
                            sleep.as_mut().reset(tokio::time::Instant::now() + drift_prevention_interval);
                            armed = true;
                        }
                        Some(TimerCommand::Stop) => {
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
                match event.kind {
                    EventKind::BecameLeader => {
                        let _ = timer_tx.send(TimerCommand::Reset).await;
                    }
                    EventKind::LostLeadership => {
                        let _ = timer_tx.send(TimerCommand::Stop).await;
                    }
                    EventKind::DeploymentCompleted(_) => {
                        let _ = timer_tx.send(TimerCommand::Reset).await;
                    }
                    _ => {}
                }
            }
            fired = fire_rx.recv() => {
                if fired.is_none() {
                    break;
                }
                bus.publish(Event::new(EventKind::DriftPreventionTriggered(DriftPreventionTriggered {
                    time_since_last: drift_prevention_interval,
                })));
                let _ = timer_tx.send(TimerCommand::Reset).await;
            }
        }
    }

    debug!("drift monitor shutting down");
    timer_task.abort();
}
