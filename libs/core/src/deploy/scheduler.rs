//! Deployment Scheduler (leader-only): decides *when* to deploy, never *how*. Publishes
//! `DeploymentScheduled` once a pending validated render and a non-empty endpoint set are both
//! available, no deployment is already in progress, and `min_deployment_interval` has elapsed
//! since the last one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind};

struct SchedulerState {
    has_pending_render: bool,
    has_endpoints: bool,
    deployment_in_progress: bool,
    last_scheduled: Option<Instant>,
}

pub struct Scheduler {
    min_deployment_interval: Duration,
    is_leader: AtomicBool,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(min_deployment_interval: Duration) -> Self {
        Self {
            min_deployment_interval,
            is_leader: AtomicBool::new(false),
            state: Mutex::new(SchedulerState {
                has_pending_render: false,
                has_endpoints: false,
                deployment_in_progress: false,
                last_scheduled: None,
            }),
        }
    }

    fn evaluate(&self, bus: &EventBus) {
        if !self.is_leader.load(Ordering::Relaxed) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if !state.has_pending_render || !state.has_endpoints || state.deployment_in_progress {
            return;
        }
        if let Some(last) = state.last_scheduled {
            if last.elapsed() < self.min_deployment_interval {
                return;
            }
        }
        debug!("scheduling deployment");
        state.deployment_in_progress = true;
        state.last_scheduled = Some(Instant::now());
        drop(state);
        bus.publish(Event::new(EventKind::DeploymentScheduled));
    }

    pub async fn run(self: std::sync::Arc<Self>, bus: std::sync::Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::BecameLeader => {
                    self.is_leader.store(true, Ordering::Relaxed);
                    self.evaluate(&bus);
                }
                EventKind::LostLeadership => {
                    self.is_leader.store(false, Ordering::Relaxed);
                    let mut state = self.state.lock().unwrap();
                    state.deployment_in_progress = false;
                    state.last_scheduled = None;
                }
                EventKind::ValidationCompleted(_) => {
                    self.state.lock().unwrap().has_pending_render = true;
                    self.evaluate(&bus);
                }
                EventKind::HAProxyPodsDiscovered(discovered) => {
                    self.state.lock().unwrap().has_endpoints = discovered.count > 0;
                    self.evaluate(&bus);
                }
                EventKind::DriftPreventionTriggered(_) => {
                    self.evaluate(&bus);
                }
                EventKind::DeploymentCompleted(_) => {
                    self.state.lock().unwrap().deployment_in_progress = false;
                    self.evaluate(&bus);
                }
                _ => {}
            }
        }
    }
}
