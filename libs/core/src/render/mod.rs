//! Renderer Adapter: turns the latest `ReconciliationTriggered` into one call to the external
//! rendering engine. Keeps the last successful artifact cached (behind one mutex, alongside an
//! implicit `has_state` via `Option`) so a newly-elected leader can replay it without forcing a
//! redundant render.

pub mod haproxy_validator;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info};

use crate::config::Config;
use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, TemplateRenderFailed, TemplateRendered};
use crate::external::TemplateEngine;
use crate::watch::store::Store;

pub struct Renderer {
    engine: Arc<dyn TemplateEngine>,
    stores: BTreeMap<String, Arc<dyn Store>>,
    last_success: Mutex<Option<TemplateRendered>>,
    latest_config: Mutex<Option<Config>>,
}

impl Renderer {
    pub fn new(engine: Arc<dyn TemplateEngine>, stores: BTreeMap<String, Arc<dyn Store>>) -> Self {
        Self {
            engine,
            stores,
            last_success: Mutex::new(None),
            latest_config: Mutex::new(None),
        }
    }

    pub fn has_state(&self) -> bool {
        self.last_success.lock().unwrap().is_some()
    }

    async fn render_once(&self, config: &Config, bus: &EventBus) {
        let mut snapshots = BTreeMap::new();
        for (name, store) in &self.stores {
            snapshots.insert(name.clone(), store.list().await);
        }

        let started = Instant::now();
        match self.engine.render(config, &snapshots) {
            Ok(rendered) => {
                let duration = started.elapsed();
                let event = TemplateRendered {
                    config_bytes: rendered.config_bytes,
                    aux_file_count: rendered.aux_files.len(),
                    aux_files: rendered.aux_files,
                    duration,
                };
                info!(duration_ms = %duration.as_millis(), aux_files = event.aux_file_count, "template rendered");
                *self.last_success.lock().unwrap() = Some(event.clone());
                bus.publish(Event::new(EventKind::TemplateRendered(event)));
            }
            Err(err) => {
                error!(template = %err.template_name, %err, "template render failed");
                bus.publish(Event::new(EventKind::TemplateRenderFailed(TemplateRenderFailed {
                    template_name: err.template_name,
                    error: err.message,
                })));
            }
        }
    }

    /// Runs until `rx` closes.
    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::ConfigValidated(validated) => {
                    *self.latest_config.lock().unwrap() = Some(validated.config);
                }
                EventKind::ReconciliationTriggered(_) => {
                    let config = self.latest_config.lock().unwrap().clone();
                    if let Some(config) = config {
                        self.render_once(&config, &bus).await;
                    }
                }
                EventKind::BecameLeader => {
                    let last = self.last_success.lock().unwrap().clone();
                    if let Some(last) = last {
                        bus.publish(Event::new(EventKind::TemplateRendered(last)));
                    }
                }
                _ => {}
            }
        }
    }
}
