//! HAProxy Validator adapter: the two-phase check run against every `TemplateRendered` output -
//! a syntax parse, then a semantic invocation of the HAProxy binary with the rendered config
//! written into the expected filesystem layout. Distinct from the `validate::` module, which
//! validates the user-supplied *config resource*, not a rendered artifact.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info};

use crate::event::bus::EventBus;
use crate::event::{Event, EventKind, ValidationCompleted, ValidationFailed};
use crate::external::HaproxyValidator;

pub struct ValidatorAdapter {
    validator: Arc<dyn HaproxyValidator>,
    last_success: Mutex<Option<ValidationCompleted>>,
}

impl ValidatorAdapter {
    pub fn new(validator: Arc<dyn HaproxyValidator>) -> Self {
        Self {
            validator,
            last_success: Mutex::new(None),
        }
    }

    pub fn has_state(&self) -> bool {
        self.last_success.lock().unwrap().is_some()
    }

    async fn validate_once(&self, config_bytes: &[u8], aux_files: &BTreeMap<String, Vec<u8>>, bus: &EventBus) {
        bus.publish(Event::new(EventKind::ValidationStarted));
        let started = Instant::now();

        if let Err(errors) = self.validator.validate_syntax(config_bytes).await {
            let duration = started.elapsed();
            error!(?errors, "haproxy syntax validation failed");
            bus.publish(Event::new(EventKind::ValidationFailed(ValidationFailed { errors, duration })));
            return;
        }

        match self.validator.validate_semantic(config_bytes, aux_files).await {
            Ok(report) => {
                let duration = started.elapsed();
                let event = ValidationCompleted {
                    duration,
                    warnings: report.warnings,
                };
                info!(duration_ms = %duration.as_millis(), "haproxy validation completed");
                *self.last_success.lock().unwrap() = Some(event.clone());
                bus.publish(Event::new(EventKind::ValidationCompleted(event)));
            }
            Err(errors) => {
                let duration = started.elapsed();
                error!(?errors, "haproxy semantic validation failed");
                bus.publish(Event::new(EventKind::ValidationFailed(ValidationFailed { errors, duration })));
            }
        }
    }

    pub async fn run(self: std::sync::Arc<Self>, bus: std::sync::Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::TemplateRendered(rendered) => {
                    self.validate_once(&rendered.config_bytes, &rendered.aux_files, &bus).await;
                }
                EventKind::BecameLeader => {
                    let last = self.last_success.lock().unwrap().clone();
                    if let Some(last) = last {
                        bus.publish(Event::new(EventKind::ValidationCompleted(last)));
                    }
                }
                _ => {}
            }
        }
    }
}
