//! Config Change Handler: the scatter-gather initiator. On every `ConfigParsed` it asks all
//! three validators at once via `EventBus::request`, then turns the combined answer into
//! exactly one of `ConfigValidated` / `ConfigInvalid` and pushes the validated config into a
//! single-slot reinit channel the orchestrator polls between iterations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::event::bus::{EventBus, RequestOptions};
use crate::event::{
    ConfigInvalid, ConfigValidated, ConfigValidationRequest, Event, EventKind,
};

pub const VALIDATOR_RESPONDERS: [&str; 3] = ["basic", "template", "jsonpath"];

/// The reinit channel: a `watch` so the orchestrator always reads the most recently validated
/// config, never a backlog of stale ones.
pub type ReinitSender = tokio::sync::watch::Sender<Option<ConfigValidated>>;

pub async fn run_change_handler(
    bus: Arc<EventBus>,
    mut rx: mpsc::Receiver<Event>,
    reinit_tx: ReinitSender,
    request_timeout: Duration,
    starting_version: String,
) {
    let cancel = CancellationToken::new();
    let mut latest_secret_version: Option<String> = None;
    // The version this iteration already started from. Stage 3's config watch republishes
    // that same resource as its own initial observation, which flows all the way through
    // here as a `ConfigParsed` - validating it again is fine, but re-triggering the
    // orchestrator's reinit on it would restart the iteration on its own bootstrap state.
    let mut current_version = starting_version;

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::CredentialsUpdated(updated) => {
                latest_secret_version = Some(updated.version);
            }
            EventKind::ConfigParsed(parsed) => {
                let outcome = request_validation(&bus, &cancel, &parsed.config, &parsed.version, request_timeout).await;
                match outcome {
                    Ok(()) => {
                        info!(version = %parsed.version, "config validated by all responders");
                        let is_change = parsed.version != current_version;
                        let validated = ConfigValidated {
                            config: parsed.config,
                            version: parsed.version,
                            secret_version: latest_secret_version.clone(),
                        };
                        bus.publish(Event::new(EventKind::ConfigValidated(validated.clone())));
                        if is_change {
                            current_version = validated.version.clone();
                            let _ = reinit_tx.send(Some(validated));
                        }
                    }
                    Err(errors) => {
                        warn!(version = %parsed.version, ?errors, "config failed validation");
                        bus.publish(Event::new(EventKind::ConfigInvalid(ConfigInvalid { errors })));
                    }
                }
            }
            _ => {}
        }
    }
}

async fn request_validation(
    bus: &EventBus,
    cancel: &CancellationToken,
    config: &Config,
    version: &str,
    timeout: Duration,
) -> Result<(), std::collections::BTreeMap<String, Vec<String>>> {
    let request = Event::new(EventKind::ConfigValidationRequest(ConfigValidationRequest {
        request_id: version.to_string(),
        config: config.clone(),
        version: version.to_string(),
    }));
    let options = RequestOptions::new(
        timeout,
        VALIDATOR_RESPONDERS.iter().map(|s| s.to_string()).collect(),
    );
    let outcome = bus
        .request(cancel, request, options)
        .await
        .expect("VALIDATOR_RESPONDERS is always non-empty");

    let mut errors: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
    for response in &outcome.responses {
        if let EventKind::ConfigValidationResponse(r) = &response.kind {
            if !r.valid {
                errors.insert(r.responder_name.clone(), r.errors.clone());
            }
        }
    }
    for missing in &outcome.errors {
        errors.insert("coordinator".to_string(), vec![missing.clone()]);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConfigParsed;
    use crate::validate::base::run_validator;
    use crate::validate::basic::validate_basic;

    #[tokio::test]
    async fn valid_config_emits_config_validated_and_reinit() {
        let bus = Arc::new(EventBus::new());
        bus.start();

        for name in VALIDATOR_RESPONDERS {
            let validator_rx = bus.subscribe(8);
            let check: Box<dyn Fn(&Config) -> Result<(), Vec<String>> + Send + Sync> = if name == "basic" {
                Box::new(validate_basic)
            } else {
                Box::new(|_: &Config| Ok(()))
            };
            tokio::spawn(run_validator(name.to_string(), bus.clone(), validator_rx, check));
        }

        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let (reinit_tx, mut reinit_rx) = tokio::sync::watch::channel(None);
        tokio::spawn(run_change_handler(
            bus.clone(),
            rx,
            reinit_tx,
            Duration::from_millis(200),
            "v0".to_string(),
        ));

        tx.send(Event::new(EventKind::ConfigParsed(ConfigParsed {
            config: Config::default_for_test(),
            version: "v1".to_string(),
        })))
        .await
        .unwrap();

        let event = output.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ConfigValidated(_)));
        reinit_rx.changed().await.unwrap();
        let reinit = reinit_rx.borrow().clone().unwrap();
        assert_eq!(reinit.version, "v1");
    }

    #[tokio::test]
    async fn revalidating_the_starting_version_does_not_reinit() {
        let bus = Arc::new(EventBus::new());
        bus.start();

        for name in VALIDATOR_RESPONDERS {
            let validator_rx = bus.subscribe(8);
            let check: Box<dyn Fn(&Config) -> Result<(), Vec<String>> + Send + Sync> = if name == "basic" {
                Box::new(validate_basic)
            } else {
                Box::new(|_: &Config| Ok(()))
            };
            tokio::spawn(run_validator(name.to_string(), bus.clone(), validator_rx, check));
        }

        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let (reinit_tx, mut reinit_rx) = tokio::sync::watch::channel(None);
        tokio::spawn(run_change_handler(
            bus.clone(),
            rx,
            reinit_tx,
            Duration::from_millis(200),
            "v1".to_string(),
        ));

        // The live config watch's own initial observation reaches the change handler as the
        // exact same version the iteration already started from.
        tx.send(Event::new(EventKind::ConfigParsed(ConfigParsed {
            config: Config::default_for_test(),
            version: "v1".to_string(),
        })))
        .await
        .unwrap();

        let event = output.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ConfigValidated(_)));
        drop(tx);

        assert!(tokio::time::timeout(Duration::from_millis(100), reinit_rx.changed())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn invalid_config_emits_config_invalid() {
        let bus = Arc::new(EventBus::new());
        bus.start();

        for name in VALIDATOR_RESPONDERS {
            let validator_rx = bus.subscribe(8);
            tokio::spawn(run_validator(
                name.to_string(),
                bus.clone(),
                validator_rx,
                |_: &Config| Err(vec!["nope".to_string()]),
            ));
        }

        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        let (reinit_tx, _reinit_rx) = tokio::sync::watch::channel(None);
        tokio::spawn(run_change_handler(
            bus.clone(),
            rx,
            reinit_tx,
            Duration::from_millis(200),
            "v0".to_string(),
        ));

        tx.send(Event::new(EventKind::ConfigParsed(ConfigParsed {
            config: Config::default_for_test(),
            version: "v1".to_string(),
        })))
        .await
        .unwrap();

        let event = output.recv().await.unwrap();
        let EventKind::ConfigInvalid(invalid) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(invalid.errors.len(), 3);
    }
}
