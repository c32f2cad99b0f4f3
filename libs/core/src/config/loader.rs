//! Config/Credentials loaders. Each subscribes to its `*ResourceChanged` event, decodes the
//! generic resource envelope into typed state, and publishes the parsed result. A parse
//! failure is logged and produces no event - the prior validated state remains authoritative.

use std::sync::Arc;

use base64::Engine;
use tracing::{error, info};

use crate::config::{Config, Credentials};
use crate::error::LoadError;
use crate::event::bus::EventBus;
use crate::event::{ConfigParsed, CredentialsUpdated, Event, EventKind, ResourceEnvelope};

const CONFIG_DATA_KEY: &str = "config.yaml";

pub(crate) fn parse_config(envelope: &ResourceEnvelope) -> Result<Config, LoadError> {
    let raw = envelope
        .data
        .get(CONFIG_DATA_KEY)
        .ok_or_else(|| LoadError::MissingKey(CONFIG_DATA_KEY.to_string()))?;
    let config: Config = serde_yaml::from_str(raw)?;
    Ok(config)
}

pub(crate) fn parse_credentials(envelope: &ResourceEnvelope) -> Result<Credentials, LoadError> {
    let mut values = std::collections::BTreeMap::new();
    for (key, encoded) in &envelope.data {
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        let value = String::from_utf8(decoded)?;
        values.insert(key.clone(), value);
    }
    Ok(Credentials { values })
}

/// Runs the config-loader event loop until its subscription closes. Intended to be spawned
/// as its own task by the orchestrator during startup.
pub async fn run_config_loader(bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let EventKind::ConfigResourceChanged(changed) = event.kind else {
            continue;
        };
        match parse_config(&changed.envelope) {
            Ok(config) => {
                info!(version = %changed.envelope.resource_version, "parsed config resource");
                bus.publish(Event::new(EventKind::ConfigParsed(ConfigParsed {
                    config,
                    version: changed.envelope.resource_version,
                })));
            }
            Err(err) => {
                error!(%err, "failed to parse config resource, keeping prior validated state");
            }
        }
    }
}

/// Runs the credentials-loader event loop, mirroring `run_config_loader`.
pub async fn run_credentials_loader(bus: Arc<EventBus>, mut rx: tokio::sync::mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let EventKind::SecretResourceChanged(changed) = event.kind else {
            continue;
        };
        match parse_credentials(&changed.envelope) {
            Ok(credentials) => {
                info!(version = %changed.envelope.resource_version, "parsed credentials resource");
                bus.publish(Event::new(EventKind::CredentialsUpdated(CredentialsUpdated {
                    credentials,
                    version: changed.envelope.resource_version,
                })));
            }
            Err(err) => {
                error!(%err, "failed to parse credentials resource, keeping prior validated state");
            }
        }
    }
}
