//! Common validator event loop. Every validator (basic, template, jsonpath) is a responder in
//! the Config Validation scatter-gather: it answers exactly one `ConfigValidationRequest` with
//! exactly one `ConfigValidationResponse`, named by `responder_name`. Shared here so a panic in
//! any validator's check function turns into an honest "invalid" response instead of taking
//! the whole process down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::config::Config;
use crate::event::bus::EventBus;
use crate::event::{ConfigValidationResponse, Event, EventKind};

/// Runs until `rx` closes. Safe to let the task simply drop - there is no shutdown signal to
/// acknowledge, so "stop" is just "no more requests arrive."
pub async fn run_validator<F>(
    responder_name: String,
    bus: Arc<EventBus>,
    mut rx: mpsc::Receiver<Event>,
    validate: F,
) where
    F: Fn(&Config) -> Result<(), Vec<String>> + Send + Sync + 'static,
{
    let validate = Arc::new(validate);
    while let Some(event) = rx.recv().await {
        let EventKind::ConfigValidationRequest(request) = event.kind else {
            continue;
        };
        let validate = validate.clone();
        let config = request.config.clone();
        let outcome = tokio::task::spawn_blocking(move || validate(&config)).await;
        let (valid, errors) = match outcome {
            Ok(Ok(())) => (true, Vec::new()),
            Ok(Err(errors)) => (false, errors),
            Err(join_err) => {
                error!(responder = %responder_name, %join_err, "validator panicked, reporting invalid");
                (
                    false,
                    vec![format!("{responder_name} validator panicked: {join_err}")],
                )
            }
        };
        bus.publish(Event::new(EventKind::ConfigValidationResponse(ConfigValidationResponse {
            request_id: request.request_id,
            responder_name: responder_name.clone(),
            valid,
            errors,
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_check_reports_invalid_instead_of_propagating() {
        let bus = Arc::new(EventBus::new());
        bus.start();
        let mut output = bus.subscribe(8);
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_validator("flaky".to_string(), bus.clone(), rx, |_| {
            panic!("boom")
        }));

        tx.send(Event::new(EventKind::ConfigValidationRequest(
            crate::event::ConfigValidationRequest {
                request_id: "r1".to_string(),
                config: Config::default_for_test(),
                version: "v1".to_string(),
            },
        )))
        .await
        .unwrap();
        drop(tx);

        let event = output.recv().await.unwrap();
        let EventKind::ConfigValidationResponse(response) = event.kind else {
            panic!("wrong kind");
        };
        assert!(!response.valid);
        assert_eq!(response.responder_name, "flaky");
        handle.await.unwrap();
    }
}
