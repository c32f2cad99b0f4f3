//! The pub/sub + scatter-gather fabric. Every coordination component talks to every
//! other one only through this bus; nothing here knows what a reconciliation or a deployment
//! is.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::BusError;

use super::Event;

struct Subscriber {
    sender: mpsc::Sender<Event>,
}

/// Buffering state. `started` and the pre-start queue are guarded by one mutex, separate
/// from the subscriber-list lock, so `publish()` never needs both locks at once and a slow
/// `start()` can never block a concurrent `subscribe()`.
struct BufferState {
    started: bool,
    pre_start_buffer: Vec<Event>,
}

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    buffer: Mutex<BufferState>,
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub expected_responders: Vec<String>,
    pub min_responses: usize,
}

impl RequestOptions {
    pub fn new(timeout: Duration, expected_responders: Vec<String>) -> Self {
        let min_responses = expected_responders.len();
        Self {
            timeout,
            expected_responders,
            min_responses,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    pub responses: Vec<Event>,
    pub errors: Vec<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            buffer: Mutex::new(BufferState {
                started: false,
                pre_start_buffer: Vec::new(),
            }),
        }
    }

    /// Registers a fresh bounded channel. Legal before or after `start()`; a subscriber
    /// that registers after `start()` simply misses the pre-start replay.
    pub fn subscribe(&self, buffer_size: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        self.subscribers.write().unwrap().push(Subscriber { sender: tx });
        rx
    }

    /// Non-blocking fan-out. Returns the number of subscribers that actually received the
    /// event; a full subscriber channel silently drops it without affecting anyone else.
    pub fn publish(&self, event: Event) -> usize {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.started {
            buffer.pre_start_buffer.push(event);
            return 0;
        }
        drop(buffer);
        self.send_to_all(&event)
    }

    fn send_to_all(&self, event: &Event) -> usize {
        let subscribers = self.subscribers.read().unwrap();
        let mut sent = 0;
        for subscriber in subscribers.iter() {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(event = event.type_tag(), "subscriber channel full, dropping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(event = event.type_tag(), "subscriber channel closed, dropping");
                }
            }
        }
        sent
    }

    /// Idempotent. Flips to live mode and drains the pre-start buffer, in publication
    /// order, to every subscriber registered so far.
    pub fn start(&self) {
        let drained = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.started {
                return;
            }
            buffer.started = true;
            std::mem::take(&mut buffer.pre_start_buffer)
        };
        debug!(count = drained.len(), "draining pre-start event buffer");
        for event in drained {
            self.send_to_all(&event);
        }
    }

    pub fn is_started(&self) -> bool {
        self.buffer.lock().unwrap().started
    }

    /// Scatter-gather. Broadcasts `request`, then waits for responses matching its
    /// `request_id` from up to `expected_responders`, completing on `min_responses` distinct
    /// responders, `options.timeout`, or `cancel` - whichever comes first.
    pub async fn request(
        &self,
        cancel: &CancellationToken,
        request: Event,
        options: RequestOptions,
    ) -> Result<RequestOutcome, BusError> {
        if options.expected_responders.is_empty() {
            return Err(BusError::NoExpectedResponders);
        }
        if options.min_responses > options.expected_responders.len() {
            return Err(BusError::MinResponsesTooHigh {
                min_responses: options.min_responses,
                expected: options.expected_responders.len(),
            });
        }
        let request_id = request
            .request_id()
            .expect("Request() must be called with a request-shaped event")
            .to_string();

        // Generous buffer: every expected responder could reply at once plus some slack.
        let mut collector = self.subscribe((options.expected_responders.len() + 1) * 4);
        self.publish(request);

        let mut collected: HashMap<String, Event> = HashMap::new();
        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);

        while collected.len() < options.min_responses {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut deadline => break,
                maybe_event = collector.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Some((rid, responder)) = event.as_response() {
                                if rid == request_id && !collected.contains_key(responder) {
                                    collected.insert(responder.to_string(), event);
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let errors = options
            .expected_responders
            .iter()
            .filter(|responder| !collected.contains_key(responder.as_str()))
            .map(|responder| format!("no response from {responder}"))
            .collect();

        Ok(RequestOutcome {
            responses: collected.into_values().collect(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ConfigValidationRequest, ConfigValidationResponse, EventKind};

    fn validation_request(id: &str) -> Event {
        Event::new(EventKind::ConfigValidationRequest(ConfigValidationRequest {
            request_id: id.to_string(),
            config: crate::config::Config::default_for_test(),
            version: "v1".to_string(),
        }))
    }

    fn validation_response(id: &str, responder: &str, valid: bool) -> Event {
        Event::new(EventKind::ConfigValidationResponse(ConfigValidationResponse {
            request_id: id.to_string(),
            responder_name: responder.to_string(),
            valid,
            errors: Vec::new(),
        }))
    }

    #[test]
    fn pre_start_replay_preserves_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(8);
        for i in 0..3 {
            bus.publish(validation_request(&i.to_string()));
        }
        bus.start();
        for i in 0..3 {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.request_id().unwrap(), i.to_string());
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_before_start_returns_zero_sent() {
        let bus = EventBus::new();
        let _rx = bus.subscribe(8);
        assert_eq!(bus.publish(validation_request("a")), 0);
    }

    #[test]
    fn full_subscriber_drops_without_blocking_others() {
        let bus = EventBus::new();
        let slow_rx = bus.subscribe(1);
        let mut fast_rx = bus.subscribe(8);
        bus.start();
        drop(slow_rx); // closed channel: still must not affect the other subscriber

        for i in 0..4 {
            bus.publish(validation_request(&i.to_string()));
        }
        let mut seen = 0;
        while fast_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn request_completes_once_all_expected_respond() {
        let bus = EventBus::new();
        bus.start();
        let cancel = CancellationToken::new();

        let bus_ref = &bus;
        let responders = tokio::spawn(async move {});
        drop(responders);

        // Spawn simulated responders that answer once they see the request.
        let mut basic_rx = bus_ref.subscribe(8);
        let mut template_rx = bus_ref.subscribe(8);
        let basic_task = tokio::spawn(async move {
            let event = basic_rx.recv().await.unwrap();
            let id = event.request_id().unwrap().to_string();
            id
        });
        let template_task = tokio::spawn(async move {
            let event = template_rx.recv().await.unwrap();
            event.request_id().unwrap().to_string()
        });

        let options = RequestOptions::new(
            Duration::from_millis(200),
            vec!["basic".to_string(), "template".to_string()],
        );
        let request_fut = bus.request(&cancel, validation_request("r1"), options);

        let (basic_id, template_id) = tokio::join!(basic_task, template_task);
        let basic_id = basic_id.unwrap();
        let template_id = template_id.unwrap();
        bus.publish(validation_response(&basic_id, "basic", true));
        bus.publish(validation_response(&template_id, "template", true));

        let outcome = request_fut.await.unwrap();
        assert_eq!(outcome.responses.len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn request_times_out_with_missing_responder_errors() {
        let bus = EventBus::new();
        bus.start();
        let cancel = CancellationToken::new();

        let mut basic_rx = bus.subscribe(8);
        let basic_task = tokio::spawn(async move { basic_rx.recv().await.unwrap() });

        let options = RequestOptions {
            timeout: Duration::from_millis(50),
            expected_responders: vec!["basic".to_string(), "jsonpath".to_string()],
            min_responses: 2,
        };
        let outcome = bus
            .request(&cancel, validation_request("r2"), options)
            .await
            .unwrap();

        let event = basic_task.await.unwrap();
        bus.publish(validation_response(event.request_id().unwrap(), "basic", true));

        assert_eq!(outcome.responses.len(), 0);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors.contains(&"no response from basic".to_string()));
        assert!(outcome.errors.contains(&"no response from jsonpath".to_string()));
    }

    #[test]
    fn request_rejects_empty_expected_responders() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let result = futures::executor::block_on(bus.request(
            &cancel,
            validation_request("r3"),
            RequestOptions {
                timeout: Duration::from_millis(10),
                expected_responders: vec![],
                min_responses: 0,
            },
        ));
        assert!(matches!(result, Err(BusError::NoExpectedResponders)));
    }
}
