use thiserror::Error;

/// Errors surfaced by the event bus itself (precondition violations on `Request`).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Request() requires at least one expected responder")]
    NoExpectedResponders,
    #[error("min_responses ({min_responses}) exceeds expected_responders ({expected})")]
    MinResponsesTooHigh { min_responses: usize, expected: usize },
}

/// Errors raised while loading a config/credentials resource snapshot into typed state.
///
/// Per the config/credentials loader contract, a parse failure never turns into an event: callers log it under this
/// error type and fall back to the last validated state.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("resource envelope missing expected data key {0:?}")]
    MissingKey(String),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("yaml parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("utf8 decode failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Error taxonomy. `TransientInit` bubbles out of `Orchestrator::run_iteration` as an
/// `anyhow`-style error; every other variant is carried only inside an event payload.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient initialization failure: {0}")]
    TransientInit(String),
    #[error("invalid config: {0:?}")]
    InvalidConfig(std::collections::BTreeMap<String, Vec<String>>),
    #[error("render error: {0}")]
    Render(String),
    #[error("validation error: {0:?}")]
    Validation(Vec<String>),
    #[error("instance deployment error to {endpoint}: {message}")]
    InstanceDeployment {
        endpoint: String,
        message: String,
        retryable: bool,
    },
}
