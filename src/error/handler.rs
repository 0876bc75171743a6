use thiserror::Error;

use crate::handlers::InputKind;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{handler}: unsupported input '{input}' of kind {kind}.")]
    UnsupportedInput {
        handler: &'static str,
        input: String,
        kind: InputKind,
    },
    #[error("Handler '{name}' is already running.")]
    AlreadyRunning { name: String },
    #[error("Unknown handler '{name}'. Use net, dns_xact, netprobe or resources.")]
    UnknownHandler { name: String },
    #[error("Handler '{name}' has an invalid configuration: {source}")]
    Config {
        name: String,
        #[source]
        source: crate::error::ConfigError,
    },
    #[error("Handler '{name}' failed to process an event: {source}")]
    Process {
        name: String,
        #[source]
        source: crate::error::MetricsError,
    },
    #[error("Handler '{name}' failed to serialize its summary: {source}")]
    Summary {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
