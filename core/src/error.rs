//! Unified error types for the bus/tailer/bridge/dispatch subsystems.
//!
//! One `thiserror::Error` enum per layer, following the teacher's
//! `data/error.rs` shape: a variant per failure mode, plus helper
//! constructors for the ones built from scratch rather than `#[from]`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus is stopped")]
    Stopped,
    #[error("subscription '{0}' not found")]
    UnknownSubscription(String),
    #[error("event subscription {0} not found")]
    UnknownEventSubscription(u64),
}

#[derive(Error, Debug)]
pub enum TailerError {
    #[error("log file not found: {0}")]
    NotFound(std::path::PathBuf),
    #[error("io error reading log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to install file watcher: {0}")]
    Watch(#[from] notify::Error),
    #[error("pattern configuration error: {0}")]
    Pattern(String),
}

#[derive(Error, Debug)]
pub enum QrError {
    #[error("io error reading screenshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("no QR code found in image")]
    NotFound,
    #[error("decoded QR payload had fewer than 4 tokens: {0:?}")]
    Malformed(Vec<String>),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("cannot connect: username not set or invalid")]
    NoUsername,
    #[error("reconnect already in progress")]
    ReconnectInProgress,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("submit() timed out after {0:?}")]
    SubmitTimeout(std::time::Duration),
    #[error("bridge loop is not running")]
    LoopNotRunning,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    QueueClosed,
    #[error("data provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error loading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid regex for pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}
