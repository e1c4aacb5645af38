//! Error types for the core crate.
//!
//! One enum per layer: configuration (setup time), exchange (per step),
//! neural collaborator, and persistence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal to a trial before any step executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required parameter `{0}`")]
    Missing(&'static str),

    #[error("{side} side instantiates {actual} ports, channel map requires {expected}")]
    ChannelCount {
        side: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Raised while crossing the rate-exchange boundary. Always fatal to the
/// current trial.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("rate frame for step {step} carries {actual} channels, expected {expected}")]
    ChannelCount {
        step: u64,
        expected: usize,
        actual: usize,
    },

    #[error("malformed rate {value} on channel {channel} at step {step}")]
    Malformed { step: u64, channel: usize, value: f64 },

    #[error("expected message for step {expected}, received step {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("no message for step {step} within {waited_ms} ms")]
    Timeout { step: u64, waited_ms: u64 },

    #[error("{0} link closed by peer")]
    Disconnected(&'static str),

    #[error("data pack `{0}` is not registered")]
    UnknownDataPack(String),

    #[error("data pack `{0}` holds no valid record")]
    InvalidDataPack(&'static str),
}

impl ExchangeError {
    /// Errors that are only a consequence of the other peer going away.
    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Disconnected(_))
    }
}

#[derive(Debug, Error)]
pub enum NeuralError {
    #[error("neural simulator used before initialize()")]
    NotInitialized,

    #[error("neural simulator already initialized")]
    AlreadyInitialized,

    #[error("weight vector has {actual} entries, model expects {expected}")]
    WeightShape { expected: usize, actual: usize },

    #[error("channel map covers {mapped} joints, model controls {expected}")]
    JointCount { expected: usize, mapped: usize },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("json error on {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt payload {path:?}: {reason}")]
    Payload { path: PathBuf, reason: String },

    #[error("trial `{0}` has no published metadata")]
    MissingTrial(String),
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
