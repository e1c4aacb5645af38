use cloop::error::{ConfigError, ExchangeError, NeuralError, PersistError};
use cloop::trial_id::TrialId;
use thiserror::Error;

/// Anything that ends a single trial.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Neural(#[from] NeuralError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("{0} peer stopped unexpectedly")]
    PeerGone(&'static str),

    #[error("trial cancelled by operator")]
    Cancelled,
}

impl TrialError {
    /// Errors that only echo a failure on the other side of the link.
    pub fn is_secondary(&self) -> bool {
        match self {
            Self::Exchange(e) | Self::Neural(NeuralError::Exchange(e)) => e.is_secondary(),
            Self::PeerGone(_) => true,
            _ => false,
        }
    }
}

/// Merge the outcomes of the two peers, keeping the root cause.
pub fn primary<T, U>(a: Result<T, TrialError>, b: Result<U, TrialError>) -> Result<(T, U), TrialError> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(a), Err(b)) => Err(if a.is_secondary() && !b.is_secondary() { b } else { a }),
    }
}

#[derive(Debug, Error)]
#[error("trial {id} failed: {source}")]
pub struct TrialFailure {
    pub id: TrialId,
    #[source]
    pub source: TrialError,
}

impl TrialFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, TrialError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid setup: {0}")]
    Setup(String),

    #[error("chain halted after {} completed trial(s): {failure}", .completed.len())]
    Failed {
        completed: Vec<TrialId>,
        failure: TrialFailure,
    },

    #[error("chain interrupted after {} completed trial(s)", .completed.len())]
    Interrupted { completed: Vec<TrialId> },
}

impl ChainError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Setup(_) | Self::Failed { .. } => 1,
            Self::Interrupted { .. } => 130,
        }
    }

    pub fn completed(&self) -> &[TrialId] {
        match self {
            Self::Setup(_) => &[],
            Self::Failed { completed, .. } | Self::Interrupted { completed } => completed,
        }
    }
}

impl From<ConfigError> for ChainError {
    fn from(e: ConfigError) -> Self {
        Self::Setup(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_wins_over_disconnect() {
        let root = TrialError::Exchange(ExchangeError::Malformed {
            step: 3,
            channel: 1,
            value: f64::NAN,
        });
        let echo = TrialError::Exchange(ExchangeError::Disconnected("motor"));
        let merged = primary::<(), ()>(Err(echo), Err(root)).unwrap_err();
        assert!(matches!(merged, TrialError::Exchange(ExchangeError::Malformed { .. })));
    }

    #[test]
    fn exit_codes_distinguish_interrupt() {
        let failed = ChainError::Failed {
            completed: vec![],
            failure: TrialFailure {
                id: TrialId::with_parts("20240101000000", "abcd", "t"),
                source: TrialError::PeerGone("plant"),
            },
        };
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(ChainError::Interrupted { completed: vec![] }.exit_code(), 130);
        assert_eq!(ChainError::Setup("x".into()).exit_code(), 1);
    }
}
