//! Sequential trials linked through their ids.

use tracing::{error, info};

use cloop::trial_id::TrialId;

use crate::error::ChainError;
use crate::runner::TrialRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Completed trial ids, oldest first.
    pub trials: Vec<TrialId>,
}

pub struct TrialChain {
    runner: TrialRunner,
    label: String,
}

impl TrialChain {
    pub fn new(runner: TrialRunner, label: impl Into<String>) -> Self {
        Self {
            runner,
            label: label.into(),
        }
    }

    pub fn runner(&self) -> &TrialRunner {
        &self.runner
    }

    /// Run up to `num_trials` trials, each one the parent of the next. The
    /// first failure or an interruption stops the chain; trials completed
    /// so far keep their artifacts.
    pub async fn run(&mut self, num_trials: usize, seed_parent: Option<TrialId>) -> Result<ChainReport, ChainError> {
        if num_trials == 0 {
            return Err(ChainError::Setup("number of trials must be a positive integer".to_string()));
        }
        info!(num_trials, "starting trial series");

        let mut parent = seed_parent;
        let mut completed = Vec::with_capacity(num_trials);
        for n in 1..=num_trials {
            if self.runner.is_cancelled() {
                return Err(ChainError::Interrupted { completed });
            }
            info!(trial = n, of = num_trials, "--- trial {n}/{num_trials} ---");
            match self.runner.run(parent.as_ref(), &self.label).await {
                Ok(id) => {
                    info!(trial = n, id = %id, "trial finished");
                    completed.push(id.clone());
                    parent = Some(id);
                }
                Err(failure) if failure.is_cancelled() => {
                    info!(trial = n, "interrupted, stopping trial series");
                    return Err(ChainError::Interrupted { completed });
                }
                Err(failure) => {
                    error!(trial = n, "{failure}; stopping trial series");
                    return Err(ChainError::Failed { completed, failure });
                }
            }
        }
        info!(completed = completed.len(), "trial series finished");
        Ok(ChainReport { trials: completed })
    }
}
