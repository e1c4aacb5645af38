//! One trial from id generation to published metadata.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloop::config::LoopConfig;
use cloop::neural::{NeuralModel, RateController, SimulatorHandle};
use cloop::plant::Plant;
use cloop::results::{write_json_atomic, NeuralResult, ResultMeta, RunPaths};
use cloop::trial_id::TrialId;

use crate::cosim::CoSimulation;
use crate::error::{TrialError, TrialFailure};
use crate::logs::{self, PeerLog};

/// Minimum number of steps per `run_loop` call.
pub const MIN_CHUNK: usize = 15;

/// `max(15, total / 100)` steps per chunk, the last one taking the remainder.
pub fn chunk_sizes(total_steps: usize) -> Vec<usize> {
    let chunk = (total_steps / 100).max(MIN_CHUNK);
    (0..total_steps)
        .step_by(chunk)
        .map(|start| chunk.min(total_steps - start))
        .collect()
}

/// What a factory gets to see when building a trial's collaborators.
pub struct TrialContext<'a> {
    /// 1-based count of trials this runner has started.
    pub number: usize,
    pub id: &'a TrialId,
    pub parent: Option<&'a TrialId>,
    pub config: &'a LoopConfig,
}

/// Builds fresh collaborators for every trial.
pub trait TrialFactory: Send + Sync {
    fn neural_model(&self, ctx: &TrialContext<'_>) -> Box<dyn NeuralModel>;

    fn plant(&self, ctx: &TrialContext<'_>) -> Box<dyn Plant>;
}

/// Reference controller and pendulum plant, both from the run config.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

impl TrialFactory for DefaultFactory {
    fn neural_model(&self, ctx: &TrialContext<'_>) -> Box<dyn NeuralModel> {
        Box::new(RateController::new(ctx.config.controller_params()))
    }

    fn plant(&self, ctx: &TrialContext<'_>) -> Box<dyn Plant> {
        Box::new(ctx.config.build_plant())
    }
}

pub struct TrialRunner {
    runs_root: PathBuf,
    config: LoopConfig,
    factory: Box<dyn TrialFactory>,
    cancel: CancellationToken,
    started: usize,
}

impl TrialRunner {
    pub fn new(runs_root: impl Into<PathBuf>, config: LoopConfig) -> Self {
        Self {
            runs_root: runs_root.into(),
            config,
            factory: Box::new(DefaultFactory),
            cancel: CancellationToken::new(),
            started: 0,
        }
    }

    pub fn with_factory(mut self, factory: impl TrialFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one trial. On failure its logs are replayed, its partial
    /// artifacts are discarded and the failure is returned with the id.
    pub async fn run(&mut self, parent: Option<&TrialId>, label: &str) -> Result<TrialId, TrialFailure> {
        self.started += 1;
        let id = TrialId::generate(label);
        let paths = RunPaths::from_run_id(&self.runs_root, &id);
        let started = Instant::now();
        info!(trial = %id, parent = parent.map(|p| p.as_str()).unwrap_or(""), "trial starting");

        match self.execute(&id, parent, &paths).await {
            Ok(()) => {
                info!(trial = %id, elapsed_s = started.elapsed().as_secs_f64(), "trial completed");
                Ok(id)
            }
            Err(source) => {
                if !matches!(source, TrialError::Cancelled) {
                    PeerLog::open(&paths.logs, "runner").error(&source);
                    logs::dump_logs(&paths.logs);
                }
                if let Err(e) = paths.discard_partial() {
                    warn!(trial = %id, "could not discard partial artifacts: {e}");
                }
                Err(TrialFailure { id, source })
            }
        }
    }

    async fn execute(&self, id: &TrialId, parent: Option<&TrialId>, paths: &RunPaths) -> Result<(), TrialError> {
        if self.cancel.is_cancelled() {
            return Err(TrialError::Cancelled);
        }
        let config = &self.config;
        config.validate()?;
        paths.create_dirs()?;
        write_json_atomic(&paths.params_json, config)?;
        let mut log = PeerLog::open(&paths.logs, "runner");
        log.info(format_args!("trial {id}, parent {:?}", parent.map(|p| p.as_str())));

        let map = config.channel_map()?;
        let ctx = TrialContext {
            number: self.started,
            id,
            parent,
            config,
        };
        let mut model = self.factory.neural_model(&ctx);
        let plant = self.factory.plant(&ctx);
        map.check_ports("neural", model.port_count())?;
        map.check_ports("plant", 2 * map.population_size() * plant.joint_count())?;

        if let Some(parent) = parent {
            let weights = NeuralResult::load_weights(&self.runs_root, parent)?;
            debug!(parent = %parent, ?weights, "carrying weights from parent");
            model.load_weights(&weights)?;
        }
        let mut handle = SimulatorHandle::new(model);
        handle.initialize(config.neural_context()?)?;

        let mut cosim = CoSimulation::launch(config, handle, plant, paths)?;
        let total = config.total_steps();
        let chunks = chunk_sizes(total);
        log.info(format_args!("{total} steps in {} chunks", chunks.len()));
        let loop_start = Instant::now();
        for chunk in chunks {
            tokio::select! {
                res = cosim.run_loop(chunk) => res?,
                _ = self.cancel.cancelled() => return Err(TrialError::Cancelled),
            }
            debug!(trial = %id, done = cosim.steps_run(), total, "chunk complete");
        }
        debug!(trial = %id, loop_s = loop_start.elapsed().as_secs_f64(), "run loop finished");

        let output = cosim.shutdown().await?;
        log.info(format_args!("final end-effector error {:.4} m", output.plant.error));
        ResultMeta::create(id, parent, paths).save(paths)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_the_trial() {
        assert_eq!(chunk_sizes(40), vec![15, 15, 10]);
        assert_eq!(chunk_sizes(15), vec![15]);
        assert_eq!(chunk_sizes(0), Vec::<usize>::new());
        let big = chunk_sizes(5000);
        assert_eq!(big[0], 50);
        assert_eq!(big.len(), 100);
        assert_eq!(big.iter().sum::<usize>(), 5000);
        assert_eq!(chunk_sizes(1234).iter().sum::<usize>(), 1234);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = LoopConfig::default();
        cfg.simulation.resolution_ms = 0.0;
        let mut runner = TrialRunner::new(dir.path(), cfg);
        let failure = runner.run(None, "bad").await.unwrap_err();
        assert!(matches!(failure.source, TrialError::Config(_)));
        let paths = RunPaths::from_run_id(dir.path(), &failure.id);
        assert!(!paths.published());
        assert!(!paths.robot_result.exists());
    }

    #[tokio::test]
    async fn missing_parent_is_a_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = LoopConfig::default();
        cfg.simulation.resolution_ms = 1.0;
        let mut runner = TrialRunner::new(dir.path(), cfg);
        let ghost = TrialId::with_parts("20200101000000", "gone", "trial");
        let failure = runner.run(Some(&ghost), "").await.unwrap_err();
        assert!(matches!(failure.source, TrialError::Persist(_)));
        // params stay for post-mortem, results do not
        let paths = RunPaths::from_run_id(dir.path(), &failure.id);
        assert!(paths.params_json.exists());
        assert!(!paths.published());
    }
}
