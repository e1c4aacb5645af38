//! Spawns both peers for one trial and drives them chunk by chunk.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use cloop::config::LoopConfig;
use cloop::neural::{NeuralModel, SimulatorHandle};
use cloop::plant::Plant;
use cloop::results::{NeuralResult, PlantResult, RunPaths};
use cloop::synchronizer::StepSynchronizer;

use crate::error::{primary, TrialError};
use crate::peers::{NeuralPeer, PeerCommand, PlantPeer};

/// What both peers published at the end of a trial.
#[derive(Debug, Clone)]
pub struct CoSimOutput {
    pub plant: PlantResult,
    pub neural: NeuralResult,
}

/// Live pair of peers. Dropping it aborts both tasks.
pub struct CoSimulation {
    plant_cmd: mpsc::Sender<PeerCommand<PlantResult>>,
    neural_cmd: mpsc::Sender<PeerCommand<NeuralResult>>,
    plant_task: JoinHandle<()>,
    neural_task: JoinHandle<()>,
    steps_run: usize,
}

async fn reply<T>(rx: oneshot::Receiver<Result<T, TrialError>>, peer: &'static str) -> Result<T, TrialError> {
    rx.await.unwrap_or(Err(TrialError::PeerGone(peer)))
}

impl CoSimulation {
    /// Wire the links and spawn both peers. Must be called inside a tokio
    /// runtime.
    pub fn launch(
        config: &LoopConfig,
        handle: SimulatorHandle<dyn NeuralModel>,
        plant: Box<dyn Plant>,
        paths: &RunPaths,
    ) -> Result<Self, TrialError> {
        let map = config.channel_map()?;
        let res = config.simulation.resolution_ms;
        let wait = Duration::from_millis(config.exchange.step_timeout_ms);
        let sync = StepSynchronizer::new(
            map.clone(),
            config.timings(),
            res,
            config.brain.sensory,
            config.plant.scale_torque,
        );

        let (motor_tx, motor_rx) = mpsc::channel(1);
        let (feedback_tx, feedback_rx) = mpsc::channel(1);

        let plant_peer = PlantPeer::new(plant, sync, motor_rx, feedback_tx, res, wait, paths.clone())?;
        let initial = plant_peer.initial_positions()?;
        let neural_peer = NeuralPeer::new(
            handle,
            map,
            config.brain.sensory,
            initial,
            motor_tx,
            feedback_rx,
            res,
            wait,
            paths.clone(),
        );

        let (plant_cmd, plant_rx) = mpsc::channel(1);
        let (neural_cmd, neural_rx) = mpsc::channel(1);
        Ok(Self {
            plant_cmd,
            neural_cmd,
            plant_task: tokio::spawn(plant_peer.serve(plant_rx)),
            neural_task: tokio::spawn(neural_peer.serve(neural_rx)),
            steps_run: 0,
        })
    }

    pub fn steps_run(&self) -> usize {
        self.steps_run
    }

    /// Advance both peers by `steps` rounds and wait for both to get there.
    pub async fn run_loop(&mut self, steps: usize) -> Result<(), TrialError> {
        let (plant_done, plant_rx) = oneshot::channel();
        let (neural_done, neural_rx) = oneshot::channel();
        self.plant_cmd
            .send(PeerCommand::Run { steps, done: plant_done })
            .await
            .map_err(|_| TrialError::PeerGone("plant"))?;
        self.neural_cmd
            .send(PeerCommand::Run { steps, done: neural_done })
            .await
            .map_err(|_| TrialError::PeerGone("neural"))?;

        let (plant, neural) = tokio::join!(reply(plant_rx, "plant"), reply(neural_rx, "neural"));
        primary(plant, neural)?;
        self.steps_run += steps;
        Ok(())
    }

    /// Have both peers publish their results and stop.
    pub async fn shutdown(mut self) -> Result<CoSimOutput, TrialError> {
        let (plant_done, plant_rx) = oneshot::channel();
        let (neural_done, neural_rx) = oneshot::channel();
        self.plant_cmd
            .send(PeerCommand::Finish { done: plant_done })
            .await
            .map_err(|_| TrialError::PeerGone("plant"))?;
        self.neural_cmd
            .send(PeerCommand::Finish { done: neural_done })
            .await
            .map_err(|_| TrialError::PeerGone("neural"))?;

        let (plant, neural) = tokio::join!(reply(plant_rx, "plant"), reply(neural_rx, "neural"));
        let (plant, neural) = primary(plant, neural)?;
        let _ = (&mut self.plant_task).await;
        let _ = (&mut self.neural_task).await;
        Ok(CoSimOutput { plant, neural })
    }
}

impl Drop for CoSimulation {
    fn drop(&mut self) {
        self.plant_task.abort();
        self.neural_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::chunk_sizes;
    use cloop::error::{ExchangeError, NeuralError};
    use cloop::exchange::RateFrame;
    use cloop::neural::{NeuralContext, RateController};
    use cloop::trial_id::TrialId;

    fn small_config() -> LoopConfig {
        let mut cfg = LoopConfig::default();
        cfg.simulation.resolution_ms = 1.0;
        cfg.simulation.time_prep = 5.0;
        cfg.simulation.time_move = 20.0;
        cfg.simulation.time_locked_with_feedback = 5.0;
        cfg.simulation.time_grasp = 5.0;
        cfg.simulation.time_post = 5.0;
        cfg.brain.population_size = 4;
        cfg.brain.fbk_delay_ms = 3.0;
        cfg.exchange.step_timeout_ms = 2_000;
        cfg
    }

    fn launch_with(cfg: &LoopConfig, model: Box<dyn NeuralModel>, root: &std::path::Path) -> CoSimulation {
        let id = TrialId::generate("cosim");
        let paths = RunPaths::from_run_id(root, &id);
        paths.create_dirs().unwrap();
        let mut handle = SimulatorHandle::new(model);
        handle.initialize(cfg.neural_context().unwrap()).unwrap();
        CoSimulation::launch(cfg, handle, Box::new(cfg.build_plant()), &paths).unwrap()
    }

    async fn run_in_chunks(cfg: &LoopConfig, chunks: &[usize]) -> CoSimOutput {
        let dir = tempfile::tempdir().unwrap();
        let model = Box::new(RateController::new(cfg.controller_params()));
        let mut cosim = launch_with(cfg, model, dir.path());
        for &chunk in chunks {
            cosim.run_loop(chunk).await.unwrap();
        }
        assert_eq!(cosim.steps_run(), cfg.total_steps());
        cosim.shutdown().await.unwrap()
    }

    #[tokio::test]
    async fn chunking_does_not_change_results() {
        let cfg = small_config();
        let total = cfg.total_steps();
        assert_eq!(total, 40);
        let chunked = run_in_chunks(&cfg, &chunk_sizes(total)).await;
        let single = run_in_chunks(&cfg, &[total]).await;
        assert_eq!(chunked.plant, single.plant);
        assert_eq!(chunked.neural.weights, single.neural.weights);
        assert_eq!(chunked.neural.simulation_time_ms, 40.0);
        assert!(chunked.plant.joint_data[0].pos_rad[30] > 0.0);
    }

    /// Delegates to the reference controller, then corrupts one motor frame.
    struct CorruptAt {
        inner: RateController,
        step: u64,
    }

    impl NeuralModel for CorruptAt {
        fn port_count(&self) -> usize {
            self.inner.port_count()
        }

        fn prepare(&mut self, ctx: &NeuralContext) -> Result<(), NeuralError> {
            self.inner.prepare(ctx)
        }

        fn respond(&mut self, step: u64, time_ms: f64, feedback: &RateFrame) -> Result<RateFrame, NeuralError> {
            let mut frame = self.inner.respond(step, time_ms, feedback)?;
            if step == self.step {
                frame.rates[0] = f64::NAN;
            }
            Ok(frame)
        }

        fn weights(&self) -> Vec<f64> {
            self.inner.weights()
        }

        fn load_weights(&mut self, weights: &[f64]) -> Result<(), NeuralError> {
            self.inner.load_weights(weights)
        }
    }

    #[tokio::test]
    async fn corrupt_frame_surfaces_as_root_cause() {
        let cfg = small_config();
        let dir = tempfile::tempdir().unwrap();
        let model = Box::new(CorruptAt {
            inner: RateController::new(cfg.controller_params()),
            step: 5,
        });
        let mut cosim = launch_with(&cfg, model, dir.path());
        let err = cosim.run_loop(cfg.total_steps()).await.unwrap_err();
        assert!(
            matches!(err, TrialError::Exchange(ExchangeError::Malformed { step: 5, channel: 0, .. })),
            "{err:?}"
        );
    }
}
