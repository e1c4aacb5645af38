//! The two co-simulation peers.
//!
//! Each peer runs in its own task and owns its side of the experiment
//! outright. They share nothing but two bounded links:
//!
//! - motor: neural → plant, one [`RateFrame`] per step
//! - feedback: plant → neural, one [`Feedback`] per step
//!
//! The neural side answers step `i` from the feedback of step `i - 1`; step
//! 0 starts from the initial `positions` data pack. Every receive is bounded
//! by the step timeout and checked against the expected step index. The
//! position report riding along each feedback frame is read from the plant's
//! `positions` pack.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use cloop::channel::ChannelMap;
use cloop::codec::RateCodec;
use cloop::error::ExchangeError;
use cloop::exchange::{check_sequence, Feedback, PositionReport, RateFrame, POSITIONS_PACK};
use cloop::neural::{NeuralModel, SimulatorHandle};
use cloop::plant::Plant;
use cloop::results::{write_json_atomic, NeuralResult, PlantResult, RunPaths};
use cloop::synchronizer::StepSynchronizer;

use crate::error::TrialError;
use crate::logs::PeerLog;

pub enum PeerCommand<O> {
    /// Advance `steps` synchronization rounds.
    Run {
        steps: usize,
        done: oneshot::Sender<Result<(), TrialError>>,
    },
    /// Publish this peer's result and stop.
    Finish {
        done: oneshot::Sender<Result<O, TrialError>>,
    },
}

async fn recv_step<T>(
    rx: &mut mpsc::Receiver<T>,
    step: u64,
    wait: Duration,
    link: &'static str,
) -> Result<T, ExchangeError> {
    match tokio::time::timeout(wait, rx.recv()).await {
        Ok(Some(msg)) => Ok(msg),
        Ok(None) => Err(ExchangeError::Disconnected(link)),
        Err(_) => Err(ExchangeError::Timeout {
            step,
            waited_ms: wait.as_millis() as u64,
        }),
    }
}

async fn send_step<T>(
    tx: &mpsc::Sender<T>,
    msg: T,
    step: u64,
    wait: Duration,
    link: &'static str,
) -> Result<(), ExchangeError> {
    match tokio::time::timeout(wait, tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(ExchangeError::Disconnected(link)),
        Err(_) => Err(ExchangeError::Timeout {
            step,
            waited_ms: wait.as_millis() as u64,
        }),
    }
}

pub struct PlantPeer {
    plant: Box<dyn Plant>,
    sync: StepSynchronizer,
    motor_rx: mpsc::Receiver<RateFrame>,
    feedback_tx: mpsc::Sender<Feedback>,
    resolution_ms: f64,
    wait: Duration,
    next_step: usize,
    paths: RunPaths,
    log: PeerLog,
}

impl PlantPeer {
    pub fn new(
        plant: Box<dyn Plant>,
        mut sync: StepSynchronizer,
        motor_rx: mpsc::Receiver<RateFrame>,
        feedback_tx: mpsc::Sender<Feedback>,
        resolution_ms: f64,
        wait: Duration,
        paths: RunPaths,
    ) -> Result<Self, TrialError> {
        sync.publish_positions(&plant.joint_states())?;
        let log = PeerLog::open(&paths.logs, "plant");
        Ok(Self {
            plant,
            sync,
            motor_rx,
            feedback_tx,
            resolution_ms,
            wait,
            next_step: 0,
            paths,
            log,
        })
    }

    /// Initial joint positions as published in the `positions` pack.
    pub fn initial_positions(&self) -> Result<PositionReport, TrialError> {
        Ok(PositionReport {
            step: 0,
            joint_pos_rad: self.sync.packs().positions()?,
        })
    }

    async fn run_steps(&mut self, steps: usize) -> Result<(), TrialError> {
        for _ in 0..steps {
            let step = self.next_step;
            let index = step as u64;
            let motor = recv_step(&mut self.motor_rx, index, self.wait, "motor").await?;
            check_sequence(index, motor.step)?;

            let time_ms = step as f64 * self.resolution_ms;
            let outcome = self.sync.step(&mut *self.plant, &motor, time_ms, step)?;
            let observed = self.sync.packs().positions()?;
            if outcome.is_skipped() {
                self.log.warn(format_args!("step {step} past buffer end, skipped"));
            } else if step % 1000 == 0 {
                self.log.info(format_args!("step {step} t={time_ms:.1}ms q={observed:?}"));
            }

            let feedback = Feedback {
                report: PositionReport {
                    step: index,
                    joint_pos_rad: observed,
                },
                frame: outcome.into_report().outgoing,
            };
            send_step(&self.feedback_tx, feedback, index, self.wait, "feedback").await?;
            self.next_step += 1;
        }
        Ok(())
    }

    fn finish(self) -> Result<PlantResult, TrialError> {
        let init = self.plant.initial_end_effector();
        let target = self.plant.target_end_effector();
        let result = PlantResult::from_recordings(self.sync.into_recordings(), init, target);
        write_json_atomic(&self.paths.robot_result, &result)?;
        debug!(error_m = result.error, "plant result published");
        Ok(result)
    }

    pub async fn serve(mut self, mut commands: mpsc::Receiver<PeerCommand<PlantResult>>) {
        self.log.info("plant peer ready");
        while let Some(cmd) = commands.recv().await {
            match cmd {
                PeerCommand::Run { steps, done } => {
                    let result = self.run_steps(steps).await;
                    let failed = result.is_err();
                    if let Err(e) = &result {
                        self.log.error(format_args!("step {}: {e}", self.next_step));
                        warn!(step = self.next_step, "plant peer failed: {e}");
                    }
                    let _ = done.send(result);
                    if failed {
                        // dropping the links tells the neural side
                        return;
                    }
                }
                PeerCommand::Finish { done } => {
                    self.log.info(format_args!("finished after {} steps", self.next_step));
                    let _ = done.send(self.finish());
                    return;
                }
            }
        }
    }
}

pub struct NeuralPeer {
    handle: SimulatorHandle<dyn NeuralModel>,
    map: ChannelMap,
    sensory: RateCodec,
    initial: PositionReport,
    motor_tx: mpsc::Sender<RateFrame>,
    feedback_rx: mpsc::Receiver<Feedback>,
    resolution_ms: f64,
    wait: Duration,
    next_step: usize,
    paths: RunPaths,
    log: PeerLog,
}

impl NeuralPeer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: SimulatorHandle<dyn NeuralModel>,
        map: ChannelMap,
        sensory: RateCodec,
        initial: PositionReport,
        motor_tx: mpsc::Sender<RateFrame>,
        feedback_rx: mpsc::Receiver<Feedback>,
        resolution_ms: f64,
        wait: Duration,
        paths: RunPaths,
    ) -> Self {
        let log = PeerLog::open(&paths.logs, "neural");
        Self {
            handle,
            map,
            sensory,
            initial,
            motor_tx,
            feedback_rx,
            resolution_ms,
            wait,
            next_step: 0,
            paths,
            log,
        }
    }

    fn initial_feedback(&self) -> RateFrame {
        let pairs: Vec<_> = self.initial.joint_pos_rad.iter().map(|q| self.sensory.encode(*q)).collect();
        RateFrame::new(0, self.map.fan_out(&pairs))
    }

    /// The report must describe the same step as its frame and cover every
    /// joint.
    fn accept_report(&mut self, report: &PositionReport) -> Result<(), TrialError> {
        check_sequence(self.next_step as u64 - 1, report.step)?;
        if report.joint_pos_rad.len() != self.map.joint_count() {
            return Err(ExchangeError::InvalidDataPack(POSITIONS_PACK).into());
        }
        if report.step % 1000 == 0 {
            self.log.info(format_args!("feedback {} q={:?}", report.step, report.joint_pos_rad));
        }
        Ok(())
    }

    async fn run_steps(&mut self, steps: usize) -> Result<(), TrialError> {
        for _ in 0..steps {
            let step = self.next_step;
            let index = step as u64;
            let feedback = if step == 0 {
                self.initial_feedback()
            } else {
                let fb = recv_step(&mut self.feedback_rx, index - 1, self.wait, "feedback").await?;
                check_sequence(index - 1, fb.frame.step)?;
                self.accept_report(&fb.report)?;
                fb.frame
            };

            let time_ms = step as f64 * self.resolution_ms;
            let motor = self.handle.step(index, time_ms, &feedback)?;
            send_step(&self.motor_tx, motor, index, self.wait, "motor").await?;
            self.next_step += 1;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<NeuralResult, TrialError> {
        self.handle.model_mut()?.end_trial();
        let model = self.handle.model();
        let controller = model.collect_recordings(&self.paths.spikes)?;
        let result = NeuralResult {
            controller,
            simulation_time_ms: self.handle.simulation_time_ms(),
            dt_ms: self.resolution_ms,
            weights: model.weights(),
        };
        write_json_atomic(&self.paths.neural_result, &result)?;
        debug!(weights = ?result.weights, "neural result published");
        Ok(result)
    }

    pub async fn serve(mut self, mut commands: mpsc::Receiver<PeerCommand<NeuralResult>>) {
        self.log.info("neural peer ready");
        while let Some(cmd) = commands.recv().await {
            match cmd {
                PeerCommand::Run { steps, done } => {
                    let result = self.run_steps(steps).await;
                    let failed = result.is_err();
                    if let Err(e) = &result {
                        self.log.error(format_args!("step {}: {e}", self.next_step));
                        warn!(step = self.next_step, "neural peer failed: {e}");
                    }
                    let _ = done.send(result);
                    if failed {
                        return;
                    }
                }
                PeerCommand::Finish { done } => {
                    self.log.info(format_args!("finished after {} steps", self.next_step));
                    let _ = done.send(self.finish());
                    return;
                }
            }
        }
    }
}
