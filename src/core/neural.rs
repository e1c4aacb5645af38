//! Neural side collaborator interface and the reference rate controller.
//!
//! The spiking network proper is external. A [`NeuralModel`] sees one
//! feedback [`RateFrame`] per step and answers with one motor frame; the
//! [`SimulatorHandle`] owns it and enforces the initialize-once lifecycle.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::ChannelMap;
use crate::codec::{count_to_rate, realize_spikes, Polarity, RateCodec};
use crate::error::{NeuralError, PersistError};
use crate::exchange::RateFrame;
use crate::prng::Prng;
use crate::recording::{ControllerPopulations, ControllerRecordings, PopulationRecorder};
use crate::section::{SectionTimings, TrialSection};

/// Everything a model needs to know about the trial it is about to run.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralContext {
    pub map: ChannelMap,
    pub timings: SectionTimings,
    pub resolution_ms: f64,
    pub init_rad: Vec<f64>,
    pub target_rad: Vec<f64>,
    pub total_steps: usize,
    pub seed: u64,
}

pub trait NeuralModel: Send {
    /// Channels this model instantiates on each side of the boundary.
    fn port_count(&self) -> usize;

    /// Reset per-trial state. Carried weights survive.
    fn prepare(&mut self, ctx: &NeuralContext) -> Result<(), NeuralError>;

    /// Motor frame for `step`, given the latest available feedback.
    fn respond(&mut self, step: u64, time_ms: f64, feedback: &RateFrame) -> Result<RateFrame, NeuralError>;

    fn weights(&self) -> Vec<f64>;

    fn load_weights(&mut self, weights: &[f64]) -> Result<(), NeuralError>;

    /// Called once after the last step of a trial.
    fn end_trial(&mut self) {}

    fn collect_recordings(&self, _dir: &Path) -> Result<ControllerRecordings, PersistError> {
        Ok(ControllerRecordings::default())
    }
}

/// Owned handle to the neural simulator. Stepping before
/// [`SimulatorHandle::initialize`] is an error, not a crash.
pub struct SimulatorHandle<M: ?Sized> {
    ctx: Option<NeuralContext>,
    steps_run: u64,
    model: Box<M>,
}

impl<M: NeuralModel + ?Sized> SimulatorHandle<M> {
    pub fn new(model: Box<M>) -> Self {
        Self {
            ctx: None,
            steps_run: 0,
            model,
        }
    }

    pub fn initialize(&mut self, ctx: NeuralContext) -> Result<(), NeuralError> {
        if self.ctx.is_some() {
            return Err(NeuralError::AlreadyInitialized);
        }
        self.model.prepare(&ctx)?;
        debug!(
            ports = self.model.port_count(),
            total_steps = ctx.total_steps,
            "neural simulator initialized"
        );
        self.ctx = Some(ctx);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn context(&self) -> Result<&NeuralContext, NeuralError> {
        self.ctx.as_ref().ok_or(NeuralError::NotInitialized)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> Result<&mut M, NeuralError> {
        if self.ctx.is_none() {
            return Err(NeuralError::NotInitialized);
        }
        Ok(&mut self.model)
    }

    pub fn step(&mut self, step: u64, time_ms: f64, feedback: &RateFrame) -> Result<RateFrame, NeuralError> {
        let model = self.model_mut()?;
        let frame = model.respond(step, time_ms, feedback)?;
        self.steps_run += 1;
        Ok(frame)
    }

    /// Simulated time covered so far (ms).
    pub fn simulation_time_ms(&self) -> f64 {
        let res = self.ctx.as_ref().map_or(0.0, |c| c.resolution_ms);
        self.steps_run as f64 * res
    }

    pub fn into_model(self) -> Box<M> {
        self.model
    }
}

/// Minimum-jerk profile from `q0` to `qf` over `window` (ms). Returns the
/// planned position and velocity (rad/s) at `t_ms`.
pub fn min_jerk(q0: f64, qf: f64, t_ms: f64, window: (f64, f64)) -> (f64, f64) {
    let (start, end) = window;
    let span = end - start;
    if span <= 0.0 {
        return if t_ms <= start { (q0, 0.0) } else { (qf, 0.0) };
    }
    let tau = ((t_ms - start) / span).clamp(0.0, 1.0);
    let d = qf - q0;
    let t3 = tau.powi(3);
    let pos = q0 + d * (10.0 * t3 - 15.0 * t3 * tau + 6.0 * t3 * tau * tau);
    let vel = d * (30.0 * tau * tau - 60.0 * t3 + 30.0 * t3 * tau) / (span / 1000.0);
    (pos, vel)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerParams {
    pub population_size: usize,
    pub joint_count: usize,
    /// Codec the plant uses for feedback; decoded here with its own gain.
    pub sensory: RateCodec,
    pub motor: RateCodec,
    pub kp: f64,
    pub kd: f64,
    pub learning_rate: f64,
    /// Send Poisson-realized rates instead of intended ones.
    pub stochastic: bool,
    pub record_spikes: bool,
}

/// Reference controller: minimum-jerk planner, delayed sensory estimate, PD
/// law plus one plastic feedforward weight per joint.
pub struct RateController {
    params: ControllerParams,
    ctx: Option<NeuralContext>,
    rng: Prng,
    weights: Vec<f64>,
    delay_lines: Vec<VecDeque<f64>>,
    extra_delay: Vec<usize>,
    last_estimate: Vec<f64>,
    error_sum: Vec<f64>,
    error_samples: usize,
    populations: ControllerPopulations,
}

impl RateController {
    pub fn new(params: ControllerParams) -> Self {
        let joints = params.joint_count;
        Self {
            params,
            ctx: None,
            rng: Prng::new(0),
            weights: vec![0.0; joints],
            delay_lines: Vec::new(),
            extra_delay: Vec::new(),
            last_estimate: Vec::new(),
            error_sum: vec![0.0; joints],
            error_samples: 0,
            populations: ControllerPopulations::default(),
        }
    }

    pub fn params(&self) -> &ControllerParams {
        &self.params
    }

    pub fn populations(&self) -> &ControllerPopulations {
        &self.populations
    }
}

fn record_block(
    slot: &mut Option<PopulationRecorder>,
    rng: &mut Prng,
    first_sender: usize,
    n: usize,
    rate_hz: f64,
    dt_ms: f64,
    time_ms: f64,
) {
    if let Some(rec) = slot {
        for neuron in 0..n {
            let count = realize_spikes(rate_hz, dt_ms, rng);
            if count > 0 {
                rec.record(first_sender + neuron, count, time_ms);
            }
        }
    }
}

impl NeuralModel for RateController {
    fn port_count(&self) -> usize {
        2 * self.params.population_size * self.params.joint_count
    }

    fn prepare(&mut self, ctx: &NeuralContext) -> Result<(), NeuralError> {
        let joints = self.params.joint_count;
        if self.weights.len() != joints {
            return Err(NeuralError::WeightShape {
                expected: joints,
                actual: self.weights.len(),
            });
        }
        self.rng = Prng::new(ctx.seed ^ 0xC0FF_EE00_D15E_A5E5);
        let delays: Vec<usize> = (0..joints)
            .map(|j| ctx.map.delay_steps(j, ctx.resolution_ms))
            .collect::<Option<_>>()
            .ok_or(NeuralError::JointCount {
                expected: joints,
                mapped: ctx.map.joint_count(),
            })?;
        self.delay_lines = delays.iter().map(|&d| VecDeque::with_capacity(d)).collect();
        // feedback already lags one step on the wire
        self.extra_delay = delays.iter().map(|&d| d - 1).collect();
        self.last_estimate = (0..joints)
            .map(|j| ctx.init_rad.get(j).copied().unwrap_or(0.0))
            .collect();
        self.error_sum = vec![0.0; joints];
        self.error_samples = 0;
        self.populations = if self.params.record_spikes {
            ControllerPopulations::all(self.params.population_size * joints)
        } else {
            ControllerPopulations::default()
        };
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn respond(&mut self, step: u64, time_ms: f64, feedback: &RateFrame) -> Result<RateFrame, NeuralError> {
        let Self {
            params,
            ctx,
            rng,
            weights,
            delay_lines,
            extra_delay,
            last_estimate,
            error_sum,
            error_samples,
            populations,
        } = self;
        let ctx = ctx.as_ref().ok_or(NeuralError::NotInitialized)?;
        let n = params.population_size;
        let dt_ms = ctx.resolution_ms;

        feedback.validate(ctx.map.total_channels())?;
        let sensed = ctx.map.collapse(feedback.step, &feedback.rates)?;
        let section = ctx.timings.section_at(time_ms);
        let window = ctx.timings.move_window();

        let mut motor = Vec::with_capacity(params.joint_count);
        for joint in 0..params.joint_count {
            let init = ctx.init_rad.get(joint).copied().unwrap_or(0.0);
            let target = ctx.target_rad.get(joint).copied().unwrap_or(init);

            let extra = extra_delay[joint];
            let line = &mut delay_lines[joint];
            line.push_back(params.sensory.decode(sensed[joint]));
            let estimate = if line.len() > extra {
                line.pop_front().unwrap_or(init)
            } else {
                init
            };
            let velocity = (estimate - last_estimate[joint]) / (dt_ms / 1000.0);
            last_estimate[joint] = estimate;

            let (q_plan, v_plan) = min_jerk(init, target, time_ms, window);
            let error = q_plan - estimate;
            if section == TrialSection::Move {
                error_sum[joint] += error * v_plan.signum();
            }
            let command = params.kp * error + params.kd * (v_plan - velocity) + weights[joint] * v_plan;
            let pair = params.motor.encode(command);
            motor.push(pair);

            let base = joint * n;
            let planned = params.sensory.encode(q_plan);
            for polarity in Polarity::BOTH {
                let (planner, motor_slot, feedback_slot) = match polarity {
                    Polarity::Positive => (
                        &mut populations.planner_p,
                        &mut populations.motor_p,
                        &mut populations.feedback_p,
                    ),
                    Polarity::Negative => (
                        &mut populations.planner_n,
                        &mut populations.motor_n,
                        &mut populations.feedback_n,
                    ),
                };
                record_block(planner, rng, base, n, planned.get(polarity), dt_ms, time_ms);
                record_block(motor_slot, rng, base, n, pair.get(polarity), dt_ms, time_ms);
                record_block(feedback_slot, rng, base, n, sensed[joint].get(polarity), dt_ms, time_ms);
            }
        }
        if section == TrialSection::Move {
            *error_samples += 1;
        }

        let mut rates = ctx.map.fan_out(&motor);
        if params.stochastic {
            for r in rates.iter_mut() {
                *r = count_to_rate(realize_spikes(*r, dt_ms, rng), dt_ms);
            }
        }
        Ok(RateFrame::new(step, rates))
    }

    fn weights(&self) -> Vec<f64> {
        self.weights.clone()
    }

    fn load_weights(&mut self, weights: &[f64]) -> Result<(), NeuralError> {
        if weights.len() != self.params.joint_count {
            return Err(NeuralError::WeightShape {
                expected: self.params.joint_count,
                actual: weights.len(),
            });
        }
        self.weights = weights.to_vec();
        Ok(())
    }

    /// Move each weight by `learning_rate` times the mean tracking error
    /// along the planned direction during the movement window.
    fn end_trial(&mut self) {
        if self.error_samples > 0 {
            let samples = self.error_samples as f64;
            for (w, e) in self.weights.iter_mut().zip(&self.error_sum) {
                *w += self.params.learning_rate * e / samples;
            }
        }
        info!(weights = ?self.weights, samples = self.error_samples, "controller weights updated");
        self.error_sum.iter_mut().for_each(|e| *e = 0.0);
        self.error_samples = 0;
    }

    fn collect_recordings(&self, dir: &Path) -> Result<ControllerRecordings, PersistError> {
        self.populations.collect(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ControllerParams {
        ControllerParams {
            population_size: 3,
            joint_count: 1,
            sensory: RateCodec::new(100.0, 0.0),
            motor: RateCodec::new(10.0, 0.0),
            kp: 2.0,
            kd: 0.0,
            learning_rate: 0.5,
            stochastic: false,
            record_spikes: true,
        }
    }

    fn ctx(delay_ms: f64) -> NeuralContext {
        let map = ChannelMap::new(3, 1, 1.0).unwrap().with_joint_delay(0, delay_ms).unwrap();
        NeuralContext {
            map,
            timings: SectionTimings {
                time_prep: 2.0,
                time_move: 10.0,
                time_locked_with_feedback: 1.0,
                time_grasp: 1.0,
                time_post: 1.0,
            },
            resolution_ms: 1.0,
            init_rad: vec![0.0],
            target_rad: vec![1.0],
            total_steps: 15,
            seed: 3,
        }
    }

    fn feedback(step: u64, position: f64) -> RateFrame {
        let map = ChannelMap::new(3, 1, 1.0).unwrap();
        RateFrame::new(step, map.fan_out(&[RateCodec::new(100.0, 0.0).encode(position)]))
    }

    #[test]
    fn prepare_rejects_map_with_fewer_joints() {
        let mut c = RateController::new(ControllerParams {
            joint_count: 2,
            ..params()
        });
        assert!(matches!(
            c.prepare(&ctx(1.0)),
            Err(NeuralError::JointCount { expected: 2, mapped: 1 })
        ));
    }

    #[test]
    fn handle_rejects_steps_before_initialize() {
        let mut handle = SimulatorHandle::new(Box::new(RateController::new(params())));
        assert!(matches!(
            handle.step(0, 0.0, &feedback(0, 0.0)),
            Err(NeuralError::NotInitialized)
        ));
        handle.initialize(ctx(1.0)).unwrap();
        assert!(matches!(handle.initialize(ctx(1.0)), Err(NeuralError::AlreadyInitialized)));
        assert!(handle.step(0, 0.0, &feedback(0, 0.0)).is_ok());
        assert_eq!(handle.simulation_time_ms(), 1.0);
    }

    #[test]
    fn min_jerk_hits_endpoints() {
        let w = (2.0, 12.0);
        assert_eq!(min_jerk(0.0, 1.0, 0.0, w), (0.0, 0.0));
        let (mid, v) = min_jerk(0.0, 1.0, 7.0, w);
        assert!((mid - 0.5).abs() < 1e-12);
        assert!(v > 0.0);
        let (end, v_end) = min_jerk(0.0, 1.0, 20.0, w);
        assert!((end - 1.0).abs() < 1e-12);
        assert!(v_end.abs() < 1e-12);
    }

    #[test]
    fn lagging_arm_gets_positive_command() {
        let mut c = RateController::new(params());
        c.prepare(&ctx(1.0)).unwrap();
        // mid-movement, arm still at the start
        let frame = c.respond(7, 7.0, &feedback(6, 0.0)).unwrap();
        assert_eq!(frame.rates.len(), 6);
        assert!(frame.rates[0] > 0.0);
        assert_eq!(frame.rates[3], 0.0);
    }

    #[test]
    fn extra_delay_holds_initial_estimate() {
        let mut c = RateController::new(params());
        c.prepare(&ctx(3.0)).unwrap();
        // delay of 3 steps: two extra steps on top of the wire lag
        c.respond(0, 0.0, &feedback(0, 0.4)).unwrap();
        assert_eq!(c.last_estimate[0], 0.0);
        c.respond(1, 1.0, &feedback(0, 0.5)).unwrap();
        assert_eq!(c.last_estimate[0], 0.0);
        c.respond(2, 2.0, &feedback(1, 0.6)).unwrap();
        assert!((c.last_estimate[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn weights_learn_from_movement_error_and_load_back() {
        let mut c = RateController::new(params());
        c.prepare(&ctx(1.0)).unwrap();
        for step in 0..15u64 {
            c.respond(step, step as f64, &feedback(step, 0.0)).unwrap();
        }
        c.end_trial();
        let w = c.weights();
        assert!(w[0] > 0.0, "{w:?}");

        let mut next = RateController::new(params());
        next.load_weights(&w).unwrap();
        assert_eq!(next.weights(), w);
        assert!(matches!(
            next.load_weights(&[1.0, 2.0]),
            Err(NeuralError::WeightShape { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn malformed_feedback_is_an_exchange_error() {
        let mut c = RateController::new(params());
        c.prepare(&ctx(1.0)).unwrap();
        let err = c.respond(0, 0.0, &RateFrame::silent(0, 5)).unwrap_err();
        assert!(matches!(err, NeuralError::Exchange(_)));
    }

    #[test]
    fn recordings_are_collected_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = params();
        p.sensory = RateCodec::new(100.0, 2000.0);
        let mut c = RateController::new(p);
        c.prepare(&ctx(1.0)).unwrap();
        for step in 0..15u64 {
            c.respond(step, step as f64, &feedback(step, 0.0)).unwrap();
        }
        let rec = c.collect_recordings(dir.path()).unwrap();
        assert_eq!(rec.manifests().count(), 6);
        let planner = rec.planner_p.unwrap();
        assert!(planner.spike_count > 0);
        assert_eq!(planner.population_size, 3);
    }
}
