//! Run configuration.
//!
//! Loaded from JSON; every section and field is optional and falls back to
//! the defaults below. The resolved configuration is what gets written to a
//! trial's `params.json`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMap;
use crate::codec::RateCodec;
use crate::error::ConfigError;
use crate::exchange::{acceptable_latency_ms, DEFAULT_LATENCY_CONST_MS};
use crate::neural::{ControllerParams, NeuralContext};
use crate::plant::{LinkSpec, PendulumPlant};
use crate::section::SectionTimings;

/// Upper bound on steps per trial; every per-step buffer is sized up front.
pub const MAX_TRIAL_STEPS: usize = 100_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// ms
    pub resolution_ms: f64,
    pub time_prep: f64,
    pub time_move: f64,
    pub time_locked_with_feedback: f64,
    pub time_grasp: f64,
    pub time_post: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            resolution_ms: 0.1,
            time_prep: 50.0,
            time_move: 250.0,
            time_locked_with_feedback: 50.0,
            time_grasp: 50.0,
            time_post: 100.0,
            seed: 12345,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Neurons per polarity population.
    pub population_size: usize,
    pub joint_count: usize,
    /// Joint whose sensory pathway carries `fbk_delay_ms`.
    pub controlled_joint: usize,
    /// Total feedback delay of the controlled joint. Other joints get one
    /// resolution step.
    pub fbk_delay_ms: f64,
    pub sensory: RateCodec,
    pub motor: RateCodec,
    pub kp: f64,
    pub kd: f64,
    pub learning_rate: f64,
    pub stochastic: bool,
    pub record_spikes: bool,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            joint_count: 1,
            controlled_joint: 0,
            fbk_delay_ms: 0.1,
            sensory: RateCodec::new(1200.0, 0.0),
            motor: RateCodec::new(500.0, 0.0),
            kp: 5.0,
            kd: 0.5,
            learning_rate: 0.05,
            stochastic: false,
            record_spikes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    /// Hz of net motor rate per N·m.
    pub scale_torque: f64,
    pub links: Vec<LinkSpec>,
    pub damping: f64,
    /// m
    pub grasp_radius: f64,
    /// m/s of base motion after a grasp.
    pub shoulder_direction: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            scale_torque: 500.0,
            links: vec![LinkSpec::default()],
            damping: 0.0,
            grasp_radius: 0.05,
            shoulder_direction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Slack subtracted from one step to get the acceptable latency (ms).
    pub latency_const_ms: f64,
    /// Longest wait for any single message before the trial fails.
    pub step_timeout_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            latency_const_ms: DEFAULT_LATENCY_CONST_MS,
            step_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub init_joint_angle_deg: Vec<f64>,
    pub tgt_joint_angle_deg: Vec<f64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            init_joint_angle_deg: vec![0.0],
            tgt_joint_angle_deg: vec![90.0],
        }
    }
}

impl ExperimentConfig {
    pub fn init_rad(&self) -> Vec<f64> {
        self.init_joint_angle_deg.iter().map(|d| d.to_radians()).collect()
    }

    pub fn target_rad(&self) -> Vec<f64> {
        self.tgt_joint_angle_deg.iter().map(|d| d.to_radians()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub simulation: SimulationConfig,
    pub brain: BrainConfig,
    pub plant: PlantConfig,
    pub exchange: ExchangeConfig,
    pub experiment: ExperimentConfig,
}

impl LoopConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Everything a trial needs is checked here, before any buffer is sized
    /// from these values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if !(sim.resolution_ms.is_finite() && sim.resolution_ms > 0.0) {
            return Err(ConfigError::invalid("simulation.resolution_ms", "must be finite and > 0"));
        }
        let windows = [
            ("simulation.time_prep", sim.time_prep),
            ("simulation.time_move", sim.time_move),
            ("simulation.time_locked_with_feedback", sim.time_locked_with_feedback),
            ("simulation.time_grasp", sim.time_grasp),
            ("simulation.time_post", sim.time_post),
        ];
        for (field, value) in windows {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(field, "must be finite and >= 0"));
            }
        }
        let steps = self.timings().duration_ms() / sim.resolution_ms;
        if steps.round() < 1.0 {
            return Err(ConfigError::invalid("simulation", "trial has no steps"));
        }
        if steps.round() > MAX_TRIAL_STEPS as f64 {
            return Err(ConfigError::invalid(
                "simulation",
                format!("trial needs {steps:.0} steps, limit is {MAX_TRIAL_STEPS}"),
            ));
        }

        let brain = &self.brain;
        if brain.controlled_joint >= brain.joint_count {
            return Err(ConfigError::invalid(
                "brain.controlled_joint",
                format!("joint {} out of range for {} joints", brain.controlled_joint, brain.joint_count),
            ));
        }
        if !brain.fbk_delay_ms.is_finite() {
            return Err(ConfigError::invalid("brain.fbk_delay_ms", "must be finite"));
        }
        if brain.fbk_delay_ms < sim.resolution_ms {
            return Err(ConfigError::invalid(
                "brain.fbk_delay_ms",
                "cannot be shorter than one resolution step",
            ));
        }
        if !(self.plant.scale_torque > 0.0) {
            return Err(ConfigError::invalid("plant.scale_torque", "must be > 0"));
        }
        if !(brain.sensory.gain > 0.0) {
            return Err(ConfigError::invalid("brain.sensory.gain", "must be > 0 to decode feedback"));
        }
        if self.plant.links.len() != brain.joint_count {
            return Err(ConfigError::invalid(
                "plant.links",
                format!("{} links for {} joints", self.plant.links.len(), brain.joint_count),
            ));
        }
        let exp = &self.experiment;
        if exp.init_joint_angle_deg.len() != brain.joint_count {
            return Err(ConfigError::Missing("experiment.init_joint_angle_deg"));
        }
        if exp.tgt_joint_angle_deg.len() != brain.joint_count {
            return Err(ConfigError::Missing("experiment.tgt_joint_angle_deg"));
        }
        if acceptable_latency_ms(sim.resolution_ms, self.exchange.latency_const_ms) <= 0.0 {
            return Err(ConfigError::invalid(
                "exchange.latency_const_ms",
                "must be smaller than one resolution step",
            ));
        }
        if self.exchange.step_timeout_ms == 0 {
            return Err(ConfigError::invalid("exchange.step_timeout_ms", "must be > 0"));
        }
        self.channel_map().map(|_| ())
    }

    pub fn timings(&self) -> SectionTimings {
        let sim = &self.simulation;
        SectionTimings {
            time_prep: sim.time_prep,
            time_move: sim.time_move,
            time_locked_with_feedback: sim.time_locked_with_feedback,
            time_grasp: sim.time_grasp,
            time_post: sim.time_post,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.timings().total_steps(self.simulation.resolution_ms)
    }

    /// Channel map both peers derive. Non-controlled joints get the minimal
    /// delay of one resolution step.
    pub fn channel_map(&self) -> Result<ChannelMap, ConfigError> {
        ChannelMap::new(
            self.brain.population_size,
            self.brain.joint_count,
            self.simulation.resolution_ms,
        )?
        .with_joint_delay(self.brain.controlled_joint, self.brain.fbk_delay_ms)
    }

    pub fn controller_params(&self) -> ControllerParams {
        let b = &self.brain;
        ControllerParams {
            population_size: b.population_size,
            joint_count: b.joint_count,
            sensory: b.sensory,
            motor: b.motor,
            kp: b.kp,
            kd: b.kd,
            learning_rate: b.learning_rate,
            stochastic: b.stochastic,
            record_spikes: b.record_spikes,
        }
    }

    pub fn neural_context(&self) -> Result<NeuralContext, ConfigError> {
        Ok(NeuralContext {
            map: self.channel_map()?,
            timings: self.timings(),
            resolution_ms: self.simulation.resolution_ms,
            init_rad: self.experiment.init_rad(),
            target_rad: self.experiment.target_rad(),
            total_steps: self.total_steps(),
            seed: self.simulation.seed,
        })
    }

    pub fn build_plant(&self) -> PendulumPlant {
        PendulumPlant::new(
            self.plant.links.clone(),
            &self.experiment.init_rad(),
            &self.experiment.target_rad(),
        )
        .with_damping(self.plant.damping)
        .with_grasp_radius(self.plant.grasp_radius)
        .with_shoulder_direction(self.plant.shoulder_direction)
    }
}
