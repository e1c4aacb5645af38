//! Plant-side per-step execution primitive.
//!
//! One call to [`StepSynchronizer::step`] is one synchronization round:
//! consume the motor frame destined for this step, act on the plant
//! according to the current trial section, produce the feedback frame for the
//! neural side, and advance physics by exactly one resolution step.
//!
//! The synchronizer owns the plant-side [`DataPackStore`]. Observed joint
//! positions are published to `positions` every round, and the collapsed
//! motor command reaches the plant only by way of `control_cmd`.

use tracing::{debug, trace, warn};

use crate::channel::ChannelMap;
use crate::codec::{RateCodec, RatePair};
use crate::error::ExchangeError;
use crate::exchange::{
    check_sequence, ControlCommand, DataPackStore, RateFrame, CONTROL_CMD_PACK, POSITIONS_PACK,
};
use crate::plant::{EndEffector, JointState, Plant, PlantRecordings};
use crate::section::{SectionTimings, TrialSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    AwaitingPlantState,
    Encoding,
    Transmitting,
    AwaitingNeuralRate,
    Decoding,
    Applying,
    Finished,
}

/// Which actuation path drives the plant this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPath {
    /// Torque decoded from the neural motor frame.
    Neural,
    /// Joints locked, nothing else.
    Locked,
    /// Joints locked, plant grasp logic active.
    Grasp,
    /// Joints locked, plant post-movement logic active.
    Shoulder,
}

impl CommandPath {
    pub fn for_section(section: TrialSection) -> Self {
        match section {
            TrialSection::Move => CommandPath::Neural,
            TrialSection::Grasp => CommandPath::Grasp,
            TrialSection::Post => CommandPath::Shoulder,
            TrialSection::Start
            | TrialSection::Prep
            | TrialSection::LockedWithFeedback
            | TrialSection::EndTrial => CommandPath::Locked,
        }
    }
}

/// Observable result of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub section: TrialSection,
    pub joints: Vec<JointState>,
    pub ee: EndEffector,
    /// Feedback frame for the neural side.
    pub outgoing: RateFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Applied(StepReport),
    /// Step index past the buffer end: nothing recorded, nothing applied.
    Skipped(StepReport),
}

impl StepOutcome {
    pub fn report(&self) -> &StepReport {
        match self {
            StepOutcome::Applied(r) | StepOutcome::Skipped(r) => r,
        }
    }

    pub fn into_report(self) -> StepReport {
        match self {
            StepOutcome::Applied(r) | StepOutcome::Skipped(r) => r,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped(_))
    }
}

pub struct StepSynchronizer {
    map: ChannelMap,
    timings: SectionTimings,
    resolution_ms: f64,
    sensory: RateCodec,
    scale_torque: f64,
    num_total_steps: usize,
    recordings: PlantRecordings,
    packs: DataPackStore,
    phase: SyncPhase,
    last_section: Option<TrialSection>,
    applied_steps: usize,
    skipped_steps: usize,
    log_every: usize,
}

impl StepSynchronizer {
    pub fn new(
        map: ChannelMap,
        timings: SectionTimings,
        resolution_ms: f64,
        sensory: RateCodec,
        scale_torque: f64,
    ) -> Self {
        let num_total_steps = timings.total_steps(resolution_ms);
        let recordings = PlantRecordings::empty(map.joint_count(), num_total_steps);
        let mut packs = DataPackStore::new();
        packs.register_data_pack(POSITIONS_PACK);
        packs.register_data_pack(CONTROL_CMD_PACK);
        Self {
            map,
            timings,
            resolution_ms,
            sensory,
            scale_torque,
            num_total_steps,
            recordings,
            packs,
            phase: SyncPhase::AwaitingPlantState,
            last_section: None,
            applied_steps: 0,
            skipped_steps: 0,
            log_every: 500,
        }
    }

    pub fn with_progress_interval(mut self, steps: usize) -> Self {
        self.log_every = steps.max(1);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn num_total_steps(&self) -> usize {
        self.num_total_steps
    }

    pub fn applied_steps(&self) -> usize {
        self.applied_steps
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn recordings(&self) -> &PlantRecordings {
        &self.recordings
    }

    pub fn into_recordings(self) -> PlantRecordings {
        self.recordings
    }

    pub fn packs(&self) -> &DataPackStore {
        &self.packs
    }

    /// Push observed joint positions to the `positions` pack.
    pub fn publish_positions(&mut self, joints: &[JointState]) -> Result<(), ExchangeError> {
        let positions: Vec<f64> = joints.iter().map(|j| j.position).collect();
        self.packs.set_positions(&positions)
    }

    /// Encode joint positions into the feedback frame.
    pub fn encode_feedback(&self, step: u64, joints: &[JointState]) -> RateFrame {
        let pairs: Vec<RatePair> = joints
            .iter()
            .take(self.map.joint_count())
            .map(|j| self.sensory.encode(j.position))
            .collect();
        RateFrame::new(step, self.map.fan_out(&pairs))
    }

    /// Validate a motor frame and collapse it into one rate pair per joint.
    pub fn decode_command(&self, frame: &RateFrame) -> Result<ControlCommand, ExchangeError> {
        frame.validate(self.map.total_channels())?;
        let pairs = self.map.collapse(frame.step, &frame.rates)?;
        Ok(ControlCommand {
            step: frame.step,
            pairs,
        })
    }

    /// Net torque per joint, `(rate_pos - rate_neg) / scale_torque`.
    pub fn command_torques(&self, command: &ControlCommand) -> Vec<f64> {
        command
            .pairs
            .iter()
            .map(|p| crate::codec::decode(p.rate_pos, p.rate_neg, self.scale_torque))
            .collect()
    }

    /// Decode the motor frame into `control_cmd`, then read the command the
    /// plant acts on back from the pack.
    fn receive_command(&mut self, incoming: &RateFrame, step: u64) -> Result<Vec<f64>, ExchangeError> {
        check_sequence(step, incoming.step)?;
        let command = self.decode_command(incoming)?;
        self.packs.set_control_cmd(&command)?;
        let command = self.packs.control_cmd()?;
        check_sequence(step, command.step)?;
        if command.pairs.len() != self.map.joint_count() {
            return Err(ExchangeError::InvalidDataPack(CONTROL_CMD_PACK));
        }
        Ok(self.command_torques(&command))
    }

    /// Run one synchronization round.
    ///
    /// A step index past the precomputed step count is skipped before the
    /// motor frame is looked at. Otherwise a malformed or out-of-sequence
    /// motor frame is an error and the trial must abort.
    pub fn step<P: Plant + ?Sized>(
        &mut self,
        plant: &mut P,
        incoming: &RateFrame,
        current_sim_time_ms: f64,
        step_index: usize,
    ) -> Result<StepOutcome, ExchangeError> {
        self.enter(SyncPhase::AwaitingPlantState);
        let joints = plant.joint_states();
        let ee = plant.end_effector();
        let section = self.timings.section_at(current_sim_time_ms);
        self.publish_positions(&joints)?;

        self.enter(SyncPhase::Encoding);
        let outgoing = self.encode_feedback(step_index as u64, &joints);
        self.enter(SyncPhase::Transmitting);

        let report = StepReport {
            step: step_index as u64,
            section,
            joints,
            ee,
            outgoing,
        };

        if step_index >= self.num_total_steps {
            warn!(
                step = step_index,
                max_steps = self.num_total_steps,
                sim_time_ms = current_sim_time_ms,
                "step index exceeds recording buffer, skipping step"
            );
            self.skipped_steps += 1;
            self.phase = self.next_phase();
            return Ok(StepOutcome::Skipped(report));
        }

        // the motor frame for this step is already in hand
        self.enter(SyncPhase::AwaitingNeuralRate);
        self.enter(SyncPhase::Decoding);
        let torques = match self.receive_command(incoming, step_index as u64) {
            Ok(torques) => torques,
            Err(e) => {
                self.enter(SyncPhase::AwaitingPlantState);
                return Err(e);
            }
        };

        if self.last_section != Some(section) {
            debug!(?section, step = step_index, "entering trial section");
            self.last_section = Some(section);
        }
        if step_index % self.log_every == 0 {
            debug!(step = step_index, sim_time_ms = current_sim_time_ms, "plant progress");
        }

        self.enter(SyncPhase::Applying);
        let mut applied = vec![0.0; self.map.joint_count()];
        let mut hand = 0.0;
        let mut shoulder = 0.0;
        match CommandPath::for_section(section) {
            CommandPath::Neural => {
                for (joint, torque) in torques.iter().enumerate() {
                    plant.set_joint_torque(joint, *torque);
                    applied[joint] = *torque;
                }
            }
            path => {
                for joint in 0..self.map.joint_count() {
                    plant.lock_joint(joint);
                }
                match path {
                    CommandPath::Grasp => hand = plant.grasp_if_target_close(),
                    CommandPath::Shoulder => shoulder = plant.move_shoulder(),
                    _ => {}
                }
            }
        }

        plant.simulate_step(self.resolution_ms / 1000.0);

        for (joint, state) in report.joints.iter().enumerate().take(self.map.joint_count()) {
            self.recordings.joints[joint].record_step(step_index, *state, applied[joint]);
        }
        self.recordings.ee.record_step(step_index, report.ee);
        self.recordings.hand_torque[step_index] = hand;
        self.recordings.shoulder_torque[step_index] = shoulder;

        self.applied_steps += 1;
        self.phase = self.next_phase();
        Ok(StepOutcome::Applied(report))
    }

    fn enter(&mut self, phase: SyncPhase) {
        trace!(from = ?self.phase, to = ?phase, "sync phase");
        self.phase = phase;
    }

    fn next_phase(&self) -> SyncPhase {
        if self.applied_steps + self.skipped_steps >= self.num_total_steps {
            SyncPhase::Finished
        } else {
            SyncPhase::AwaitingPlantState
        }
    }
}
