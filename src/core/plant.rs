//! Plant side collaborator interface and per-trial recording buffers.
//!
//! The physics engine itself is external; [`Plant`] is the surface the step
//! synchronizer drives. [`PendulumPlant`] is a small planar arm used as the
//! default plant and in tests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState {
    /// rad
    pub position: f64,
    /// rad/s
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndEffector {
    /// m
    pub position: [f64; 3],
    /// m/s
    pub velocity: [f64; 3],
}

/// Rigid-body plant driven one resolution step at a time.
pub trait Plant: Send {
    fn joint_count(&self) -> usize;

    fn joint_states(&self) -> Vec<JointState>;

    fn end_effector(&self) -> EndEffector;

    /// Apply `torque` to `joint` until changed.
    fn set_joint_torque(&mut self, joint: usize, torque: f64);

    /// Hold `joint` in place.
    fn lock_joint(&mut self, joint: usize);

    fn simulate_step(&mut self, dt_s: f64);

    /// Grasp-window hook. Returns the hand torque it imposed.
    fn grasp_if_target_close(&mut self) -> f64 {
        0.0
    }

    /// Post-movement hook. Returns the shoulder torque it imposed.
    fn move_shoulder(&mut self) -> f64 {
        0.0
    }

    fn initial_end_effector(&self) -> [f64; 3];

    fn target_end_effector(&self) -> [f64; 3];
}

/// Step-indexed trajectory of one joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointRecording {
    pub pos_rad: Vec<f64>,
    pub vel_rad_s: Vec<f64>,
    pub torque: Vec<f64>,
}

impl JointRecording {
    pub fn empty(num_steps: usize) -> Self {
        Self {
            pos_rad: vec![0.0; num_steps],
            vel_rad_s: vec![0.0; num_steps],
            torque: vec![0.0; num_steps],
        }
    }

    pub fn record_step(&mut self, step: usize, state: JointState, torque: f64) {
        self.pos_rad[step] = state.position;
        self.vel_rad_s[step] = state.velocity;
        self.torque[step] = torque;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EeRecording {
    pub pos_m: Vec<[f64; 3]>,
    pub vel_m_s: Vec<[f64; 3]>,
}

impl EeRecording {
    pub fn empty(num_steps: usize) -> Self {
        Self {
            pos_m: vec![[0.0; 3]; num_steps],
            vel_m_s: vec![[0.0; 3]; num_steps],
        }
    }

    pub fn record_step(&mut self, step: usize, ee: EndEffector) {
        self.pos_m[step] = ee.position;
        self.vel_m_s[step] = ee.velocity;
    }
}

/// Everything the plant side records during one trial. Only the plant side
/// writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecordings {
    pub joints: Vec<JointRecording>,
    pub ee: EeRecording,
    pub hand_torque: Vec<f64>,
    pub shoulder_torque: Vec<f64>,
}

impl PlantRecordings {
    pub fn empty(joint_count: usize, num_steps: usize) -> Self {
        Self {
            joints: (0..joint_count).map(|_| JointRecording::empty(num_steps)).collect(),
            ee: EeRecording::empty(num_steps),
            hand_torque: vec![0.0; num_steps],
            shoulder_torque: vec![0.0; num_steps],
        }
    }

    pub fn num_steps(&self) -> usize {
        self.hand_torque.len()
    }
}

/// Physical parameters of one link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// kg
    pub mass: f64,
    /// m
    pub length: f64,
    /// kg·m², about the link's center of mass
    pub inertia: f64,
}

impl Default for LinkSpec {
    fn default() -> Self {
        Self {
            mass: 1.89,
            length: 0.31,
            inertia: 0.00189,
        }
    }
}

impl LinkSpec {
    /// Inertia about the proximal joint.
    fn joint_inertia(&self) -> f64 {
        self.inertia + self.mass * (self.length / 2.0).powi(2)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Joint {
    state: JointState,
    torque: f64,
    locked: bool,
}

/// Planar serial arm in the horizontal plane. Joints are integrated
/// independently (no coupling terms), which is enough for a single-joint
/// experiment and keeps multi-joint runs well-behaved.
#[derive(Debug, Clone)]
pub struct PendulumPlant {
    links: Vec<LinkSpec>,
    joints: Vec<Joint>,
    damping: f64,
    base: [f64; 3],
    base_velocity: [f64; 3],
    init_ee: [f64; 3],
    target_ee: [f64; 3],
    grasp_radius: f64,
    shoulder_direction: f64,
    grasp_checked: bool,
    attached: bool,
    prev_ee: [f64; 3],
    ee_velocity: [f64; 3],
}

impl PendulumPlant {
    pub fn new(links: Vec<LinkSpec>, init_rad: &[f64], target_rad: &[f64]) -> Self {
        let joints = links
            .iter()
            .enumerate()
            .map(|(i, _)| Joint {
                state: JointState {
                    position: init_rad.get(i).copied().unwrap_or(0.0),
                    velocity: 0.0,
                },
                torque: 0.0,
                locked: false,
            })
            .collect();
        let base = [0.0; 3];
        let init_ee = forward_kinematics(&links, init_rad, base);
        let target_ee = forward_kinematics(&links, target_rad, base);
        Self {
            links,
            joints,
            damping: 0.0,
            base,
            base_velocity: [0.0; 3],
            init_ee,
            target_ee,
            grasp_radius: 0.05,
            shoulder_direction: 0.1,
            grasp_checked: false,
            attached: false,
            prev_ee: init_ee,
            ee_velocity: [0.0; 3],
        }
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_grasp_radius(mut self, radius: f64) -> Self {
        self.grasp_radius = radius;
        self
    }

    /// Base displacement speed (m/s along x) once the target is attached.
    pub fn with_shoulder_direction(mut self, direction: f64) -> Self {
        self.shoulder_direction = direction;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn angles(&self) -> Vec<f64> {
        self.joints.iter().map(|j| j.state.position).collect()
    }
}

fn forward_kinematics(links: &[LinkSpec], angles: &[f64], base: [f64; 3]) -> [f64; 3] {
    let mut p = base;
    let mut theta = 0.0;
    for (i, link) in links.iter().enumerate() {
        theta += angles.get(i).copied().unwrap_or(0.0);
        p[0] += link.length * theta.cos();
        p[1] += link.length * theta.sin();
    }
    p
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

impl Plant for PendulumPlant {
    fn joint_count(&self) -> usize {
        self.joints.len()
    }

    fn joint_states(&self) -> Vec<JointState> {
        self.joints.iter().map(|j| j.state).collect()
    }

    fn end_effector(&self) -> EndEffector {
        EndEffector {
            position: forward_kinematics(&self.links, &self.angles(), self.base),
            velocity: self.ee_velocity,
        }
    }

    fn set_joint_torque(&mut self, joint: usize, torque: f64) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.locked = false;
            j.torque = torque;
        }
    }

    fn lock_joint(&mut self, joint: usize) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.locked = true;
            j.torque = 0.0;
            j.state.velocity = 0.0;
        }
    }

    fn simulate_step(&mut self, dt_s: f64) {
        for (joint, link) in self.joints.iter_mut().zip(&self.links) {
            if joint.locked {
                continue;
            }
            let acc = (joint.torque - self.damping * joint.state.velocity) / link.joint_inertia();
            // semi-implicit Euler
            joint.state.velocity += acc * dt_s;
            joint.state.position += joint.state.velocity * dt_s;
        }
        for (b, v) in self.base.iter_mut().zip(self.base_velocity) {
            *b += v * dt_s;
        }
        let ee = forward_kinematics(&self.links, &self.angles(), self.base);
        if dt_s > 0.0 {
            for k in 0..3 {
                self.ee_velocity[k] = (ee[k] - self.prev_ee[k]) / dt_s;
            }
        }
        self.prev_ee = ee;
    }

    fn grasp_if_target_close(&mut self) -> f64 {
        if !self.grasp_checked {
            self.grasp_checked = true;
            let ee = forward_kinematics(&self.links, &self.angles(), self.base);
            self.attached = distance(ee, self.target_ee) <= self.grasp_radius;
            tracing::debug!(attached = self.attached, "grasp window: proximity checked");
        }
        if self.attached {
            1.0
        } else {
            0.0
        }
    }

    fn move_shoulder(&mut self) -> f64 {
        if !self.attached {
            return 0.0;
        }
        self.base_velocity = [self.shoulder_direction, 0.0, 0.0];
        1.0
    }

    fn initial_end_effector(&self) -> [f64; 3] {
        self.init_ee
    }

    fn target_end_effector(&self) -> [f64; 3] {
        self.target_ee
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(init: f64, target: f64) -> PendulumPlant {
        PendulumPlant::new(vec![LinkSpec::default()], &[init], &[target])
    }

    #[test]
    fn positive_torque_rotates_forward() {
        let mut p = single(0.0, 1.0);
        p.set_joint_torque(0, 0.5);
        for _ in 0..100 {
            p.simulate_step(0.001);
        }
        let s = p.joint_states()[0];
        assert!(s.position > 0.0 && s.velocity > 0.0);
    }

    #[test]
    fn locked_joint_holds_position() {
        let mut p = single(0.3, 1.0);
        p.set_joint_torque(0, 2.0);
        p.simulate_step(0.01);
        p.lock_joint(0);
        let held = p.joint_states()[0].position;
        for _ in 0..50 {
            p.simulate_step(0.01);
        }
        assert_eq!(p.joint_states()[0].position, held);
        assert_eq!(p.joint_states()[0].velocity, 0.0);
    }

    #[test]
    fn end_effector_follows_kinematics() {
        let p = single(std::f64::consts::FRAC_PI_2, 0.0);
        let ee = p.end_effector().position;
        assert!(ee[0].abs() < 1e-12);
        assert!((ee[1] - 0.31).abs() < 1e-12);
        assert!((p.target_end_effector()[0] - 0.31).abs() < 1e-12);
    }

    #[test]
    fn grasp_attaches_only_near_target() {
        let mut near = single(1.0, 1.0);
        assert_eq!(near.grasp_if_target_close(), 1.0);
        assert_eq!(near.move_shoulder(), 1.0);

        let mut far = single(0.0, 1.5);
        assert_eq!(far.grasp_if_target_close(), 0.0);
        assert_eq!(far.move_shoulder(), 0.0);
    }

    #[test]
    fn recordings_are_step_indexed() {
        let mut rec = PlantRecordings::empty(2, 4);
        rec.joints[1].record_step(
            2,
            JointState {
                position: 0.5,
                velocity: -1.0,
            },
            0.25,
        );
        assert_eq!(rec.joints[1].pos_rad, vec![0.0, 0.0, 0.5, 0.0]);
        assert_eq!(rec.joints[1].torque[2], 0.25);
        assert_eq!(rec.num_steps(), 4);
    }
}
