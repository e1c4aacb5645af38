//! Neural-side recordings and their manifests.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::storage::{self, SpikeTrain};

/// Where one recorded population's payload ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub label: String,
    pub population_size: u32,
    pub spike_count: usize,
    pub population_spikes: PathBuf,
}

pub trait Recordable {
    /// Write payloads under `dir` and describe them.
    fn collect(&self, dir: &Path) -> Result<RecordingManifest, PersistError>;
}

/// Spike recorder attached to one population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRecorder {
    train: SpikeTrain,
}

impl PopulationRecorder {
    pub fn new(label: impl Into<String>, population_size: usize) -> Self {
        Self {
            train: SpikeTrain::new(label, population_size as u32),
        }
    }

    pub fn label(&self) -> &str {
        &self.train.label
    }

    /// Record `count` spikes of `neuron` at `time_ms`.
    pub fn record(&mut self, neuron: usize, count: u32, time_ms: f64) {
        for _ in 0..count {
            self.train.push(neuron as u32, time_ms as f32);
        }
    }

    pub fn spike_count(&self) -> usize {
        self.train.len()
    }

    pub fn train(&self) -> &SpikeTrain {
        &self.train
    }

    pub fn clear(&mut self) {
        self.train.senders.clear();
        self.train.times_ms.clear();
    }
}

impl Recordable for PopulationRecorder {
    fn collect(&self, dir: &Path) -> Result<RecordingManifest, PersistError> {
        fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        let path = dir.join(format!("{}.spk", self.train.label));
        storage::save_spike_train(&path, &self.train).map_err(|e| PersistError::io(&path, e))?;
        Ok(RecordingManifest {
            label: self.train.label.clone(),
            population_size: self.train.population_size,
            spike_count: self.train.len(),
            population_spikes: path,
        })
    }
}

/// Fixed set of recordable populations of the reference controller. A slot
/// left `None` is not recorded.
#[derive(Debug, Clone, Default)]
pub struct ControllerPopulations {
    pub planner_p: Option<PopulationRecorder>,
    pub planner_n: Option<PopulationRecorder>,
    pub motor_p: Option<PopulationRecorder>,
    pub motor_n: Option<PopulationRecorder>,
    pub feedback_p: Option<PopulationRecorder>,
    pub feedback_n: Option<PopulationRecorder>,
}

impl ControllerPopulations {
    pub const SLOTS: [&'static str; 6] = [
        "planner_p",
        "planner_n",
        "motor_p",
        "motor_n",
        "feedback_p",
        "feedback_n",
    ];

    /// Every slot filled with an empty recorder.
    pub fn all(population_size: usize) -> Self {
        let rec = |name: &str| Some(PopulationRecorder::new(name, population_size));
        Self {
            planner_p: rec("planner_p"),
            planner_n: rec("planner_n"),
            motor_p: rec("motor_p"),
            motor_n: rec("motor_n"),
            feedback_p: rec("feedback_p"),
            feedback_n: rec("feedback_n"),
        }
    }

    pub fn slots(&self) -> [(&'static str, Option<&PopulationRecorder>); 6] {
        [
            ("planner_p", self.planner_p.as_ref()),
            ("planner_n", self.planner_n.as_ref()),
            ("motor_p", self.motor_p.as_ref()),
            ("motor_n", self.motor_n.as_ref()),
            ("feedback_p", self.feedback_p.as_ref()),
            ("feedback_n", self.feedback_n.as_ref()),
        ]
    }

    pub fn slots_mut(&mut self) -> [&mut Option<PopulationRecorder>; 6] {
        [
            &mut self.planner_p,
            &mut self.planner_n,
            &mut self.motor_p,
            &mut self.motor_n,
            &mut self.feedback_p,
            &mut self.feedback_n,
        ]
    }

    pub fn clear(&mut self) {
        for rec in self.slots_mut().into_iter().flatten() {
            rec.clear();
        }
    }

    /// Collect every filled slot.
    pub fn collect(&self, dir: &Path) -> Result<ControllerRecordings, PersistError> {
        let take = |slot: Option<&PopulationRecorder>| slot.map(|r| r.collect(dir)).transpose();
        Ok(ControllerRecordings {
            planner_p: take(self.planner_p.as_ref())?,
            planner_n: take(self.planner_n.as_ref())?,
            motor_p: take(self.motor_p.as_ref())?,
            motor_n: take(self.motor_n.as_ref())?,
            feedback_p: take(self.feedback_p.as_ref())?,
            feedback_n: take(self.feedback_n.as_ref())?,
        })
    }
}

/// Manifests of [`ControllerPopulations`], slot for slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerRecordings {
    pub planner_p: Option<RecordingManifest>,
    pub planner_n: Option<RecordingManifest>,
    pub motor_p: Option<RecordingManifest>,
    pub motor_n: Option<RecordingManifest>,
    pub feedback_p: Option<RecordingManifest>,
    pub feedback_n: Option<RecordingManifest>,
}

impl ControllerRecordings {
    pub fn manifests(&self) -> impl Iterator<Item = &RecordingManifest> {
        [
            &self.planner_p,
            &self.planner_n,
            &self.motor_p,
            &self.motor_n,
            &self.feedback_p,
            &self.feedback_n,
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_writes_only_filled_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut pops = ControllerPopulations {
            motor_p: Some(PopulationRecorder::new("motor_p", 4)),
            feedback_n: Some(PopulationRecorder::new("feedback_n", 4)),
            ..ControllerPopulations::default()
        };
        if let Some(m) = pops.motor_p.as_mut() {
            m.record(2, 3, 1.5);
        }
        let rec = pops.collect(dir.path()).unwrap();
        assert!(rec.planner_p.is_none());
        let motor = rec.motor_p.as_ref().unwrap();
        assert_eq!(motor.spike_count, 3);
        assert!(motor.population_spikes.exists());
        assert_eq!(rec.manifests().count(), 2);

        let back = storage::load_spike_train(&motor.population_spikes).unwrap();
        assert_eq!(back.senders, vec![2, 2, 2]);
        assert_eq!(back.times_ms, vec![1.5; 3]);
    }

    #[test]
    fn slot_names_match_labels() {
        let pops = ControllerPopulations::all(2);
        for (name, rec) in pops.slots() {
            assert_eq!(rec.map(|r| r.label()), Some(name));
        }
        assert_eq!(
            pops.slots().map(|(n, _)| n),
            ControllerPopulations::SLOTS
        );
    }

    #[test]
    fn clear_empties_every_recorder() {
        let mut pops = ControllerPopulations::all(2);
        if let Some(p) = pops.planner_n.as_mut() {
            p.record(0, 5, 0.0);
        }
        pops.clear();
        assert!(pops.slots().iter().all(|(_, r)| r.map_or(0, |r| r.spike_count()) == 0));
    }
}
