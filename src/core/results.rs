//! Run directory layout and result manifests.
//!
//! Every manifest is published with [`write_json_atomic`]: either the whole
//! file is at its canonical path or nothing is.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::plant::{JointRecording, PlantRecordings};
use crate::recording::ControllerRecordings;
use crate::trial_id::TrialId;

pub const PARAMS_FILE: &str = "params.json";
pub const ROBOT_RESULT_FILE: &str = "robot_result.json";
pub const NEURAL_RESULT_FILE: &str = "neural_result.json";
pub const META_RESULT_FILE: &str = "meta_result.json";

/// Paths of one trial's run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub run: PathBuf,
    pub params_json: PathBuf,
    pub robot_result: PathBuf,
    pub neural_result: PathBuf,
    pub meta_result: PathBuf,
    pub spikes: PathBuf,
    pub logs: PathBuf,
}

impl RunPaths {
    pub fn from_run_id(root: &Path, id: &TrialId) -> Self {
        let run = root.join(id.as_str());
        Self {
            params_json: run.join(PARAMS_FILE),
            robot_result: run.join(ROBOT_RESULT_FILE),
            neural_result: run.join(NEURAL_RESULT_FILE),
            meta_result: run.join(META_RESULT_FILE),
            spikes: run.join("spikes"),
            logs: run.join("logs"),
            run,
        }
    }

    pub fn create_dirs(&self) -> Result<(), PersistError> {
        for dir in [&self.run, &self.spikes, &self.logs] {
            fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        }
        Ok(())
    }

    /// Remove everything a failed trial must not leave behind: result
    /// manifests, spike payloads and stray temp files. Params and logs stay.
    pub fn discard_partial(&self) -> Result<(), PersistError> {
        for file in [&self.robot_result, &self.neural_result, &self.meta_result] {
            remove_if_exists(file)?;
            remove_if_exists(&tmp_path(file))?;
        }
        if self.spikes.exists() {
            fs::remove_dir_all(&self.spikes).map_err(|e| PersistError::io(&self.spikes, e))?;
        }
        Ok(())
    }

    /// True once the trial's metadata has been published.
    pub fn published(&self) -> bool {
        self.meta_result.is_file()
    }
}

fn remove_if_exists(path: &Path) -> Result<(), PersistError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistError::io(path, e)),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize to `<path>.tmp`, fsync, then rename over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let tmp = tmp_path(path);
    let result = write_tmp(&tmp, path, value).and_then(|()| {
        fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_tmp<T: Serialize + ?Sized>(tmp: &Path, path: &Path, value: &T) -> Result<(), PersistError> {
    let file = File::create(tmp).map_err(|e| PersistError::io(tmp, e))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    w.flush().map_err(|e| PersistError::io(tmp, e))?;
    let file = w.into_inner().map_err(|e| PersistError::io(tmp, e.into_error()))?;
    file.sync_all().map_err(|e| PersistError::io(tmp, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let bytes = fs::read(path).map_err(|e| PersistError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Top-level manifest of one published trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub id: TrialId,
    /// Empty for the first trial of a chain.
    pub parent: String,
    pub neural: PathBuf,
    pub robotic: PathBuf,
    pub params: PathBuf,
}

impl ResultMeta {
    pub fn create(id: &TrialId, parent: Option<&TrialId>, paths: &RunPaths) -> Self {
        Self {
            id: id.clone(),
            parent: parent.map(|p| p.as_str().to_string()).unwrap_or_default(),
            neural: paths.neural_result.clone(),
            robotic: paths.robot_result.clone(),
            params: paths.params_json.clone(),
        }
    }

    pub fn save(&self, paths: &RunPaths) -> Result<(), PersistError> {
        write_json_atomic(&paths.meta_result, self)
    }

    pub fn load(root: &Path, id: &TrialId) -> Result<Self, PersistError> {
        let paths = RunPaths::from_run_id(root, id);
        if !paths.published() {
            return Err(PersistError::MissingTrial(id.as_str().to_string()));
        }
        read_json(&paths.meta_result)
    }

    pub fn parent_id(&self) -> Option<TrialId> {
        if self.parent.is_empty() {
            None
        } else {
            Some(TrialId::from_string(self.parent.clone()))
        }
    }
}

/// Ids from `id` back to the first trial of its chain, newest first.
pub fn trace_chain(root: &Path, id: &TrialId) -> Result<Vec<TrialId>, PersistError> {
    let mut chain = Vec::new();
    let mut next = Some(id.clone());
    while let Some(current) = next {
        if chain.contains(&current) {
            return Err(PersistError::Payload {
                path: root.join(current.as_str()),
                reason: "parent links form a cycle".to_string(),
            });
        }
        let meta = ResultMeta::load(root, &current)?;
        next = meta.parent_id();
        chain.push(current);
    }
    Ok(chain)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EeData {
    pub pos_ee: Vec<[f64; 3]>,
    pub vel_ee: Vec<[f64; 3]>,
}

/// Plant-side result, written once at trial end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantResult {
    pub joint_data: Vec<JointRecording>,
    pub ee_data: EeData,
    pub hand_torque: Vec<f64>,
    pub shoulder_torque: Vec<f64>,
    /// Final end-effector distance to the target (m).
    pub error: f64,
    pub init_hand_pos_ee: [f64; 3],
    pub trgt_hand_pos_ee: [f64; 3],
}

impl PlantResult {
    pub fn from_recordings(rec: PlantRecordings, init: [f64; 3], target: [f64; 3]) -> Self {
        let last = rec.ee.pos_m.last().copied().unwrap_or(init);
        let error = last
            .iter()
            .zip(target)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        Self {
            joint_data: rec.joints,
            ee_data: EeData {
                pos_ee: rec.ee.pos_m,
                vel_ee: rec.ee.vel_m_s,
            },
            hand_torque: rec.hand_torque,
            shoulder_torque: rec.shoulder_torque,
            error,
            init_hand_pos_ee: init,
            trgt_hand_pos_ee: target,
        }
    }
}

/// Neural-side result, written once at trial end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralResult {
    pub controller: ControllerRecordings,
    pub simulation_time_ms: f64,
    pub dt_ms: f64,
    /// Learned weights carried to the next trial.
    pub weights: Vec<f64>,
}

impl NeuralResult {
    /// Weights published by trial `id`, reached through its metadata.
    pub fn load_weights(root: &Path, id: &TrialId) -> Result<Vec<f64>, PersistError> {
        let meta = ResultMeta::load(root, id)?;
        let result: NeuralResult = read_json(&meta.neural)?;
        Ok(result.weights)
    }
}
