//! Typed payloads crossing the neural/plant boundary.
//!
//! The boundary is message passing only: a [`RateFrame`] per step in each
//! direction plus a [`PositionReport`] riding along the feedback. On the
//! plant side every command passes through named sideband records
//! ([`DataPackStore`]): the collapsed motor frame is pushed to `control_cmd`
//! and read back from there, and the observed joint positions are pushed to
//! `positions`, which is what the feedback report carries.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::RatePair;
use crate::error::ExchangeError;

/// Sideband record holding the latest joint positions.
pub const POSITIONS_PACK: &str = "positions";
/// Sideband record holding the latest collapsed control command.
pub const CONTROL_CMD_PACK: &str = "control_cmd";

/// Default slack subtracted from one resolution step (ms).
pub const DEFAULT_LATENCY_CONST_MS: f64 = 1e-6;

/// Maximum schedule slack the receiving side may exploit when consuming
/// values produced by the other side: just under one resolution step.
#[inline]
pub fn acceptable_latency_ms(resolution_ms: f64, latency_const_ms: f64) -> f64 {
    resolution_ms - latency_const_ms
}

/// One target rate per channel index, for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateFrame {
    pub step: u64,
    pub rates: Vec<f64>,
}

impl RateFrame {
    pub fn new(step: u64, rates: Vec<f64>) -> Self {
        Self { step, rates }
    }

    /// All channels at zero.
    pub fn silent(step: u64, channels: usize) -> Self {
        Self::new(step, vec![0.0; channels])
    }

    /// Width must match the channel map and every rate must be a finite,
    /// non-negative number.
    pub fn validate(&self, expected_channels: usize) -> Result<(), ExchangeError> {
        if self.rates.len() != expected_channels {
            return Err(ExchangeError::ChannelCount {
                step: self.step,
                expected: expected_channels,
                actual: self.rates.len(),
            });
        }
        if let Some((channel, &value)) = self
            .rates
            .iter()
            .enumerate()
            .find(|(_, r)| !r.is_finite() || **r < 0.0)
        {
            return Err(ExchangeError::Malformed {
                step: self.step,
                channel,
                value,
            });
        }
        Ok(())
    }
}

/// Per-joint rate pairs after collapsing a motor frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub step: u64,
    pub pairs: Vec<RatePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub step: u64,
    pub joint_pos_rad: Vec<f64>,
}

/// Plant → neural message for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub frame: RateFrame,
    pub report: PositionReport,
}

/// Receivers accept only the step they wait for. A bounded lag is allowed by
/// the protocol; reordering is not.
#[inline]
pub fn check_sequence(expected: u64, got: u64) -> Result<(), ExchangeError> {
    if expected != got {
        return Err(ExchangeError::OutOfOrder { expected, got });
    }
    Ok(())
}

/// Named bidirectional records exposed by the plant engine for polling and
/// pushing.
#[derive(Debug, Default)]
pub struct DataPackStore {
    packs: HashMap<String, Value>,
}

impl DataPackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_data_pack(&mut self, name: &str) {
        self.packs.entry(name.to_string()).or_insert(Value::Null);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.packs.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ExchangeError> {
        match self.packs.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ExchangeError::UnknownDataPack(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Value, ExchangeError> {
        self.packs
            .get(name)
            .ok_or_else(|| ExchangeError::UnknownDataPack(name.to_string()))
    }

    /// `positions.joint_pos_rad`.
    pub fn set_positions(&mut self, joint_pos_rad: &[f64]) -> Result<(), ExchangeError> {
        self.set(
            POSITIONS_PACK,
            serde_json::json!({ "joint_pos_rad": joint_pos_rad }),
        )
    }

    pub fn positions(&self) -> Result<Vec<f64>, ExchangeError> {
        self.get(POSITIONS_PACK)?
            .get("joint_pos_rad")
            .and_then(f64_array)
            .ok_or(ExchangeError::InvalidDataPack(POSITIONS_PACK))
    }

    /// `control_cmd.step`, `control_cmd.rate_pos`, `control_cmd.rate_neg`,
    /// one rate entry per joint.
    pub fn set_control_cmd(&mut self, command: &ControlCommand) -> Result<(), ExchangeError> {
        let rate_pos: Vec<f64> = command.pairs.iter().map(|p| p.rate_pos).collect();
        let rate_neg: Vec<f64> = command.pairs.iter().map(|p| p.rate_neg).collect();
        self.set(
            CONTROL_CMD_PACK,
            serde_json::json!({ "step": command.step, "rate_pos": rate_pos, "rate_neg": rate_neg }),
        )
    }

    pub fn control_cmd(&self) -> Result<ControlCommand, ExchangeError> {
        let value = self.get(CONTROL_CMD_PACK)?;
        let step = value.get("step").and_then(Value::as_u64);
        let rate_pos = value.get("rate_pos").and_then(f64_array);
        let rate_neg = value.get("rate_neg").and_then(f64_array);
        match (step, rate_pos, rate_neg) {
            (Some(step), Some(pos), Some(neg)) if pos.len() == neg.len() => Ok(ControlCommand {
                step,
                pairs: pos.into_iter().zip(neg).map(|(p, n)| RatePair::new(p, n)).collect(),
            }),
            _ => Err(ExchangeError::InvalidDataPack(CONTROL_CMD_PACK)),
        }
    }
}

fn f64_array(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_validation_catches_width_and_values() {
        assert!(RateFrame::silent(0, 4).validate(4).is_ok());
        assert_eq!(
            RateFrame::silent(3, 4).validate(5),
            Err(ExchangeError::ChannelCount {
                step: 3,
                expected: 5,
                actual: 4
            })
        );
        let nan = RateFrame::new(1, vec![0.0, f64::NAN]);
        assert!(matches!(
            nan.validate(2),
            Err(ExchangeError::Malformed { channel: 1, .. })
        ));
        let negative = RateFrame::new(1, vec![-1.0, 0.0]);
        assert!(matches!(
            negative.validate(2),
            Err(ExchangeError::Malformed { channel: 0, .. })
        ));
    }

    #[test]
    fn sequence_rejects_reordering() {
        assert!(check_sequence(4, 4).is_ok());
        assert_eq!(
            check_sequence(4, 5),
            Err(ExchangeError::OutOfOrder {
                expected: 4,
                got: 5
            })
        );
    }

    #[test]
    fn latency_is_just_under_one_step() {
        let l = acceptable_latency_ms(0.1, DEFAULT_LATENCY_CONST_MS);
        assert!(l < 0.1 && l > 0.0999);
    }

    #[test]
    fn data_packs_must_be_registered() {
        let mut store = DataPackStore::new();
        assert!(store.set_positions(&[0.5]).is_err());
        store.register_data_pack(POSITIONS_PACK);
        store.register_data_pack(CONTROL_CMD_PACK);
        store.set_positions(&[0.5, -0.25]).unwrap();
        assert_eq!(store.positions().unwrap(), vec![0.5, -0.25]);
    }

    #[test]
    fn control_command_reads_back_from_pack() {
        let mut store = DataPackStore::new();
        store.register_data_pack(CONTROL_CMD_PACK);
        let command = ControlCommand {
            step: 7,
            pairs: vec![RatePair::new(10.0, 2.0), RatePair::new(0.0, 4.5)],
        };
        store.set_control_cmd(&command).unwrap();
        assert_eq!(store.get(CONTROL_CMD_PACK).unwrap()["rate_pos"][0], 10.0);
        assert_eq!(store.control_cmd().unwrap(), command);
    }

    #[test]
    fn unset_or_broken_packs_are_rejected() {
        let mut store = DataPackStore::new();
        store.register_data_pack(POSITIONS_PACK);
        store.register_data_pack(CONTROL_CMD_PACK);
        assert_eq!(
            store.positions(),
            Err(ExchangeError::InvalidDataPack(POSITIONS_PACK))
        );
        store
            .set(
                CONTROL_CMD_PACK,
                serde_json::json!({ "step": 1, "rate_pos": [1.0, 2.0], "rate_neg": [1.0] }),
            )
            .unwrap();
        assert_eq!(
            store.control_cmd(),
            Err(ExchangeError::InvalidDataPack(CONTROL_CMD_PACK))
        );
    }
}
