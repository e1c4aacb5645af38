//! Channel index assignment for the rate-exchange boundary.
//!
//! Both peers derive the same map from configuration constants alone; there is
//! no runtime negotiation. Channels are laid out contiguously per joint, and
//! within a joint the positive population precedes the negative one:
//!
//! ```text
//! joint 0: [pos 0..N) [neg 0..N)   joint 1: [pos 0..N) [neg 0..N)   ...
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::codec::{Polarity, RatePair};
use crate::error::{ConfigError, ExchangeError};

/// Channel index of `(joint, polarity, neuron)` for populations of
/// `population_size` neurons. Pure arithmetic, no bounds checks.
#[inline]
pub fn channel_for(
    joint_index: usize,
    polarity: Polarity,
    neuron_index: usize,
    population_size: usize,
) -> usize {
    let base = 2 * population_size * joint_index;
    let offset = match polarity {
        Polarity::Positive => 0,
        Polarity::Negative => population_size,
    };
    base + offset + neuron_index
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddr {
    pub joint: usize,
    pub polarity: Polarity,
    pub neuron: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMap {
    population_size: usize,
    joint_count: usize,
    /// Feedback transmission delay per joint (ms).
    delays_ms: Vec<f64>,
}

impl ChannelMap {
    /// Map with every joint at the minimal delay `default_delay_ms`.
    pub fn new(
        population_size: usize,
        joint_count: usize,
        default_delay_ms: f64,
    ) -> Result<Self, ConfigError> {
        if population_size == 0 {
            return Err(ConfigError::invalid("brain.population_size", "must be > 0"));
        }
        if joint_count == 0 {
            return Err(ConfigError::invalid("brain.joint_count", "must be > 0"));
        }
        Ok(Self {
            population_size,
            joint_count,
            delays_ms: vec![default_delay_ms; joint_count],
        })
    }

    /// Set the total sensory-pathway latency of one designated joint. The
    /// value replaces the default delay; it is not added to it.
    pub fn with_joint_delay(mut self, joint: usize, delay_ms: f64) -> Result<Self, ConfigError> {
        if joint >= self.joint_count {
            return Err(ConfigError::invalid(
                "brain.controlled_joint",
                format!("joint {joint} out of range for {} joints", self.joint_count),
            ));
        }
        if !(delay_ms.is_finite() && delay_ms >= 0.0) {
            return Err(ConfigError::invalid("brain.fbk_delay_ms", "must be finite and >= 0"));
        }
        self.delays_ms[joint] = delay_ms;
        Ok(self)
    }

    #[inline]
    pub fn population_size(&self) -> usize {
        self.population_size
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    #[inline]
    pub fn total_channels(&self) -> usize {
        2 * self.population_size * self.joint_count
    }

    /// Bounds-checked [`channel_for`].
    pub fn channel(&self, joint: usize, polarity: Polarity, neuron: usize) -> Option<usize> {
        if joint >= self.joint_count || neuron >= self.population_size {
            return None;
        }
        Some(channel_for(joint, polarity, neuron, self.population_size))
    }

    /// Inverse of [`ChannelMap::channel`].
    pub fn locate(&self, channel: usize) -> Option<ChannelAddr> {
        if channel >= self.total_channels() {
            return None;
        }
        let n = self.population_size;
        let joint = channel / (2 * n);
        let within = channel % (2 * n);
        let (polarity, neuron) = if within < n {
            (Polarity::Positive, within)
        } else {
            (Polarity::Negative, within - n)
        };
        Some(ChannelAddr {
            joint,
            polarity,
            neuron,
        })
    }

    /// Contiguous channel block of one polarity population.
    pub fn block(&self, joint: usize, polarity: Polarity) -> Range<usize> {
        let start = channel_for(joint, polarity, 0, self.population_size);
        start..start + self.population_size
    }

    /// Port count a side instantiated must equal the map's channel count.
    pub fn check_ports(&self, side: &'static str, ports: usize) -> Result<(), ConfigError> {
        let expected = self.total_channels();
        if ports != expected {
            return Err(ConfigError::ChannelCount {
                side,
                expected,
                actual: ports,
            });
        }
        Ok(())
    }

    /// Total feedback delay of `joint`, `None` if the joint is not mapped.
    #[inline]
    pub fn delay_ms(&self, joint: usize) -> Option<f64> {
        self.delays_ms.get(joint).copied()
    }

    /// Delay of `joint` in whole resolution steps (at least one).
    pub fn delay_steps(&self, joint: usize, resolution_ms: f64) -> Option<usize> {
        self.delay_ms(joint)
            .map(|d| ((d / resolution_ms).round() as usize).max(1))
    }

    /// Spread per-joint rate pairs over their population channels: every
    /// neuron of a block is driven at the pair's target rate.
    pub fn fan_out(&self, pairs: &[RatePair]) -> Vec<f64> {
        let mut rates = vec![0.0; self.total_channels()];
        for (joint, pair) in pairs.iter().enumerate().take(self.joint_count) {
            for polarity in Polarity::BOTH {
                rates[self.block(joint, polarity)].fill(pair.get(polarity));
            }
        }
        rates
    }

    /// Population-mean rate pair per joint.
    pub fn collapse(&self, step: u64, rates: &[f64]) -> Result<Vec<RatePair>, ExchangeError> {
        if rates.len() != self.total_channels() {
            return Err(ExchangeError::ChannelCount {
                step,
                expected: self.total_channels(),
                actual: rates.len(),
            });
        }
        let n = self.population_size as f64;
        Ok((0..self.joint_count)
            .map(|joint| {
                let mean = |p| rates[self.block(joint, p)].iter().sum::<f64>() / n;
                RatePair::new(mean(Polarity::Positive), mean(Polarity::Negative))
            })
            .collect())
    }
}
