//! Rate coding of signed scalars.
//!
//! A signed control quantity crosses the neural/physical boundary as a pair of
//! non-negative firing rates, one per polarity population. The codec works on
//! *intended* (target) rates; turning them into actual spikes is the job of a
//! spiking population, see [`realize_spikes`].

use serde::{Deserialize, Serialize};

use crate::prng::Prng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const BOTH: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    /// Polarity population that carries `scalar`.
    #[inline]
    pub fn of(scalar: f64) -> Self {
        if scalar >= 0.0 {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Polarity::Positive => "p",
            Polarity::Negative => "n",
        }
    }
}

/// Two non-negative rates (Hz) representing one signed value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatePair {
    pub rate_pos: f64,
    pub rate_neg: f64,
}

impl RatePair {
    pub fn new(rate_pos: f64, rate_neg: f64) -> Self {
        Self { rate_pos, rate_neg }
    }

    #[inline]
    pub fn get(&self, polarity: Polarity) -> f64 {
        match polarity {
            Polarity::Positive => self.rate_pos,
            Polarity::Negative => self.rate_neg,
        }
    }

    /// `rate_pos - rate_neg`. Baselines cancel here.
    #[inline]
    pub fn net(&self) -> f64 {
        self.rate_pos - self.rate_neg
    }
}

/// Encode `scalar` into a rate pair: the active polarity gets
/// `baseline + gain * |scalar|`, the other stays at `baseline`.
///
/// `gain = 0` silences the channel (constant baseline) without touching wiring.
#[inline]
pub fn encode(scalar: f64, gain: f64, baseline: f64) -> RatePair {
    let drive = baseline + gain * scalar.abs();
    if scalar >= 0.0 {
        RatePair::new(drive, baseline)
    } else {
        RatePair::new(baseline, drive)
    }
}

/// Inverse of [`encode`] in expectation. No clamping: negative results are
/// the negative polarity winning.
#[inline]
pub fn decode(rate_pos: f64, rate_neg: f64, scale: f64) -> f64 {
    (rate_pos - rate_neg) / scale
}

/// Gain/baseline of one population pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCodec {
    /// Hz per unit of the encoded quantity.
    pub gain: f64,
    /// Hz, added to both polarities.
    pub baseline: f64,
}

impl Default for RateCodec {
    fn default() -> Self {
        Self {
            gain: 1.0,
            baseline: 0.0,
        }
    }
}

impl RateCodec {
    pub fn new(gain: f64, baseline: f64) -> Self {
        Self { gain, baseline }
    }

    #[inline]
    pub fn encode(&self, scalar: f64) -> RatePair {
        encode(scalar, self.gain, self.baseline)
    }

    /// Decode with this codec's own gain as the scale.
    #[inline]
    pub fn decode(&self, pair: RatePair) -> f64 {
        decode(pair.rate_pos, pair.rate_neg, self.gain)
    }
}

/// Draw the number of spikes one neuron firing at `rate_hz` emits during a
/// `dt_ms` window.
#[inline]
pub fn realize_spikes(rate_hz: f64, dt_ms: f64, rng: &mut Prng) -> u32 {
    rng.poisson(rate_hz * dt_ms / 1000.0)
}

/// Rate estimate from a spike count over a `dt_ms` window.
#[inline]
pub fn count_to_rate(count: u32, dt_ms: f64) -> f64 {
    count as f64 * 1000.0 / dt_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn round_trip_without_baseline() {
        for &scalar in &[0.0, 1.0, -1.0, 0.37, -12.5, 1e-6, 250.0] {
            for &gain in &[0.5, 1.0, 1200.0] {
                let p = encode(scalar, gain, 0.0);
                let back = decode(p.rate_pos, p.rate_neg, gain);
                assert!(
                    (back - scalar).abs() <= 1e-12 * scalar.abs().max(1.0),
                    "{scalar} {gain} -> {back}"
                );
            }
        }
    }

    #[test]
    fn baseline_cancels_in_decode() {
        let codec = RateCodec::new(20.0, 7.5);
        for &scalar in &[-3.0, -0.1, 0.0, 0.1, 3.0] {
            let p = codec.encode(scalar);
            assert!(p.rate_pos >= 7.5 && p.rate_neg >= 7.5);
            assert!((codec.decode(p) - scalar).abs() < EPS);
        }
    }

    #[test]
    fn sign_selects_polarity() {
        let p = encode(2.0, 10.0, 1.0);
        assert_eq!(p, RatePair::new(21.0, 1.0));
        let n = encode(-2.0, 10.0, 1.0);
        assert_eq!(n, RatePair::new(1.0, 21.0));
        assert_eq!(Polarity::of(0.0), Polarity::Positive);
        assert_eq!(Polarity::of(-0.1), Polarity::Negative);
    }

    #[test]
    fn zero_gain_is_constant_baseline() {
        for &scalar in &[-5.0, 0.0, 5.0] {
            assert_eq!(encode(scalar, 0.0, 3.0), RatePair::new(3.0, 3.0));
        }
    }

    #[test]
    fn decode_does_not_clamp() {
        assert!((decode(1.0, 11.0, 2.0) + 5.0).abs() < EPS);
    }

    #[test]
    fn realized_rate_tracks_target() {
        let mut rng = Prng::new(5);
        let dt_ms = 1.0;
        let steps = 20_000;
        let spikes: u64 = (0..steps)
            .map(|_| realize_spikes(150.0, dt_ms, &mut rng) as u64)
            .sum();
        let rate = count_to_rate(spikes as u32, dt_ms * steps as f64);
        assert!((rate - 150.0).abs() < 10.0, "rate {rate}");
    }
}
