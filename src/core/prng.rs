// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives Poisson spike realization and trial-id suffixes; every stochastic
// collaborator is seeded from the run configuration so a trial is reproducible.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0,1) with 53 bits of precision.
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64;
        low + (self.next_u64() % span) as usize
    }

    /// Poisson-distributed count with mean `lambda`.
    ///
    /// Knuth's product method below 30, normal approximation above.
    pub fn poisson(&mut self, lambda: f64) -> u32 {
        if !(lambda > 0.0) {
            return 0;
        }
        if lambda < 30.0 {
            let limit = (-lambda).exp();
            let mut k = 0u32;
            let mut p = self.next_f64_01();
            while p > limit {
                k += 1;
                p *= self.next_f64_01();
            }
            k
        } else {
            // Box-Muller
            let u1 = self.next_f64_01().max(f64::MIN_POSITIVE);
            let u2 = self.next_f64_01();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            (lambda + z * lambda.sqrt()).round().max(0.0) as u32
        }
    }

    /// Lowercase alphanumeric string of length `len`.
    pub fn alnum(&mut self, len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        (0..len)
            .map(|_| ALPHABET[self.gen_range_usize(0, ALPHABET.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn poisson_mean_is_close() {
        let mut rng = Prng::new(42);
        let n = 20_000;
        let total: u64 = (0..n).map(|_| rng.poisson(2.5) as u64).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 2.5).abs() < 0.1, "mean was {mean}");
    }

    #[test]
    fn poisson_of_zero_rate_is_silent() {
        let mut rng = Prng::new(3);
        assert_eq!(rng.poisson(0.0), 0);
        assert_eq!(rng.poisson(-1.0), 0);
        assert_eq!(rng.poisson(f64::NAN), 0);
    }

    #[test]
    fn alnum_uses_alphabet() {
        let mut rng = Prng::new(9);
        let s = rng.alnum(64);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
