use serde::{Deserialize, Serialize};

/// Seedable LCG driving every random choice in a simulation run.
///
/// Same seed, same run, on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Derive an independent stream, e.g. one for faults and one for workload.
    #[must_use]
    pub const fn fork(&self, salt: u64) -> Self {
        Self::new(self.state.rotate_left(17) ^ salt)
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state >> 11
    }

    /// Uniform-ish value in `[0, upper_exclusive)`; zero bound yields zero.
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Index into a collection of `len` items.
    pub fn next_index(&mut self, len: usize) -> usize {
        let bound = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.next_bounded(bound)).unwrap_or(0)
    }

    /// Bernoulli trial with integer percent.
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        match percent {
            0 => false,
            100.. => true,
            p => self.next_bounded(100) < u64::from(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn bounded_stays_in_range() {
        let mut rng = DeterministicRng::new(1);
        for _ in 0..256 {
            assert!(rng.next_bounded(5) < 5);
            assert!(rng.next_index(3) < 3);
        }
        assert_eq!(rng.next_bounded(0), 0);
        assert_eq!(rng.next_index(0), 0);
    }

    #[test]
    fn rate_extremes() {
        let mut rng = DeterministicRng::new(3);
        assert!((0..64).all(|_| !rng.hit_rate_percent(0)));
        assert!((0..64).all(|_| rng.hit_rate_percent(100)));
    }

    #[test]
    fn forks_diverge() {
        let root = DeterministicRng::new(9);
        let mut a = root.fork(1);
        let mut b = root.fork(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    proptest! {
        #[test]
        fn bounded_never_reaches_bound(seed in any::<u64>(), bound in 1_u64..10_000) {
            let mut rng = DeterministicRng::new(seed);
            for _ in 0..16 {
                prop_assert!(rng.next_bounded(bound) < bound);
            }
        }
    }
}
