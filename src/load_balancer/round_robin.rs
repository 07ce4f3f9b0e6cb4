//! Weighted round-robin selection.
//!
//! Interleaves endpoints in proportion to their weight without building an
//! expanded schedule. Every full pass over the endpoints lowers the current
//! weight by the GCD of all weights; an endpoint is picked when its weight is
//! at least the current weight. After `max / gcd` passes the cycle restarts.

use thiserror::Error;

/// Errors returned by endpoint selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The pool has no endpoints at all.
    #[error("no endpoints in the pool")]
    EmptyPool,

    /// Every endpoint has weight zero.
    #[error("all endpoints have zero weight")]
    NoAvailableEndpoints,
}

/// Cursor and weight accumulator for one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedRoundRobin {
    /// Index of the last selected endpoint; `None` before the first pick.
    index: Option<usize>,
    current_weight: u64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return to the initial state (before-first cursor, zero weight).
    pub fn reset(&mut self) {
        self.index = None;
        self.current_weight = 0;
    }

    /// Pick the index of the next endpoint given the pool's weights.
    pub fn next(&mut self, weights: &[u32]) -> Result<usize, SelectError> {
        if weights.is_empty() {
            return Err(SelectError::EmptyPool);
        }

        let gcd = weights.iter().fold(0u64, |acc, &w| gcd(acc, u64::from(w)));
        let max = weights.iter().copied().max().map(u64::from).unwrap_or(0);
        let len = weights.len();

        loop {
            let index = match self.index {
                Some(i) if i + 1 < len => i + 1,
                _ => 0,
            };
            self.index = Some(index);

            if index == 0 {
                self.current_weight = self.current_weight.saturating_sub(gcd);
                if self.current_weight == 0 {
                    self.current_weight = max;
                    if max == 0 {
                        return Err(SelectError::NoAvailableEndpoints);
                    }
                }
            }

            if u64::from(weights[index]) >= self.current_weight {
                return Ok(index);
            }
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn picks(weights: &[u32], n: usize) -> Vec<usize> {
        let mut rr = WeightedRoundRobin::new();
        (0..n).map(|_| rr.next(weights).unwrap()).collect()
    }

    #[test]
    fn test_round_robin_equal_weights() {
        assert_eq!(picks(&[1, 1, 1], 6), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_weighted_interleaving() {
        // weights 3:2 -> a, a, b, a, b
        assert_eq!(picks(&[3, 2], 5), vec![0, 0, 1, 0, 1]);
        assert_eq!(picks(&[3, 2], 10), vec![0, 0, 1, 0, 1, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_gcd_shortens_cycle() {
        // 4:2 behaves like 2:1
        assert_eq!(picks(&[4, 2], 6), vec![0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_zero_weight_endpoint_is_skipped() {
        let seq = picks(&[0, 2], 4);
        assert!(seq.iter().all(|&i| i == 1));
    }

    #[test]
    fn test_empty_and_disabled_pools() {
        let mut rr = WeightedRoundRobin::new();
        assert_eq!(rr.next(&[]), Err(SelectError::EmptyPool));
        assert_eq!(rr.next(&[0, 0]), Err(SelectError::NoAvailableEndpoints));
    }

    #[test]
    fn test_reset_restarts_cycle() {
        let mut rr = WeightedRoundRobin::new();
        assert_eq!(rr.next(&[1, 1]), Ok(0));
        rr.reset();
        assert_eq!(rr, WeightedRoundRobin::new());
        assert_eq!(rr.next(&[1, 1]), Ok(0));
    }

    #[test]
    fn test_cursor_survives_shrinking_pool() {
        let mut rr = WeightedRoundRobin::new();
        for _ in 0..3 {
            rr.next(&[1, 1, 1]).unwrap();
        }
        // cursor at 2, pool shrinks to two without a reset
        assert!(rr.next(&[1, 1]).unwrap() < 2);
    }

    proptest! {
        #[test]
        fn prop_selection_is_proportional_to_weight(
            weights in prop::collection::vec(1u32..8, 1..6),
            n in 1usize..4,
        ) {
            let total: u32 = weights.iter().sum();
            let rounds = n * total as usize;
            let mut counts = vec![0usize; weights.len()];
            for i in picks(&weights, rounds) {
                counts[i] += 1;
            }
            for (i, &w) in weights.iter().enumerate() {
                let expected = n * w as usize;
                prop_assert!(counts[i] + 1 >= expected && counts[i] <= expected + 1,
                    "endpoint {} selected {} times, expected {}", i, counts[i], expected);
            }
        }
    }
}
