use rand::Rng;

use crate::{Balancer, BalanceError, BindingId};

/// Flat penalty applied on top of the proportional demotion. `reduce` is only
/// invoked when an upstream answers 429, so the two are folded together here.
const RATE_LIMIT_PENALTY: i64 = 10;

/// Weighted random selection. Candidates keep their insertion order, which
/// doubles as the tie-break order for the cumulative draw.
pub struct Lottery {
    candidates: Vec<(BindingId, i64)>,
}

impl Lottery {
    pub fn new(candidates: &[(BindingId, i64)]) -> Self {
        Self {
            candidates: candidates.to_vec(),
        }
    }

    #[cfg(test)]
    pub(crate) fn weight_of(&self, id: BindingId) -> Option<i64> {
        self.candidates
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, weight)| *weight)
    }
}

impl Balancer for Lottery {
    fn pop(&mut self) -> Result<BindingId, BalanceError> {
        if self.candidates.is_empty() {
            return Err(BalanceError::Exhausted);
        }
        let total: i64 = self.candidates.iter().map(|(_, weight)| *weight).sum();
        if total <= 0 {
            return Err(BalanceError::Exhausted);
        }

        let mut roll = rand::rng().random_range(0..total);
        for (id, weight) in &self.candidates {
            if roll < *weight {
                return Ok(*id);
            }
            roll -= *weight;
        }
        // Unreachable for positive totals; keep the last candidate as the
        // terminal bucket of the cumulative walk.
        Ok(self.candidates[self.candidates.len() - 1].0)
    }

    fn delete(&mut self, id: BindingId) {
        self.candidates.retain(|(candidate, _)| *candidate != id);
    }

    fn reduce(&mut self, id: BindingId) {
        if let Some((_, weight)) = self
            .candidates
            .iter_mut()
            .find(|(candidate, _)| *candidate == id)
        {
            let demoted = *weight - *weight / 3;
            *weight = (demoted - RATE_LIMIT_PENALTY).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_pool_is_exhausted() {
        let mut lottery = Lottery::new(&[]);
        assert_eq!(lottery.pop(), Err(BalanceError::Exhausted));
    }

    #[test]
    fn zero_total_is_exhausted() {
        let mut lottery = Lottery::new(&[(1, 0), (2, 0)]);
        assert_eq!(lottery.pop(), Err(BalanceError::Exhausted));
    }

    #[test]
    fn draw_tracks_weight_ratio() {
        let mut lottery = Lottery::new(&[(1, 30), (2, 10)]);
        let mut hits: HashMap<BindingId, u32> = HashMap::new();
        for _ in 0..10_000 {
            *hits.entry(lottery.pop().unwrap()).or_default() += 1;
        }
        let heavy = f64::from(hits[&1]);
        let light = f64::from(hits[&2]);
        let share = heavy / (heavy + light);
        assert!((share - 0.75).abs() < 0.03, "heavy share {share}");
    }

    #[test]
    fn delete_excludes_candidate() {
        let mut lottery = Lottery::new(&[(1, 10), (2, 10)]);
        lottery.delete(1);
        for _ in 0..100 {
            assert_eq!(lottery.pop().unwrap(), 2);
        }
    }

    #[test]
    fn reduce_demotes_then_applies_flat_penalty() {
        let mut lottery = Lottery::new(&[(1, 30), (2, 10)]);
        lottery.reduce(1);
        // 30 - 10 = 20, then -10 flat.
        assert_eq!(lottery.weight_of(1), Some(10));
        lottery.reduce(2);
        // 10 - 3 = 7, then the flat penalty clamps at zero.
        assert_eq!(lottery.weight_of(2), Some(0));
    }

    #[test]
    fn fully_demoted_pool_falls_back_to_remaining_weight() {
        let mut lottery = Lottery::new(&[(1, 10), (2, 10)]);
        lottery.reduce(1);
        assert_eq!(lottery.weight_of(1), Some(0));
        for _ in 0..100 {
            assert_eq!(lottery.pop().unwrap(), 2);
        }
        lottery.reduce(2);
        assert_eq!(lottery.pop(), Err(BalanceError::Exhausted));
    }
}
