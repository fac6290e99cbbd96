use std::collections::VecDeque;

use crate::{Balancer, BalanceError, BindingId};

/// Rotation ring. Candidates are ordered by weight descending once, at
/// construction; after that only the rotation order matters and the weights
/// are never consulted again.
pub struct Rotor {
    ring: VecDeque<BindingId>,
}

impl Rotor {
    pub fn new(candidates: &[(BindingId, i64)]) -> Self {
        let mut ordered = candidates.to_vec();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));
        Self {
            ring: ordered.into_iter().map(|(id, _)| id).collect(),
        }
    }
}

impl Balancer for Rotor {
    fn pop(&mut self) -> Result<BindingId, BalanceError> {
        self.ring.front().copied().ok_or(BalanceError::Exhausted)
    }

    fn delete(&mut self, id: BindingId) {
        self.ring.retain(|candidate| *candidate != id);
    }

    fn reduce(&mut self, id: BindingId) {
        if let Some(pos) = self.ring.iter().position(|candidate| *candidate == id) {
            self.ring.remove(pos);
            self.ring.push_back(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_weight_descending() {
        let mut rotor = Rotor::new(&[(1, 5), (2, 20), (3, 10)]);
        assert_eq!(rotor.pop().unwrap(), 2);
        // pop does not advance the ring.
        assert_eq!(rotor.pop().unwrap(), 2);
    }

    #[test]
    fn reduce_rotates_to_back() {
        let mut rotor = Rotor::new(&[(1, 5), (2, 20), (3, 10)]);
        rotor.reduce(2);
        assert_eq!(rotor.pop().unwrap(), 3);
        rotor.reduce(3);
        assert_eq!(rotor.pop().unwrap(), 1);
        rotor.reduce(1);
        assert_eq!(rotor.pop().unwrap(), 2);
    }

    #[test]
    fn delete_empties_to_exhausted() {
        let mut rotor = Rotor::new(&[(1, 5), (2, 20)]);
        rotor.delete(2);
        assert_eq!(rotor.pop().unwrap(), 1);
        rotor.delete(1);
        assert_eq!(rotor.pop(), Err(BalanceError::Exhausted));
    }
}
