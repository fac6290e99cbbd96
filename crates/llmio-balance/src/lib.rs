//! Per-request candidate selection over provider bindings.
//!
//! A balancer is exclusively owned by one in-flight request and needs no
//! internal locking. Cross-request failure memory lives in the separate
//! [`BreakerRegistry`], composed around a balancer via [`GuardedBalancer`].

mod breaker;
mod lottery;
mod rotor;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, GuardedBalancer};
pub use lottery::Lottery;
pub use rotor::Rotor;

pub type BindingId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("no candidate available")]
    Exhausted,
}

/// Mutable candidate set consumed by the dispatch loop.
///
/// `pop` selects without removing, `delete` permanently excludes the binding
/// for this request, and `reduce` demotes it in place (it stays selectable).
pub trait Balancer: Send {
    fn pop(&mut self) -> Result<BindingId, BalanceError>;
    fn delete(&mut self, id: BindingId);
    fn reduce(&mut self, id: BindingId);
}

/// Selection strategy configured per logical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Lottery,
    Rotor,
}

impl Strategy {
    pub fn parse(value: &str) -> Self {
        match value {
            "rotor" => Strategy::Rotor,
            _ => Strategy::Lottery,
        }
    }

    pub fn build(self, candidates: &[(BindingId, i64)]) -> Box<dyn Balancer> {
        match self {
            Strategy::Lottery => Box::new(Lottery::new(candidates)),
            Strategy::Rotor => Box::new(Rotor::new(candidates)),
        }
    }
}
