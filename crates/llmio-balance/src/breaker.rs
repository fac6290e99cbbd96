use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{Balancer, BalanceError, BindingId};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive hard failures that trip a binding open.
    pub max_failures: u32,
    /// How long an open binding stays invisible before a half-open probe.
    pub sleep_window: Duration,
    /// Successful probes required to close a half-open binding.
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            sleep_window: Duration::from_secs(60),
            half_open_max: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerNode {
    state: BreakerState,
    fail_count: u32,
    success_count: u32,
    expiry: Instant,
}

impl BreakerNode {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            fail_count: 0,
            success_count: 0,
            expiry: Instant::now(),
        }
    }
}

/// Process-wide failure memory, one node per binding. Nodes are created
/// lazily on first admission check and live until process restart.
///
/// All transitions serialize through one mutex; the critical sections touch a
/// small map only, never request bodies.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    nodes: Mutex<HashMap<BindingId, BreakerNode>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the binding may be offered to the dispatch loop. An expired
    /// open node transitions to half-open and is admitted as a probe.
    pub fn admit(&self, id: BindingId) -> bool {
        let Ok(mut nodes) = self.nodes.lock() else {
            return true;
        };
        let node = nodes.entry(id).or_insert_with(BreakerNode::new);
        match node.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if Instant::now() >= node.expiry {
                    node.state = BreakerState::HalfOpen;
                    node.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self, id: BindingId) {
        let Ok(mut nodes) = self.nodes.lock() else {
            return;
        };
        let node = nodes.entry(id).or_insert_with(BreakerNode::new);
        match node.state {
            BreakerState::Closed => {
                node.fail_count += 1;
                if node.fail_count >= self.config.max_failures {
                    Self::trip(node, self.config.sleep_window);
                }
            }
            BreakerState::HalfOpen => Self::trip(node, self.config.sleep_window),
            BreakerState::Open => {}
        }
    }

    pub fn record_success(&self, id: BindingId) {
        let Ok(mut nodes) = self.nodes.lock() else {
            return;
        };
        let node = nodes.entry(id).or_insert_with(BreakerNode::new);
        match node.state {
            BreakerState::Closed => node.fail_count = 0,
            BreakerState::HalfOpen => {
                node.success_count += 1;
                if node.success_count >= self.config.half_open_max {
                    node.state = BreakerState::Closed;
                    node.fail_count = 0;
                    node.success_count = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self, id: BindingId) -> Option<BreakerState> {
        self.nodes
            .lock()
            .ok()
            .and_then(|nodes| nodes.get(&id).map(|node| node.state))
    }

    fn trip(node: &mut BreakerNode, sleep_window: Duration) {
        node.state = BreakerState::Open;
        node.expiry = Instant::now() + sleep_window;
        node.fail_count = 0;
        node.success_count = 0;
    }
}

/// Composes a per-request balancer with the shared breaker registry. Open
/// bindings are evicted from the inner balancer at pop time, so the inner
/// strategy only ever sees bindings believed healthy or probing.
pub struct GuardedBalancer {
    inner: Box<dyn Balancer>,
    registry: Arc<BreakerRegistry>,
}

impl GuardedBalancer {
    pub fn new(inner: Box<dyn Balancer>, registry: Arc<BreakerRegistry>) -> Self {
        Self { inner, registry }
    }
}

impl Balancer for GuardedBalancer {
    fn pop(&mut self) -> Result<BindingId, BalanceError> {
        loop {
            let id = self.inner.pop()?;
            if self.registry.admit(id) {
                return Ok(id);
            }
            self.inner.delete(id);
        }
    }

    fn delete(&mut self, id: BindingId) {
        self.registry.record_failure(id);
        self.inner.delete(id);
    }

    // Rate-limit demotion is soft and does not count against the breaker.
    fn reduce(&mut self, id: BindingId) {
        self.inner.reduce(id);
    }
}
