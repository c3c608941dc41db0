//! Round robin within the highest-priority tier of alive nodes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::NodeSelector;
use crate::node::Node;
use crate::rpc::RpcClient;
use crate::types::NodeState;

/// Round-robins within the highest-priority (lowest `order`) alive tier.
/// Each tier keeps its own counter.
pub struct PriorityLevelSelector<R: RpcClient> {
    nodes: Vec<Arc<Node<R>>>,
    counters: Mutex<HashMap<i32, u64>>,
}

impl<R: RpcClient> PriorityLevelSelector<R> {
    pub fn new(nodes: Vec<Arc<Node<R>>>) -> Self {
        Self { nodes, counters: Mutex::new(HashMap::new()) }
    }

    fn highest_priority_alive_tier(&self) -> Vec<&Arc<Node<R>>> {
        let alive: Vec<&Arc<Node<R>>> = self
            .nodes
            .iter()
            .filter(|n| n.state() == NodeState::Alive)
            .collect();
        let Some(top) = alive.iter().map(|n| n.order()).min() else {
            return Vec::new();
        };
        alive.into_iter().filter(|n| n.order() == top).collect()
    }
}

impl<R: RpcClient> NodeSelector<R> for PriorityLevelSelector<R> {
    fn select(&self) -> Option<Arc<Node<R>>> {
        let tier = self.highest_priority_alive_tier();
        let level = tier.first()?.order();
        let count = {
            let mut counters = self.counters.lock();
            let counter = counters.entry(level).or_insert(0);
            let current = *counter;
            *counter = counter.wrapping_add(1);
            current
        };
        let idx = (count % tier.len() as u64) as usize;
        Some(Arc::clone(tier[idx]))
    }

    fn name(&self) -> &'static str {
        "PriorityLevel"
    }
}
