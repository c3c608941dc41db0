//! Cycles through the alive nodes in turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::NodeSelector;
use crate::node::Node;
use crate::rpc::RpcClient;
use crate::types::NodeState;

/// Cycles through the alive nodes with a shared counter.
pub struct RoundRobinSelector<R: RpcClient> {
    nodes: Vec<Arc<Node<R>>>,
    cursor: AtomicU64,
}

impl<R: RpcClient> RoundRobinSelector<R> {
    pub fn new(nodes: Vec<Arc<Node<R>>>) -> Self {
        Self { nodes, cursor: AtomicU64::new(0) }
    }
}

impl<R: RpcClient> NodeSelector<R> for RoundRobinSelector<R> {
    fn select(&self) -> Option<Arc<Node<R>>> {
        let alive: Vec<&Arc<Node<R>>> = self
            .nodes
            .iter()
            .filter(|n| n.state() == NodeState::Alive)
            .collect();
        if alive.is_empty() {
            return None;
        }
        let count = self.cursor.fetch_add(1, Ordering::Relaxed);
        let idx = (count % alive.len() as u64) as usize;
        Some(Arc::clone(alive[idx]))
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}
