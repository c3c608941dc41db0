//! Selects the alive node with the greatest total difficulty.

use std::sync::Arc;

use alloy_primitives::U256;

use super::{first_or_highest_priority, NodeSelector};
use crate::node::Node;
use crate::rpc::RpcClient;
use crate::types::NodeState;

/// Picks the alive node with the greatest total difficulty. Nodes without a
/// known difficulty only win when no alive node reports one.
pub struct TotalDifficultySelector<R: RpcClient> {
    nodes: Vec<Arc<Node<R>>>,
}

impl<R: RpcClient> TotalDifficultySelector<R> {
    pub fn new(nodes: Vec<Arc<Node<R>>>) -> Self {
        Self { nodes }
    }
}

impl<R: RpcClient> NodeSelector<R> for TotalDifficultySelector<R> {
    fn select(&self) -> Option<Arc<Node<R>>> {
        let mut highest: Option<U256> = None;
        let mut candidates = Vec::new();
        let mut alive = Vec::new();
        for node in &self.nodes {
            let (state, info) = node.state_and_latest();
            if state != NodeState::Alive {
                continue;
            }
            alive.push(Arc::clone(node));
            let Some(td) = info.total_difficulty else {
                continue;
            };
            match highest {
                Some(h) if td < h => continue,
                Some(h) if td == h => {}
                _ => {
                    highest = Some(td);
                    candidates.clear();
                }
            }
            candidates.push(Arc::clone(node));
        }
        if candidates.is_empty() {
            return first_or_highest_priority(&alive);
        }
        first_or_highest_priority(&candidates)
    }

    fn name(&self) -> &'static str {
        "TotalDifficulty"
    }
}
