//! Selects the alive node with the highest observed block number.

use std::sync::Arc;

use super::{first_or_highest_priority, NodeSelector};
use crate::node::Node;
use crate::rpc::RpcClient;
use crate::types::NodeState;

/// Picks the alive node with the highest block number.
pub struct HighestHeadSelector<R: RpcClient> {
    nodes: Vec<Arc<Node<R>>>,
}

impl<R: RpcClient> HighestHeadSelector<R> {
    pub fn new(nodes: Vec<Arc<Node<R>>>) -> Self {
        Self { nodes }
    }
}

impl<R: RpcClient> NodeSelector<R> for HighestHeadSelector<R> {
    fn select(&self) -> Option<Arc<Node<R>>> {
        let mut highest = i64::MIN;
        let mut candidates = Vec::new();
        for node in &self.nodes {
            let (state, info) = node.state_and_latest();
            if state != NodeState::Alive || info.block_number < highest {
                continue;
            }
            if info.block_number > highest {
                highest = info.block_number;
                candidates.clear();
            }
            candidates.push(Arc::clone(node));
        }
        first_or_highest_priority(&candidates)
    }

    fn name(&self) -> &'static str {
        "HighestHead"
    }
}
