//! Strategies for picking the pool's active node.
//!
//! Every selector only considers nodes that are currently `Alive` and
//! returns `None` when there are none. Ties are broken by `order`: the
//! lowest value wins, and the first such node in pool order among equals.

mod highest_head;
mod priority_level;
mod round_robin;
mod total_difficulty;

use std::sync::Arc;

pub use highest_head::HighestHeadSelector;
pub use priority_level::PriorityLevelSelector;
pub use round_robin::RoundRobinSelector;
pub use total_difficulty::TotalDifficultySelector;

use crate::node::Node;
use crate::rpc::RpcClient;
use crate::types::SelectionMode;

/// Chooses one node among the alive ones.
pub trait NodeSelector<R: RpcClient>: Send + Sync {
    fn select(&self) -> Option<Arc<Node<R>>>;

    /// Selection mode name, for logs.
    fn name(&self) -> &'static str;
}

/// Build the selector for `mode` over `nodes`.
pub fn new_node_selector<R: RpcClient>(
    mode: SelectionMode,
    nodes: Vec<Arc<Node<R>>>,
) -> Box<dyn NodeSelector<R>> {
    match mode {
        SelectionMode::HighestHead => Box::new(HighestHeadSelector::new(nodes)),
        SelectionMode::RoundRobin => Box::new(RoundRobinSelector::new(nodes)),
        SelectionMode::TotalDifficulty => Box::new(TotalDifficultySelector::new(nodes)),
        SelectionMode::PriorityLevel => Box::new(PriorityLevelSelector::new(nodes)),
    }
}

/// The node with the lowest `order`; the earliest one on ties.
fn first_or_highest_priority<R: RpcClient>(nodes: &[Arc<Node<R>>]) -> Option<Arc<Node<R>>> {
    let mut best: Option<&Arc<Node<R>>> = None;
    for node in nodes {
        if best.map_or(true, |b| node.order() < b.order()) {
            best = Some(node);
        }
    }
    best.cloned()
}
