//! Primary node: one RPC endpoint driven by a lifecycle state machine.
//!
//! A node owns exactly one lifecycle task at a time. Each state has its own
//! loop (`alive_loop`, `out_of_sync_loop`, `unreachable_loop`,
//! `invalid_chain_id_loop`); a loop leaves by declaring the next state, which
//! spawns the next loop while the state lock is held.

mod fsm;
mod lifecycle;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use alloy_primitives::U256;
use parking_lot::RwLock;

use crate::config::{ChainConfig, NodePoolConfig};
use crate::error::NodeError;
use crate::metrics::metrics;
use crate::rpc::RpcClient;
use crate::task::{StopSignal, TaskGroup};
use crate::types::{ChainInfo, NodeState, SelectionMode};

pub(crate) const MSG_CANNOT_DISABLE: &str = "but cannot disable this connection because there are no other RPC endpoints, or all other RPC endpoints are dead.";
pub(crate) const MSG_DEGRADED_STATE: &str = "The node pool is now operating in a degraded state and urgent action is required to resolve the issue";

/// Pool-wide view a node consults before leaving the live set.
pub trait PoolInfoProvider: Send + Sync {
    /// Number of alive primary nodes and the best chain state among them.
    fn latest_chain_info(&self) -> (usize, ChainInfo);

    /// Highest chain state ever observed by any primary node.
    fn highest_user_observations(&self) -> ChainInfo;
}

struct NodeInner {
    state: NodeState,
    /// Most recent head and finalized head received.
    latest: ChainInfo,
    /// Maxima over everything ever received.
    highest: ChainInfo,
}

/// A managed connection to one RPC endpoint.
pub struct Node<R: RpcClient> {
    name: String,
    display: String,
    order: i32,
    chain_id: R::ChainId,
    chain_id_str: String,
    node_config: Arc<NodePoolConfig>,
    chain_config: Arc<ChainConfig>,
    rpc: Arc<R>,
    inner: RwLock<NodeInner>,
    pool_info: RwLock<Option<Weak<dyn PoolInfoProvider>>>,
    tasks: TaskGroup,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<R: RpcClient> Node<R> {
    /// Build a node in the `Undialed` state. Lower `order` means higher priority.
    pub fn new(
        node_config: Arc<NodePoolConfig>,
        chain_config: Arc<ChainConfig>,
        name: impl Into<String>,
        order: i32,
        chain_id: R::ChainId,
        rpc: Arc<R>,
    ) -> Arc<Self> {
        let name = name.into();
        let display = format!("(primary){}:{}", name, rpc.url());
        Arc::new(Self {
            display,
            name,
            order,
            chain_id_str: chain_id.to_string(),
            chain_id,
            node_config,
            chain_config,
            rpc,
            inner: RwLock::new(NodeInner {
                state: NodeState::Undialed,
                latest: ChainInfo::default(),
                highest: ChainInfo::default(),
            }),
            pool_info: RwLock::new(None),
            tasks: TaskGroup::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Chain ID this node is configured for.
    pub fn configured_chain_id(&self) -> &R::ChainId {
        &self.chain_id
    }

    pub fn rpc(&self) -> &Arc<R> {
        &self.rpc
    }

    pub fn state(&self) -> NodeState {
        self.inner.read().state
    }

    /// Current state together with the latest observed chain info.
    pub fn state_and_latest(&self) -> (NodeState, ChainInfo) {
        let inner = self.inner.read();
        (inner.state, inner.latest.clone())
    }

    /// Highest chain info ever observed, regardless of current state.
    pub fn highest_user_observations(&self) -> ChainInfo {
        self.inner.read().highest.clone()
    }

    pub fn subscribers_count(&self) -> usize {
        self.rpc.subscribers_count()
    }

    pub fn unsubscribe_all_except_alive_loop(&self) {
        self.rpc.unsubscribe_all_except_alive_loop();
    }

    pub fn set_pool_info_provider(&self, provider: Weak<dyn PoolInfoProvider>) {
        *self.pool_info.write() = Some(provider);
    }

    /// Dial and verify the endpoint, then hand over to the lifecycle loop
    /// matching the outcome. Connectivity failures never surface here.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted { node: self.display.clone() });
        }
        match self.state() {
            NodeState::Closed => return Ok(()),
            NodeState::Undialed => {}
            other => panic!("cannot start node in state {other}"),
        }
        tracing::debug!(node = %self, "Starting RPC node");

        let mut stop = self.tasks.stop_signal();
        match stop.guard(self.rpc.dial()).await {
            None => return Ok(()),
            Some(Err(e)) => {
                tracing::error!(node = %self, error = %e, "Dial failed: Node is unreachable");
                self.declare_unreachable();
                return Ok(());
            }
            Some(Ok(())) => {}
        }
        if !self.set_state(NodeState::Dialed) {
            return Ok(());
        }
        let state = self.verify_chain_id(&mut stop).await;
        self.declare_state(state);
        Ok(())
    }

    /// Stop the lifecycle task, force `Closed` and release the RPC client.
    /// Subsequent calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut inner = self.inner.write();
            self.tasks.stop();
            inner.state = NodeState::Closed;
        }
        self.tasks.wait().await;
        self.rpc.close();
        tracing::debug!(node = %self, "RPC node closed");
    }

    // ─── Internal state helpers ──────────────────────────────────────────────

    /// Set the state outside the transition table. Refuses to leave `Closed`.
    fn set_state(&self, state: NodeState) -> bool {
        let mut inner = self.inner.write();
        if inner.state == NodeState::Closed {
            return false;
        }
        inner.state = state;
        true
    }

    fn stop_signal(&self) -> StopSignal {
        self.tasks.stop_signal()
    }

    fn set_latest_received(&self, block_number: i64, total_difficulty: Option<U256>) {
        let mut inner = self.inner.write();
        inner.latest.block_number = block_number;
        inner.latest.total_difficulty = total_difficulty;
        inner.highest.block_number = inner.highest.block_number.max(block_number);
        inner.highest.set_total_difficulty_if_greater(total_difficulty);
    }

    fn set_latest_finalized(&self, block_number: i64) {
        let mut inner = self.inner.write();
        inner.latest.finalized_block_number = block_number;
        inner.highest.finalized_block_number =
            inner.highest.finalized_block_number.max(block_number);
    }

    fn pool_info(&self) -> Option<Arc<dyn PoolInfoProvider>> {
        self.pool_info.read().as_ref().and_then(Weak::upgrade)
    }

    /// Number of alive primaries, or `None` when no pool is attached.
    fn live_nodes(&self) -> Option<usize> {
        self.pool_info().map(|p| p.latest_chain_info().0)
    }

    /// Whether this node lags the pool by more than the sync threshold, and
    /// how many nodes are alive. Without a pool or threshold it is in sync.
    fn sync_status(&self, block_number: i64, total_difficulty: Option<U256>) -> (bool, usize) {
        let Some(pool) = self.pool_info() else {
            return (false, 0);
        };
        let threshold = self.node_config.sync_threshold;
        if threshold == 0 {
            return (false, 0);
        }
        let (live_nodes, best) = pool.latest_chain_info();
        let out_of_sync = match self.node_config.selection_mode {
            SelectionMode::HighestHead | SelectionMode::RoundRobin | SelectionMode::PriorityLevel => {
                block_number < best.block_number - i64::from(threshold)
            }
            SelectionMode::TotalDifficulty => match (total_difficulty, best.total_difficulty) {
                (Some(td), Some(greatest)) => {
                    td < greatest.saturating_sub(U256::from(threshold))
                }
                _ => false,
            },
        };
        (out_of_sync, live_nodes)
    }

    fn record_transition(&self, to: NodeState) {
        metrics().record_transition(&self.chain_id_str, &self.name, to);
    }
}

impl<R: RpcClient> fmt::Display for Node<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl<R: RpcClient> fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
impl<R: RpcClient> Node<R> {
    pub(crate) fn force_state(&self, state: NodeState) {
        self.inner.write().state = state;
    }

    pub(crate) fn force_latest(&self, block_number: i64, total_difficulty: Option<U256>) {
        self.set_latest_received(block_number, total_difficulty);
    }

    pub(crate) fn force_finalized(&self, block_number: i64) {
        self.set_latest_finalized(block_number);
    }
}

/// Predicate a node uses while out of sync to decide it caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutOfSyncCheck {
    /// Compare against the pool's best chain state.
    BehindPool,
    /// Behind while the received block is below this number.
    BelowBlock(i64),
}

impl<R: RpcClient> Node<R> {
    fn is_out_of_sync(&self, check: OutOfSyncCheck, block_number: i64, td: Option<U256>) -> bool {
        match check {
            OutOfSyncCheck::BehindPool => self.sync_status(block_number, td).0,
            OutOfSyncCheck::BelowBlock(highest) => block_number < highest,
        }
    }
}
