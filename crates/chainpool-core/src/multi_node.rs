//! Pool orchestrator: owns the primary and send-only nodes of one chain and
//! hands out the currently best RPC client.
//!
//! Nodes manage their own reconnection once started. The pool only reads
//! their state, picks an active node through a [`NodeSelector`], and runs two
//! background loops: a periodic state report and, when configured, a lease
//! check that moves the active node to the best one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::{interval_at, Instant};

use crate::config::NodePoolConfig;
use crate::error::MultiNodeError;
use crate::health::HealthErrors;
use crate::metrics::metrics;
use crate::node::{Node, PoolInfoProvider};
use crate::policy::with_jitter;
use crate::rpc::RpcClient;
use crate::selector::{new_node_selector, NodeSelector};
use crate::send_only::SendOnlyNode;
use crate::task::TaskGroup;
use crate::types::{ChainInfo, NodeState, SelectionMode};

/// Fault-tolerant pool over the RPC endpoints of a single chain.
pub struct MultiNode<R: RpcClient> {
    chain_id: R::ChainId,
    chain_id_str: String,
    node_config: Arc<NodePoolConfig>,
    nodes: Vec<Arc<Node<R>>>,
    send_onlys: Vec<Arc<SendOnlyNode<R>>>,
    selector: Box<dyn NodeSelector<R>>,
    active: RwLock<Option<Arc<Node<R>>>>,
    health: HealthErrors,
    tasks: TaskGroup,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<R: RpcClient> MultiNode<R> {
    /// Build a pool using the selector named by `node_config.selection_mode`.
    pub fn new(
        node_config: Arc<NodePoolConfig>,
        chain_id: R::ChainId,
        nodes: Vec<Arc<Node<R>>>,
        send_onlys: Vec<Arc<SendOnlyNode<R>>>,
    ) -> Arc<Self> {
        let selector = new_node_selector(node_config.selection_mode, nodes.clone());
        Self::with_selector(node_config, chain_id, nodes, send_onlys, selector)
    }

    /// Build a pool with a caller-supplied selection strategy.
    pub fn with_selector(
        node_config: Arc<NodePoolConfig>,
        chain_id: R::ChainId,
        nodes: Vec<Arc<Node<R>>>,
        send_onlys: Vec<Arc<SendOnlyNode<R>>>,
        selector: Box<dyn NodeSelector<R>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain_id_str: chain_id.to_string(),
            chain_id,
            node_config,
            nodes,
            send_onlys,
            selector,
            active: RwLock::new(None),
            health: HealthErrors::new(),
            tasks: TaskGroup::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn chain_id(&self) -> &R::ChainId {
        &self.chain_id
    }

    pub fn primary_nodes(&self) -> &[Arc<Node<R>>] {
        &self.nodes
    }

    pub fn send_only_nodes(&self) -> &[Arc<SendOnlyNode<R>>] {
        &self.send_onlys
    }

    /// Verify every node's chain ID and start them all, then launch the
    /// background loops. Any failure closes the nodes started so far.
    pub async fn start(self: &Arc<Self>) -> Result<(), MultiNodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MultiNodeError::AlreadyStarted);
        }
        self.node_config.validate()?;
        if self.nodes.is_empty() {
            return Err(MultiNodeError::NoNodes {
                chain_id: self.chain_id_str.clone(),
            });
        }

        let provider: Arc<dyn PoolInfoProvider> = Arc::clone(self) as Arc<dyn PoolInfoProvider>;
        let provider = Arc::downgrade(&provider);

        let mut started_nodes: Vec<&Arc<Node<R>>> = Vec::new();
        let mut started_send_onlys: Vec<&Arc<SendOnlyNode<R>>> = Vec::new();
        let result = async {
            for node in &self.nodes {
                if *node.configured_chain_id() != self.chain_id {
                    return Err(MultiNodeError::ChainIdMismatch {
                        node: node.to_string(),
                        node_chain_id: node.configured_chain_id().to_string(),
                        chain_id: self.chain_id_str.clone(),
                    });
                }
                node.set_pool_info_provider(provider.clone());
                started_nodes.push(node);
                node.start().await?;
            }
            for node in &self.send_onlys {
                if *node.configured_chain_id() != self.chain_id {
                    return Err(MultiNodeError::SendOnlyChainIdMismatch {
                        node: node.to_string(),
                        node_chain_id: node.configured_chain_id().to_string(),
                        chain_id: self.chain_id_str.clone(),
                    });
                }
                started_send_onlys.push(node);
                node.start().await?;
            }
            Ok::<(), MultiNodeError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(chain_id = %self.chain_id_str, error = %e, "MultiNode failed to start");
            join_all(started_nodes.iter().map(|n| n.close())).await;
            join_all(started_send_onlys.iter().map(|n| n.close())).await;
            self.closed.store(true, Ordering::SeqCst);
            self.tasks.stop();
            return Err(e);
        }

        let pool = Arc::clone(self);
        self.tasks.spawn(async move { pool.report_loop().await });

        let lease = self.node_config.lease_duration;
        if !lease.is_zero() && self.node_config.selection_mode != SelectionMode::RoundRobin {
            tracing::info!(
                chain_id = %self.chain_id_str,
                "The MultiNode will switch to best node every {:?}",
                lease
            );
            let pool = Arc::clone(self);
            self.tasks.spawn(async move { pool.lease_loop().await });
        } else {
            tracing::info!(chain_id = %self.chain_id_str, "Best node switching is disabled");
        }
        Ok(())
    }

    /// Stop the background loops and close every node. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tasks.stop();
        self.tasks.wait().await;
        join_all(self.nodes.iter().map(|n| n.close())).await;
        join_all(self.send_onlys.iter().map(|n| n.close())).await;
    }

    /// Drain the critical errors recorded since the last call.
    pub fn healthy(&self) -> Result<(), MultiNodeError> {
        let errors = self.health.drain();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MultiNodeError::Unhealthy(errors))
        }
    }

    /// RPC client of the active node.
    pub fn select_rpc(&self) -> Result<Arc<R>, MultiNodeError> {
        self.select_node().map(|n| Arc::clone(n.rpc()))
    }

    fn select_node(&self) -> Result<Arc<Node<R>>, MultiNodeError> {
        if let Some(node) = self.active.read().as_ref() {
            if node.state() == NodeState::Alive {
                return Ok(Arc::clone(node));
            }
        }

        let mut active = self.active.write();
        if let Some(node) = active.as_ref() {
            if node.state() == NodeState::Alive {
                return Ok(Arc::clone(node));
            }
            node.unsubscribe_all_except_alive_loop();
        }

        *active = self.selector.select();
        match active.as_ref() {
            Some(node) => Ok(Arc::clone(node)),
            None => {
                tracing::error!(
                    critical = true,
                    chain_id = %self.chain_id_str,
                    selection_mode = self.selector.name(),
                    "No live RPC nodes available"
                );
                self.health
                    .push(format!("no live nodes available for chain {}", self.chain_id_str));
                Err(MultiNodeError::NoLiveNodes)
            }
        }
    }

    /// Call `f` with every alive primary's client, then every alive send-only
    /// client. Fails when no primary was called.
    pub fn do_all(&self, mut f: impl FnMut(&Arc<R>, bool)) -> Result<(), MultiNodeError> {
        let mut calls = 0usize;
        for node in &self.nodes {
            if self.closed.load(Ordering::SeqCst) {
                return Err(MultiNodeError::Stopped);
            }
            if node.state() != NodeState::Alive {
                continue;
            }
            f(node.rpc(), false);
            calls += 1;
        }
        // send-only nodes still help propagation when no primary is alive
        for node in &self.send_onlys {
            if self.closed.load(Ordering::SeqCst) {
                return Err(MultiNodeError::Stopped);
            }
            if node.state() != NodeState::Alive {
                continue;
            }
            f(node.rpc(), true);
        }
        if calls == 0 {
            return Err(MultiNodeError::NoLiveNodes);
        }
        Ok(())
    }

    /// Name → state of every primary and send-only node.
    pub fn node_states(&self) -> HashMap<String, String> {
        let primaries = self
            .nodes
            .iter()
            .map(|n| (n.name().to_string(), n.state().to_string()));
        let send_onlys = self
            .send_onlys
            .iter()
            .map(|n| (n.name().to_string(), n.state().to_string()));
        primaries.chain(send_onlys).collect()
    }

    // ─── Lease ───────────────────────────────────────────────────────────────

    async fn lease_loop(self: Arc<Self>) {
        let mut stop = self.tasks.stop_signal();
        let period = self.node_config.lease_duration;
        let mut ticker = interval_at(Instant::now() + period, period);
        while stop.guard(ticker.tick()).await.is_some() {
            self.check_lease();
        }
    }

    /// Make the selector's current choice the active node, dropping client
    /// subscriptions held on other alive nodes so consumers reconnect to it.
    pub fn check_lease(&self) {
        let best = self.selector.select();
        if let Some(best) = best.as_ref() {
            for node in &self.nodes {
                if node.state() == NodeState::Alive
                    && !Arc::ptr_eq(node, best)
                    && node.subscribers_count() > 1
                {
                    tracing::info!(
                        chain_id = %self.chain_id_str,
                        "Switching to best node from {} to {}",
                        node,
                        best
                    );
                    node.unsubscribe_all_except_alive_loop();
                }
            }
        }

        let mut active = self.active.write();
        let changed = match (active.as_ref(), best.as_ref()) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if changed {
            if let Some(previous) = active.as_ref() {
                previous.unsubscribe_all_except_alive_loop();
            }
            *active = best;
        }
    }

    // ─── Reporting ───────────────────────────────────────────────────────────

    async fn report_loop(self: Arc<Self>) {
        let mut stop = self.tasks.stop_signal();
        let mut dead_since: Vec<Option<Instant>> = vec![None; self.nodes.len()];
        self.report(&mut dead_since);

        let period = with_jitter(self.node_config.report_interval);
        let mut ticker = interval_at(Instant::now() + period, period);
        while stop.guard(ticker.tick()).await.is_some() {
            self.report(&mut dead_since);
        }
    }

    fn report(&self, dead_since: &mut [Option<Instant>]) {
        let now = Instant::now();
        let total = self.nodes.len();
        let mut dead = 0usize;
        let mut counts: HashMap<NodeState, u64> = HashMap::new();
        for (node, since) in self.nodes.iter().zip(dead_since.iter_mut()) {
            let state = node.state();
            *counts.entry(state).or_default() += 1;
            if state == NodeState::Alive {
                *since = None;
                continue;
            }
            let since = since.get_or_insert(now);
            if now.duration_since(*since) >= self.node_config.death_declaration_delay {
                dead += 1;
            }
        }
        for state in NodeState::ALL {
            let count = counts.get(&state).copied().unwrap_or(0);
            metrics().record_node_states(&self.chain_id_str, state, count);
        }

        let live = total - dead;
        tracing::trace!(chain_id = %self.chain_id_str, "MultiNode state: {}/{} nodes are alive", live, total);
        if dead == total {
            let msg = format!("no primary nodes available: 0/{} nodes are alive", total);
            tracing::error!(critical = true, chain_id = %self.chain_id_str, "{}", msg);
            self.health.push(msg);
        } else if dead > 0 {
            tracing::error!(
                chain_id = %self.chain_id_str,
                "At least one primary node is dead: {}/{} nodes are alive",
                live,
                total
            );
        }
    }
}

impl<R: RpcClient> PoolInfoProvider for MultiNode<R> {
    /// Alive primaries and the maxima of their latest chain info.
    fn latest_chain_info(&self) -> (usize, ChainInfo) {
        let mut live = 0;
        let mut info = ChainInfo {
            total_difficulty: Some(Default::default()),
            ..ChainInfo::default()
        };
        for node in &self.nodes {
            let (state, latest) = node.state_and_latest();
            if state == NodeState::Alive {
                live += 1;
                info.merge_max(&latest);
            }
        }
        (live, info)
    }

    /// Maxima of the highest chain info ever seen by any primary.
    fn highest_user_observations(&self) -> ChainInfo {
        let mut info = ChainInfo {
            total_difficulty: Some(Default::default()),
            ..ChainInfo::default()
        };
        for node in &self.nodes {
            info.merge_max(&node.highest_user_observations());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use alloy_primitives::U256;
    use tracing_test::traced_test;

    use super::*;
    use crate::error::RpcError;
    use crate::testutil::{eventually, mock_node, node_in_state, MockRpc};

    struct FixedSelector {
        node: Option<Arc<Node<MockRpc>>>,
        calls: Arc<AtomicUsize>,
    }

    impl NodeSelector<MockRpc> for FixedSelector {
        fn select(&self) -> Option<Arc<Node<MockRpc>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.node.clone()
        }

        fn name(&self) -> &'static str {
            "Fixed"
        }
    }

    /// Delegates to the real selector and counts the calls.
    struct CountingSelector {
        inner: Box<dyn NodeSelector<MockRpc>>,
        calls: Arc<AtomicUsize>,
    }

    impl NodeSelector<MockRpc> for CountingSelector {
        fn select(&self) -> Option<Arc<Node<MockRpc>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.select()
        }

        fn name(&self) -> &'static str {
            self.inner.name()
        }
    }

    fn pool_config(mode: SelectionMode) -> Arc<NodePoolConfig> {
        Arc::new(NodePoolConfig {
            selection_mode: mode,
            ..NodePoolConfig::default()
        })
    }

    #[tokio::test]
    async fn start_without_nodes_fails() {
        let pool: Arc<MultiNode<MockRpc>> =
            MultiNode::new(pool_config(SelectionMode::HighestHead), 10, vec![], vec![]);
        let err = pool.start().await.unwrap_err();
        assert_eq!(err.to_string(), "no available nodes for chain 10");
    }

    #[tokio::test]
    async fn chain_id_mismatch_rolls_back_started_nodes() {
        let rpc_a = MockRpc::new("ws://a");
        rpc_a.set_chain_id(Ok(10));
        let rpc_b = MockRpc::new("ws://b");
        let a = mock_node(rpc_a.clone(), 10, "a", 0);
        let b = mock_node(rpc_b.clone(), 11, "b", 1);
        let pool = MultiNode::new(
            pool_config(SelectionMode::HighestHead),
            10,
            vec![a.clone(), b.clone()],
            vec![],
        );

        let err = pool.start().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "node (primary)b:ws://b has configured chain ID 11 which does not match multinode configured chain ID of 10"
        );
        assert_eq!(a.state(), NodeState::Closed);
        assert_eq!(rpc_a.closes(), 1);
        assert_eq!(b.state(), NodeState::Undialed);
        assert_eq!(rpc_b.dials(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn send_only_chain_id_mismatch_rolls_back() {
        let rpc_a = MockRpc::new("ws://a");
        rpc_a.set_chain_id(Ok(10));
        let a = mock_node(rpc_a.clone(), 10, "a", 0);
        let s = SendOnlyNode::new("s", 12u64, MockRpc::new("http://s"));
        let pool = MultiNode::new(pool_config(SelectionMode::HighestHead), 10, vec![a.clone()], vec![s]);

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, MultiNodeError::SendOnlyChainIdMismatch { .. }));
        assert!(err.to_string().starts_with("sendonly node (sendonly)s:http://s"));
        assert_eq!(a.state(), NodeState::Closed);
    }

    #[tokio::test]
    #[traced_test]
    async fn round_robin_disables_lease() {
        let a = mock_node(MockRpc::new("ws://a"), 1, "a", 0);
        let config = Arc::new(NodePoolConfig {
            selection_mode: SelectionMode::RoundRobin,
            lease_duration: Duration::from_secs(1),
            ..NodePoolConfig::default()
        });
        let pool = MultiNode::new(config, 1, vec![a], vec![]);
        pool.start().await.unwrap();
        assert!(logs_contain("Best node switching is disabled"));
        assert!(matches!(pool.start().await, Err(MultiNodeError::AlreadyStarted)));
        pool.close().await;
    }

    #[tokio::test]
    async fn select_reuses_alive_active_node() {
        let a = node_in_state("a", 0, NodeState::Alive, 10, None);
        let b = node_in_state("b", 1, NodeState::Alive, 10, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = CountingSelector {
            inner: new_node_selector(SelectionMode::HighestHead, vec![a.clone(), b.clone()]),
            calls: calls.clone(),
        };
        let pool = MultiNode::with_selector(
            pool_config(SelectionMode::HighestHead),
            1,
            vec![a.clone(), b.clone()],
            vec![],
            Box::new(selector),
        );

        let first = pool.select_rpc().unwrap();
        let second = pool.select_rpc().unwrap();
        assert!(Arc::ptr_eq(&first, a.rpc()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        a.force_state(NodeState::OutOfSync);
        let third = pool.select_rpc().unwrap();
        assert!(Arc::ptr_eq(&third, b.rpc()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.rpc().unsubscribes(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn no_live_nodes_records_critical_error() {
        let a = node_in_state("a", 0, NodeState::Unreachable, 10, None);
        let pool = MultiNode::new(pool_config(SelectionMode::RoundRobin), 7, vec![a], vec![]);
        assert_eq!(pool.select_rpc().err(), Some(MultiNodeError::NoLiveNodes));
        assert!(logs_contain("No live RPC nodes available"));
        assert_eq!(
            pool.healthy(),
            Err(MultiNodeError::Unhealthy(vec!["no live nodes available for chain 7".into()]))
        );
        assert!(pool.healthy().is_ok());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn lease_switches_to_best_node() {
        let rpc_a = MockRpc::new("ws://a");
        rpc_a.set_subscribers(2);
        let a = mock_node(rpc_a.clone(), 1, "a", 0);
        let b = mock_node(MockRpc::new("ws://b"), 1, "b", 1);
        let config = Arc::new(NodePoolConfig {
            lease_duration: Duration::from_secs(1),
            ..NodePoolConfig::default()
        });
        let selector = FixedSelector {
            node: Some(b.clone()),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let pool = MultiNode::with_selector(config, 1, vec![a.clone(), b.clone()], vec![], Box::new(selector));
        pool.start().await.unwrap();
        assert!(logs_contain("The MultiNode will switch to best node every 1s"));

        eventually(|| rpc_a.unsubscribes() >= 1).await;
        assert!(logs_contain("Switching to best node from (primary)a:ws://a to (primary)b:ws://b"));
        assert!(Arc::ptr_eq(&pool.select_rpc().unwrap(), b.rpc()));
        pool.close().await;
        assert_eq!(a.state(), NodeState::Closed);
        assert_eq!(b.state(), NodeState::Closed);
    }

    #[tokio::test]
    async fn lease_releases_previous_active_node() {
        let a = node_in_state("a", 0, NodeState::Alive, 10, None);
        let b = node_in_state("b", 1, NodeState::Alive, 5, None);
        let pool = MultiNode::new(
            pool_config(SelectionMode::HighestHead),
            1,
            vec![a.clone(), b.clone()],
            vec![],
        );
        assert!(Arc::ptr_eq(&pool.select_rpc().unwrap(), a.rpc()));

        pool.check_lease();
        assert_eq!(a.rpc().unsubscribes(), 0);

        b.force_latest(20, None);
        pool.check_lease();
        assert_eq!(a.rpc().unsubscribes(), 1);
        assert_eq!(b.rpc().unsubscribes(), 0);
        assert!(Arc::ptr_eq(&pool.select_rpc().unwrap(), b.rpc()));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn report_flags_pool_without_primaries() {
        let rpc = MockRpc::new("ws://a");
        rpc.set_dial(Err(RpcError::Dial("refused".into())));
        let a = mock_node(rpc, 1, "a", 0);
        let config = Arc::new(NodePoolConfig {
            selection_mode: SelectionMode::RoundRobin,
            report_interval: Duration::from_millis(100),
            death_declaration_delay: Duration::from_millis(100),
            ..NodePoolConfig::default()
        });
        let pool = MultiNode::new(config, 1, vec![a], vec![]);
        pool.start().await.unwrap();

        eventually(|| logs_contain("no primary nodes available: 0/1 nodes are alive")).await;
        let err = pool.healthy().unwrap_err();
        assert!(err.to_string().contains("no primary nodes available: 0/1 nodes are alive"));
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn report_logs_degraded_pool() {
        let dead = MockRpc::new("ws://b");
        dead.set_dial(Err(RpcError::Dial("refused".into())));
        let a = mock_node(MockRpc::new("ws://a"), 1, "a", 0);
        let b = mock_node(dead, 1, "b", 1);
        let config = Arc::new(NodePoolConfig {
            selection_mode: SelectionMode::RoundRobin,
            report_interval: Duration::from_millis(100),
            death_declaration_delay: Duration::from_millis(100),
            ..NodePoolConfig::default()
        });
        let pool = MultiNode::new(config, 1, vec![a, b], vec![]);
        pool.start().await.unwrap();

        eventually(|| logs_contain("At least one primary node is dead: 1/2 nodes are alive")).await;
        assert!(pool.healthy().is_ok());
        pool.close().await;
    }

    #[tokio::test]
    async fn do_all_visits_alive_nodes_only() {
        let a = node_in_state("a", 0, NodeState::Alive, 1, None);
        let b = node_in_state("b", 0, NodeState::Unreachable, 1, None);
        let s = SendOnlyNode::new("s", 1u64, MockRpc::new("http://s"));
        s.start().await.unwrap();
        let pool = MultiNode::new(pool_config(SelectionMode::HighestHead), 1, vec![a, b], vec![s]);

        let mut seen = Vec::new();
        pool.do_all(|rpc, send_only| seen.push((rpc.url().to_string(), send_only)))
            .unwrap();
        assert_eq!(
            seen,
            vec![("ws://a".to_string(), false), ("http://s".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn do_all_fails_without_alive_primaries() {
        let a = node_in_state("a", 0, NodeState::OutOfSync, 1, None);
        let s = SendOnlyNode::new("s", 1u64, MockRpc::new("http://s"));
        s.start().await.unwrap();
        let pool = MultiNode::new(pool_config(SelectionMode::HighestHead), 1, vec![a], vec![s]);

        let mut seen = Vec::new();
        let res = pool.do_all(|rpc, send_only| seen.push((rpc.url().to_string(), send_only)));
        assert_eq!(res, Err(MultiNodeError::NoLiveNodes));
        assert_eq!(seen, vec![("http://s".to_string(), true)]);
    }

    #[tokio::test]
    async fn node_states_cover_all_nodes() {
        let a = node_in_state("node_1", 0, NodeState::Alive, 1, None);
        let b = node_in_state("node_2", 0, NodeState::Unreachable, 1, None);
        let s = SendOnlyNode::new("send_only_1", 1u64, MockRpc::new("http://s"));
        let pool = MultiNode::new(pool_config(SelectionMode::HighestHead), 1, vec![a, b], vec![s]);

        let states = pool.node_states();
        let expected: HashMap<String, String> = [
            ("node_1", "Alive"),
            ("node_2", "Unreachable"),
            ("send_only_1", "Undialed"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(states, expected);
    }

    fn observed(
        name: &str,
        state: NodeState,
        latest: (i64, i64, Option<u64>),
        highest: (i64, i64, Option<u64>),
    ) -> Arc<Node<MockRpc>> {
        let node = node_in_state(name, 0, state, highest.0, highest.2);
        node.force_finalized(highest.1);
        node.force_latest(latest.0, latest.2.map(U256::from));
        node.force_finalized(latest.1);
        node
    }

    fn info(block: i64, finalized: i64, td: u64) -> ChainInfo {
        ChainInfo {
            block_number: block,
            finalized_block_number: finalized,
            total_difficulty: Some(U256::from(td)),
        }
    }

    #[tokio::test]
    async fn chain_info_without_nodes() {
        let pool: Arc<MultiNode<MockRpc>> =
            MultiNode::new(pool_config(SelectionMode::RoundRobin), 1, vec![], vec![]);
        assert_eq!(pool.latest_chain_info(), (0, info(0, 0, 0)));
        assert_eq!(pool.highest_user_observations(), info(0, 0, 0));
    }

    #[tokio::test]
    async fn chain_info_aggregates_alive_and_highest() {
        let nodes = vec![
            observed("a", NodeState::OutOfSync, (1000, 990, Some(2000)), (1005, 995, Some(2005))),
            observed("b", NodeState::Alive, (20, 10, Some(9)), (25, 15, Some(14))),
            observed("c", NodeState::Alive, (19, 9, Some(10)), (24, 14, Some(15))),
            observed("d", NodeState::Alive, (11, 1, None), (16, 6, None)),
        ];
        let pool = MultiNode::new(pool_config(SelectionMode::RoundRobin), 1, nodes, vec![]);

        assert_eq!(pool.latest_chain_info(), (3, info(20, 10, 10)));
        assert_eq!(pool.highest_user_observations(), info(1005, 995, 2005));
    }
}
