//! Handwritten RPC mock and pool stub shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{ChainConfig, NodePoolConfig};
use crate::error::RpcError;
use crate::node::{Node, PoolInfoProvider};
use crate::rpc::{Head, RpcClient, Subscription, TransactionClient};
use crate::send_only::SendOnlyNode;
use crate::types::{ChainInfo, NodeState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockHead {
    pub number: i64,
    pub difficulty: Option<U256>,
    pub valid: bool,
}

impl MockHead {
    pub fn new(number: i64) -> Self {
        Self { number, difficulty: None, valid: true }
    }

    pub fn with_difficulty(number: i64, td: u64) -> Self {
        Self { number, difficulty: Some(U256::from(td)), valid: true }
    }
}

impl Head for MockHead {
    fn block_number(&self) -> i64 {
        self.number
    }

    fn block_difficulty(&self) -> Option<U256> {
        self.difficulty
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Response to a transaction submission.
#[derive(Debug, Clone)]
pub(crate) enum TxReply {
    Ok,
    Err(RpcError),
    /// Never replies.
    Hang,
    /// Replies after the given delay.
    Delayed(Duration, Option<RpcError>),
}

struct HeadFeed {
    tx: mpsc::Sender<MockHead>,
    sub: Subscription,
}

/// Scriptable [`RpcClient`]. Queued results are consumed first; once a queue
/// is empty the fallback value is returned.
pub(crate) struct MockRpc {
    url: String,
    dial_results: Mutex<VecDeque<Result<(), RpcError>>>,
    dial_fallback: Mutex<Result<(), RpcError>>,
    chain_ids: Mutex<VecDeque<Result<u64, RpcError>>>,
    chain_id_fallback: Mutex<Result<u64, RpcError>>,
    version: Mutex<Result<String, RpcError>>,
    version_hangs: AtomicBool,
    version_calls: AtomicUsize,
    subscribe_error: Mutex<Option<RpcError>>,
    heads: Mutex<Option<HeadFeed>>,
    finalized: Mutex<Option<HeadFeed>>,
    tx_reply: Mutex<TxReply>,
    subscribers: AtomicUsize,
    dials: AtomicUsize,
    disconnects: AtomicUsize,
    closes: AtomicUsize,
    unsubscribes: AtomicUsize,
    sent_txs: AtomicUsize,
}

impl MockRpc {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            dial_results: Mutex::new(VecDeque::new()),
            dial_fallback: Mutex::new(Ok(())),
            chain_ids: Mutex::new(VecDeque::new()),
            chain_id_fallback: Mutex::new(Ok(1)),
            version: Mutex::new(Ok("mock/v1.0.0".into())),
            version_hangs: AtomicBool::new(false),
            version_calls: AtomicUsize::new(0),
            subscribe_error: Mutex::new(None),
            heads: Mutex::new(None),
            finalized: Mutex::new(None),
            tx_reply: Mutex::new(TxReply::Ok),
            subscribers: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            sent_txs: AtomicUsize::new(0),
        })
    }

    pub fn queue_dial(&self, res: Result<(), RpcError>) {
        self.dial_results.lock().push_back(res);
    }

    pub fn set_dial(&self, res: Result<(), RpcError>) {
        *self.dial_fallback.lock() = res;
    }

    pub fn queue_chain_id(&self, res: Result<u64, RpcError>) {
        self.chain_ids.lock().push_back(res);
    }

    pub fn set_chain_id(&self, res: Result<u64, RpcError>) {
        *self.chain_id_fallback.lock() = res;
    }

    pub fn set_version(&self, res: Result<String, RpcError>) {
        *self.version.lock() = res;
    }

    /// Make every later `client_version` call wait forever.
    pub fn hang_version(&self) {
        self.version_hangs.store(true, Ordering::SeqCst);
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    pub fn set_subscribe_error(&self, err: Option<RpcError>) {
        *self.subscribe_error.lock() = err;
    }

    pub fn set_tx_reply(&self, reply: TxReply) {
        *self.tx_reply.lock() = reply;
    }

    pub fn set_subscribers(&self, n: usize) {
        self.subscribers.store(n, Ordering::SeqCst);
    }

    /// Whether a head subscription is currently held.
    pub fn has_head_feed(&self) -> bool {
        self.heads.lock().as_ref().is_some_and(|f| f.sub.is_active())
    }

    /// Deliver a head on the latest new-heads subscription.
    pub async fn push_head(&self, head: MockHead) {
        let tx = self.heads.lock().as_ref().map(|f| f.tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(head).await;
        }
    }

    pub fn has_finalized_feed(&self) -> bool {
        self.finalized.lock().as_ref().is_some_and(|f| f.sub.is_active())
    }

    pub async fn push_finalized(&self, head: MockHead) {
        let tx = self.finalized.lock().as_ref().map(|f| f.tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(head).await;
        }
    }

    /// Drop the sending side of the head feed, closing the node's channel.
    pub fn close_head_feed(&self) {
        self.heads.lock().take();
    }

    pub fn fail_head_subscription(&self, reason: &str) {
        if let Some(feed) = self.heads.lock().as_ref() {
            feed.sub.fail(reason);
        }
    }

    pub fn close_finalized_feed(&self) {
        self.finalized.lock().take();
    }

    pub fn fail_finalized_subscription(&self, reason: &str) {
        if let Some(feed) = self.finalized.lock().as_ref() {
            feed.sub.fail(reason);
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn sent_txs(&self) -> usize {
        self.sent_txs.load(Ordering::SeqCst)
    }

    fn new_feed(&self, slot: &Mutex<Option<HeadFeed>>) -> Result<(mpsc::Receiver<MockHead>, Subscription), RpcError> {
        if let Some(err) = self.subscribe_error.lock().clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(64);
        let sub = Subscription::new();
        *slot.lock() = Some(HeadFeed { tx, sub: sub.clone() });
        Ok((rx, sub))
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    type ChainId = u64;
    type Head = MockHead;

    async fn dial(&self) -> Result<(), RpcError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let queued = self.dial_results.lock().pop_front();
        queued.unwrap_or_else(|| self.dial_fallback.lock().clone())
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let queued = self.chain_ids.lock().pop_front();
        queued.unwrap_or_else(|| self.chain_id_fallback.lock().clone())
    }

    async fn client_version(&self) -> Result<String, RpcError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        if self.version_hangs.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        self.version.lock().clone()
    }

    async fn subscribe_new_heads(&self) -> Result<(mpsc::Receiver<MockHead>, Subscription), RpcError> {
        self.new_feed(&self.heads)
    }

    async fn subscribe_finalized_heads(
        &self,
    ) -> Result<(mpsc::Receiver<MockHead>, Subscription), RpcError> {
        self.new_feed(&self.finalized)
    }

    fn disconnect_all(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribers_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    fn set_alive_loop_sub(&self, _sub: Subscription) {}

    fn unsubscribe_all_except_alive_loop(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransactionClient<String> for MockRpc {
    async fn send_transaction(&self, _tx: &String) -> Result<(), RpcError> {
        self.sent_txs.fetch_add(1, Ordering::SeqCst);
        let reply = self.tx_reply.lock().clone();
        match reply {
            TxReply::Ok => Ok(()),
            TxReply::Err(e) => Err(e),
            TxReply::Hang => std::future::pending().await,
            TxReply::Delayed(d, err) => {
                tokio::time::sleep(d).await;
                err.map_or(Ok(()), Err)
            }
        }
    }
}

/// Fixed pool view for nodes tested in isolation.
pub(crate) struct StubPool {
    live: AtomicUsize,
    best: Mutex<ChainInfo>,
}

impl StubPool {
    pub fn new(live: usize, block_number: i64, total_difficulty: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicUsize::new(live),
            best: Mutex::new(ChainInfo {
                block_number,
                finalized_block_number: 0,
                total_difficulty: total_difficulty.map(U256::from),
            }),
        })
    }

    pub fn set_live(&self, live: usize) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn set_best_block(&self, block_number: i64) {
        self.best.lock().block_number = block_number;
    }
}

impl PoolInfoProvider for StubPool {
    fn latest_chain_info(&self) -> (usize, ChainInfo) {
        (self.live.load(Ordering::SeqCst), self.best.lock().clone())
    }

    fn highest_user_observations(&self) -> ChainInfo {
        self.best.lock().clone()
    }
}

pub(crate) fn mock_node(rpc: Arc<MockRpc>, chain_id: u64, name: &str, order: i32) -> Arc<Node<MockRpc>> {
    Node::new(
        Arc::new(NodePoolConfig::default()),
        Arc::new(ChainConfig::default()),
        name,
        order,
        chain_id,
        rpc,
    )
}

/// Node with the given state and latest head, without running any loop.
pub(crate) fn node_in_state(
    name: &str,
    order: i32,
    state: NodeState,
    block_number: i64,
    total_difficulty: Option<u64>,
) -> Arc<Node<MockRpc>> {
    let node = mock_node(MockRpc::new(&format!("ws://{name}")), 1, name, order);
    node.force_state(state);
    node.force_latest(block_number, total_difficulty.map(U256::from));
    node
}

/// Poll `cond` until it holds, advancing (possibly paused) time in 10ms steps.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub(crate) async fn wait_for_state(node: &Node<MockRpc>, state: NodeState) {
    for _ in 0..2_000 {
        if node.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {node} never reached {state}, stuck in {}", node.state());
}

pub(crate) async fn wait_for_send_only_state(node: &SendOnlyNode<MockRpc>, state: NodeState) {
    for _ in 0..2_000 {
        if node.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sendonly node {node} never reached {state}, stuck in {}", node.state());
}
