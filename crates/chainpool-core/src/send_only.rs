//! Send-only node: a broadcast target that is never queried for chain state.
//!
//! The state machine is smaller than a primary node's: a failed dial makes
//! the node `Unusable` for good, while a failed or mismatching chain ID
//! check is retried with redial backoff until the node comes online.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::sleep;

use crate::error::NodeError;
use crate::metrics::metrics;
use crate::policy::RedialBackoff;
use crate::rpc::RpcClient;
use crate::task::{StopSignal, TaskGroup};
use crate::types::NodeState;

/// A managed connection used only to broadcast transactions.
pub struct SendOnlyNode<R: RpcClient> {
    name: String,
    display: String,
    chain_id: R::ChainId,
    chain_id_str: String,
    rpc: Arc<R>,
    state: RwLock<NodeState>,
    tasks: TaskGroup,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<R: RpcClient> SendOnlyNode<R> {
    pub fn new(name: impl Into<String>, chain_id: R::ChainId, rpc: Arc<R>) -> Arc<Self> {
        let name = name.into();
        let display = format!("(sendonly){}:{}", name, rpc.url());
        Arc::new(Self {
            display,
            name,
            chain_id_str: chain_id.to_string(),
            chain_id,
            rpc,
            state: RwLock::new(NodeState::Undialed),
            tasks: TaskGroup::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configured_chain_id(&self) -> &R::ChainId {
        &self.chain_id
    }

    pub fn rpc(&self) -> &Arc<R> {
        &self.rpc
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted { node: self.display.clone() });
        }
        match self.state() {
            NodeState::Closed => return Ok(()),
            NodeState::Undialed => {}
            other => panic!("cannot start sendonly node in state {other}"),
        }
        tracing::debug!(node = %self, "Starting sendonly RPC node");

        let mut stop = self.tasks.stop_signal();
        match stop.guard(self.rpc.dial()).await {
            None => return Ok(()),
            Some(Err(e)) => {
                tracing::error!(node = %self, error = %e, "Dial failed: SendOnly Node is unusable");
                self.set_state(NodeState::Unusable);
                return Ok(());
            }
            Some(Ok(())) => {}
        }
        self.set_state(NodeState::Dialed);

        if self.chain_id_str == "0" {
            tracing::warn!(node = %self, "sendonly rpc ChainID verification skipped");
        } else {
            let Some(state) = self.verify(&mut stop).await else {
                return Ok(());
            };
            if state != NodeState::Alive {
                self.set_state(state);
                let node = Arc::clone(self);
                self.tasks.spawn(async move { node.verify_loop().await });
                return Ok(());
            }
        }

        self.set_state(NodeState::Alive);
        tracing::info!(node = %self, node_state = %self.state(), "Sendonly RPC Node is online");
        Ok(())
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.write();
            self.tasks.stop();
            *state = NodeState::Closed;
        }
        self.tasks.wait().await;
        self.rpc.close();
    }

    /// Returns `false` once the node is closed.
    fn set_state(&self, next: NodeState) -> bool {
        let mut state = self.state.write();
        if *state == NodeState::Closed {
            return false;
        }
        if *state != next {
            metrics().record_transition(&self.chain_id_str, &self.name, next);
        }
        *state = next;
        true
    }

    /// Check the remote chain ID. `None` when stopped.
    async fn verify(&self, stop: &mut StopSignal) -> Option<NodeState> {
        let result = stop.guard(self.rpc.chain_id()).await?;
        let state = match result {
            Err(e) => {
                tracing::error!(node = %self, error = %e, "Verify failed: {}", e);
                NodeState::Unreachable
            }
            Ok(remote) if remote != self.chain_id => {
                tracing::error!(
                    node = %self,
                    "sendonly rpc ChainID doesn't match local chain ID: RPC ID={}, local ID={}, node name={}",
                    remote,
                    self.chain_id,
                    self.name
                );
                NodeState::InvalidChainId
            }
            Ok(_) => NodeState::Alive,
        };
        metrics().record_verify(&self.chain_id_str, &self.name, state == NodeState::Alive);
        Some(state)
    }

    /// Re-check the chain ID with backoff until it matches.
    async fn verify_loop(self: Arc<Self>) {
        let mut stop = self.tasks.stop_signal();
        let mut backoff = RedialBackoff::default();
        loop {
            if stop.guard(sleep(backoff.next_delay())).await.is_none() {
                return;
            }
            let Some(state) = self.verify(&mut stop).await else {
                return;
            };
            if !self.set_state(state) {
                return;
            }
            if state == NodeState::Alive {
                tracing::info!(node = %self, node_state = %state, "Sendonly RPC Node is online");
                return;
            }
        }
    }
}

impl<R: RpcClient> fmt::Display for SendOnlyNode<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
