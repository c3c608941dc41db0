//! Transition table for primary nodes.
//!
//! Allowed transitions:
//! - `→ Alive`:          from `Dialed`, `InvalidChainId`
//! - `→ Alive` (in sync): from `OutOfSync`
//! - `→ OutOfSync`:      from `Alive`
//! - `→ Unreachable`:    from `Undialed`, `Dialed`, `Alive`, `OutOfSync`, `InvalidChainId`
//! - `→ InvalidChainId`: from `Dialed`, `OutOfSync`
//!
//! Every request made while `Closed` is ignored. Any other source state is a
//! logic error and panics without touching the state.

use std::sync::Arc;

use super::{Node, OutOfSyncCheck};
use crate::rpc::RpcClient;
use crate::types::NodeState;

impl<R: RpcClient> Node<R> {
    /// Move to `to` if the current state is in `allowed`, then run `f` while
    /// the state lock is still held.
    fn transition(&self, to: NodeState, allowed: &[NodeState], disconnect: bool, f: impl FnOnce()) {
        self.record_transition(to);
        let mut inner = self.inner.write();
        let from = inner.state;
        if from == NodeState::Closed {
            return;
        }
        if !allowed.contains(&from) {
            panic!("cannot transition from {from} to {to}");
        }
        if disconnect {
            self.rpc.disconnect_all();
        }
        inner.state = to;
        f();
    }

    pub(crate) fn transition_to_alive(&self, f: impl FnOnce()) {
        self.transition(
            NodeState::Alive,
            &[NodeState::Dialed, NodeState::InvalidChainId],
            false,
            f,
        );
    }

    pub(crate) fn transition_to_in_sync(&self, f: impl FnOnce()) {
        self.transition(NodeState::Alive, &[NodeState::OutOfSync], false, f);
    }

    pub(crate) fn transition_to_out_of_sync(&self, f: impl FnOnce()) {
        self.transition(NodeState::OutOfSync, &[NodeState::Alive], true, f);
    }

    pub(crate) fn transition_to_unreachable(&self, f: impl FnOnce()) {
        self.transition(
            NodeState::Unreachable,
            &[
                NodeState::Undialed,
                NodeState::Dialed,
                NodeState::Alive,
                NodeState::OutOfSync,
                NodeState::InvalidChainId,
            ],
            true,
            f,
        );
    }

    pub(crate) fn transition_to_invalid_chain_id(&self, f: impl FnOnce()) {
        self.transition(
            NodeState::InvalidChainId,
            &[NodeState::Dialed, NodeState::OutOfSync],
            true,
            f,
        );
    }

    // ─── Declarations ────────────────────────────────────────────────────────

    pub(crate) fn declare_alive(self: &Arc<Self>) {
        self.transition_to_alive(|| {
            tracing::info!(node = %self, "RPC Node is online");
            let node = Arc::clone(self);
            self.tasks.spawn(async move { node.alive_loop().await });
        });
    }

    pub(crate) fn declare_in_sync(self: &Arc<Self>) {
        self.transition_to_in_sync(|| {
            tracing::info!(node = %self, "RPC Node is back in sync");
            let node = Arc::clone(self);
            self.tasks.spawn(async move { node.alive_loop().await });
        });
    }

    pub(crate) fn declare_out_of_sync(self: &Arc<Self>, check: OutOfSyncCheck) {
        self.transition_to_out_of_sync(|| {
            tracing::error!(node = %self, "RPC Node is out of sync");
            let node = Arc::clone(self);
            self.tasks.spawn(async move { node.out_of_sync_loop(check).await });
        });
    }

    pub(crate) fn declare_unreachable(self: &Arc<Self>) {
        self.transition_to_unreachable(|| {
            tracing::error!(node = %self, "RPC Node is unreachable");
            let node = Arc::clone(self);
            self.tasks.spawn(async move { node.unreachable_loop().await });
        });
    }

    pub(crate) fn declare_invalid_chain_id(self: &Arc<Self>) {
        self.transition_to_invalid_chain_id(|| {
            tracing::error!(node = %self, "RPC Node has the wrong chain ID");
            let node = Arc::clone(self);
            self.tasks.spawn(async move { node.invalid_chain_id_loop().await });
        });
    }

    /// Declare the outcome of a dial/verify step.
    pub(crate) fn declare_state(self: &Arc<Self>, state: NodeState) {
        if self.state() == NodeState::Closed {
            return;
        }
        match state {
            NodeState::Alive => self.declare_alive(),
            NodeState::OutOfSync => self.declare_out_of_sync(OutOfSyncCheck::BehindPool),
            NodeState::Unreachable => self.declare_unreachable(),
            NodeState::InvalidChainId => self.declare_invalid_chain_id(),
            NodeState::Closed => {}
            other => panic!("cannot declare node state {other}"),
        }
    }
}
