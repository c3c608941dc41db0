//! Per-state lifecycle loops.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, Sleep};

use super::{Node, OutOfSyncCheck, MSG_CANNOT_DISABLE, MSG_DEGRADED_STATE};
use crate::metrics::metrics;
use crate::policy::{with_jitter, RedialBackoff};
use crate::rpc::{Head, RpcClient, Subscription};
use crate::task::StopSignal;
use crate::types::{ChainInfo, NodeState};

const MSG_IN_SYNC: &str = "RPC node back in sync";
const MSG_RECEIVED_BLOCK: &str =
    "Received block for RPC node, waiting until back in-sync to mark as live again";

/// Why the alive loop gave up its slot.
enum Exit {
    Unreachable,
    OutOfSync(OutOfSyncCheck),
}

// ─── select! helpers ──────────────────────────────────────────────────────────

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn fire(timer: Option<&mut Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn recv<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn terminated(sub: Option<&Subscription>) -> Option<crate::error::RpcError> {
    match sub {
        Some(sub) => sub.terminated().await,
        None => pending().await,
    }
}

fn timer(after: Duration) -> Option<Pin<Box<Sleep>>> {
    (!after.is_zero()).then(|| Box::pin(sleep(after)))
}

fn reset(timer: &mut Option<Pin<Box<Sleep>>>, after: Duration) {
    if let Some(timer) = timer.as_mut() {
        timer.as_mut().reset(Instant::now() + after);
    }
}

impl<R: RpcClient> Node<R> {
    /// Dial, then verify the chain ID. Returns the state to declare.
    pub(super) async fn create_verified_conn(&self, stop: &mut StopSignal) -> NodeState {
        match stop.guard(self.rpc.dial()).await {
            None => NodeState::Closed,
            Some(Err(e)) => {
                tracing::error!(node = %self, error = %e, node_state = %self.state(), "Dial failed: Node is unreachable");
                NodeState::Unreachable
            }
            Some(Ok(())) => self.verify_chain_id(stop).await,
        }
    }

    /// Compare the remote chain ID with the configured one. Returns `Closed`
    /// when the node was closed meanwhile.
    pub(super) async fn verify_chain_id(&self, stop: &mut StopSignal) -> NodeState {
        match self.state() {
            NodeState::Closed => return NodeState::Closed,
            NodeState::Dialed | NodeState::OutOfSync | NodeState::InvalidChainId => {}
            other => panic!("cannot verify node in state {other}"),
        }
        let Some(result) = stop.guard(self.rpc.chain_id()).await else {
            return NodeState::Closed;
        };
        match result {
            Err(e) => {
                metrics().record_verify(&self.chain_id_str, &self.name, false);
                tracing::error!(node = %self, error = %e, node_state = %self.state(), "Failed to verify chain ID for node");
                NodeState::Unreachable
            }
            Ok(remote) if remote != self.chain_id => {
                metrics().record_verify(&self.chain_id_str, &self.name, false);
                tracing::error!(
                    node = %self,
                    remote_chain_id = %remote,
                    local_chain_id = %self.chain_id,
                    node_state = %self.state(),
                    "Failed to verify RPC node; remote endpoint returned the wrong chain ID"
                );
                NodeState::InvalidChainId
            }
            Ok(_) => {
                metrics().record_verify(&self.chain_id_str, &self.name, true);
                NodeState::Alive
            }
        }
    }

    /// Record a received head. Returns `false` for invalid heads.
    fn on_new_head(&self, local: &mut ChainInfo, head: &R::Head) -> bool {
        if !head.is_valid() {
            return false;
        }
        let number = head.block_number();
        let td = head.block_difficulty();
        metrics().record_head(&self.chain_id_str, &self.name, number);
        if !self.chain_config.finality_tag_enabled {
            let finalized = (number - i64::from(self.chain_config.finality_depth)).max(0);
            if finalized > local.finalized_block_number {
                local.finalized_block_number = finalized;
                self.set_latest_finalized(finalized);
                metrics().record_finalized(&self.chain_id_str, &self.name, finalized);
            }
        }
        local.block_number = local.block_number.max(number);
        local.set_total_difficulty_if_greater(td);
        self.set_latest_received(number, td);
        true
    }

    fn on_new_finalized_head(&self, local: &mut ChainInfo, head: &R::Head) -> bool {
        if !head.is_valid() {
            tracing::warn!(node = %self, "Latest finalized block is not valid");
            return false;
        }
        let number = head.block_number();
        if number > local.finalized_block_number {
            local.finalized_block_number = number;
        }
        self.set_latest_finalized(number);
        metrics().record_finalized(&self.chain_id_str, &self.name, number);
        true
    }

    fn pool_has_fewer_live_nodes_than(&self, n: usize) -> bool {
        self.live_nodes().is_some_and(|live| live < n)
    }

    // ─── Alive ───────────────────────────────────────────────────────────────

    pub(super) async fn alive_loop(self: Arc<Self>) {
        match self.state() {
            NodeState::Alive => {}
            NodeState::Closed => return,
            other => panic!("alive_loop can only run for node in Alive state, got: {other}"),
        }
        let mut stop = self.stop_signal();

        let no_new_heads_threshold = self.chain_config.no_new_heads_threshold;
        let no_new_finalized_threshold = self.chain_config.no_new_finalized_heads_threshold;
        let poll_interval = self.node_config.poll_interval;
        let poll_failure_threshold = self.node_config.poll_failure_threshold;

        tracing::debug!(
            node = %self,
            no_new_heads_threshold = ?no_new_heads_threshold,
            poll_interval = ?poll_interval,
            poll_failure_threshold,
            "RPC node is alive"
        );

        let Some(subscribed) = stop.guard(self.rpc.subscribe_new_heads()).await else {
            return;
        };
        let (mut heads, heads_sub) = match subscribed {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(node = %self, error = %e, "Initial subscribe for heads failed");
                self.declare_unreachable();
                return;
            }
        };
        self.rpc.set_alive_loop_sub(heads_sub.clone());

        let mut finalized = None;
        if self.chain_config.finality_tag_enabled {
            let Some(subscribed) = stop.guard(self.rpc.subscribe_finalized_heads()).await else {
                heads_sub.unsubscribe();
                return;
            };
            match subscribed {
                Ok(s) => finalized = Some(s),
                Err(e) => {
                    tracing::error!(node = %self, error = %e, "Failed to subscribe to finalized heads");
                    heads_sub.unsubscribe();
                    self.declare_unreachable();
                    return;
                }
            }
        }
        let (mut finalized_heads, finalized_sub) = match finalized {
            Some((rx, sub)) => (Some(rx), Some(sub)),
            None => (None, None),
        };

        let mut poll = (!poll_interval.is_zero())
            .then(|| interval_at(Instant::now() + poll_interval, poll_interval));
        if poll.is_none() {
            tracing::debug!(node = %self, "Polling disabled");
        }
        let mut no_new_heads = timer(no_new_heads_threshold);
        let mut no_new_finalized = if finalized_sub.is_some() {
            timer(no_new_finalized_threshold)
        } else {
            None
        };

        let mut local = self.state_and_latest().1;
        let mut poll_failures: u32 = 0;

        let next = loop {
            tokio::select! {
                _ = stop.stopped() => break None,

                _ = tick(poll.as_mut()) => {
                    let polled = stop.guard(tokio::time::timeout(poll_interval, self.rpc.client_version())).await;
                    let Some(version) = polled else {
                        break None;
                    };
                    match version {
                        Ok(Ok(version)) => {
                            metrics().record_poll(&self.chain_id_str, &self.name, true);
                            tracing::debug!(node = %self, client_version = %version, "Version poll successful");
                            poll_failures = 0;
                        }
                        Ok(Err(e)) => {
                            metrics().record_poll(&self.chain_id_str, &self.name, false);
                            poll_failures += 1;
                            tracing::warn!(node = %self, error = %e, poll_failures, "Poll failure, RPC endpoint {} failed to respond properly", self);
                        }
                        Err(_) => {
                            metrics().record_poll(&self.chain_id_str, &self.name, false);
                            poll_failures += 1;
                            tracing::warn!(node = %self, poll_failures, "Poll failure, RPC endpoint {} failed to respond properly: timed out", self);
                        }
                    }
                    if poll_failure_threshold > 0 && poll_failures >= poll_failure_threshold {
                        tracing::error!(node = %self, poll_failures, "RPC endpoint failed to respond to {poll_failures} consecutive polls");
                        if self.pool_has_fewer_live_nodes_than(2) {
                            tracing::error!(node = %self, critical = true, "RPC endpoint failed to respond to polls; {MSG_CANNOT_DISABLE} {MSG_DEGRADED_STATE}");
                            continue;
                        }
                        break Some(Exit::Unreachable);
                    }
                    let (out_of_sync, live_nodes) = self.sync_status(local.block_number, local.total_difficulty);
                    if out_of_sync {
                        tracing::error!(node = %self, block_number = local.block_number, "RPC endpoint has fallen behind");
                        if live_nodes < 2 {
                            tracing::error!(node = %self, critical = true, "RPC endpoint has fallen behind; {MSG_CANNOT_DISABLE} {MSG_DEGRADED_STATE}");
                            continue;
                        }
                        break Some(Exit::OutOfSync(OutOfSyncCheck::BehindPool));
                    }
                }

                head = heads.recv() => {
                    let Some(head) = head else {
                        tracing::error!(node = %self, "Subscription channel unexpectedly closed");
                        break Some(Exit::Unreachable);
                    };
                    if !self.on_new_head(&mut local, &head) {
                        continue;
                    }
                    tracing::trace!(node = %self, block_number = head.block_number(), "Received new head");
                    reset(&mut no_new_heads, no_new_heads_threshold);
                }

                err = heads_sub.terminated() => {
                    tracing::error!(node = %self, error = ?err, "Subscription was terminated");
                    break Some(Exit::Unreachable);
                }

                _ = fire(no_new_heads.as_mut()) => {
                    tracing::error!(
                        node = %self,
                        block_number = local.block_number,
                        "RPC endpoint detected out of sync; no new heads received for {no_new_heads_threshold:?} (last head received was {})",
                        local.block_number
                    );
                    if self.pool_has_fewer_live_nodes_than(2) {
                        tracing::error!(node = %self, critical = true, "RPC endpoint detected out of sync; {MSG_CANNOT_DISABLE} {MSG_DEGRADED_STATE}");
                        reset(&mut no_new_heads, self.chain_config.zombie_node_check_interval());
                        continue;
                    }
                    break Some(Exit::OutOfSync(OutOfSyncCheck::BelowBlock(local.block_number)));
                }

                head = recv(finalized_heads.as_mut()) => {
                    let Some(head) = head else {
                        tracing::error!(node = %self, "Finalized heads subscription channel unexpectedly closed");
                        break Some(Exit::Unreachable);
                    };
                    if !self.on_new_finalized_head(&mut local, &head) {
                        continue;
                    }
                    reset(&mut no_new_finalized, no_new_finalized_threshold);
                }

                err = terminated(finalized_sub.as_ref()) => {
                    tracing::error!(node = %self, error = ?err, "Finalized heads subscription was terminated");
                    break Some(Exit::Unreachable);
                }

                _ = fire(no_new_finalized.as_mut()) => {
                    tracing::error!(
                        node = %self,
                        finalized_block_number = local.finalized_block_number,
                        "No new finalized heads received for {no_new_finalized_threshold:?}. Node stays out-of-sync due to sync issues"
                    );
                    if self.pool_has_fewer_live_nodes_than(2) {
                        tracing::error!(node = %self, critical = true, "RPC endpoint detected out of sync; {MSG_CANNOT_DISABLE} {MSG_DEGRADED_STATE}");
                        reset(&mut no_new_finalized, self.chain_config.zombie_node_check_interval());
                        continue;
                    }
                    break Some(Exit::OutOfSync(OutOfSyncCheck::BelowBlock(local.block_number)));
                }
            }
        };

        heads_sub.unsubscribe();
        if let Some(sub) = &finalized_sub {
            sub.unsubscribe();
        }
        match next {
            None => {}
            Some(Exit::Unreachable) => self.declare_unreachable(),
            Some(Exit::OutOfSync(check)) => self.declare_out_of_sync(check),
        }
    }

    // ─── OutOfSync ───────────────────────────────────────────────────────────

    pub(super) async fn out_of_sync_loop(self: Arc<Self>, check: OutOfSyncCheck) {
        match self.state() {
            NodeState::OutOfSync => {}
            NodeState::Closed => return,
            other => panic!("out_of_sync_loop can only run for node in OutOfSync state, got: {other}"),
        }
        let mut stop = self.stop_signal();
        let out_of_sync_at = Instant::now();
        tracing::debug!(node = %self, "Trying to revive out-of-sync RPC node");

        // out-of-sync nodes are disconnected on entry
        let state = self.create_verified_conn(&mut stop).await;
        if state != NodeState::Alive {
            self.declare_state(state);
            return;
        }

        let Some(subscribed) = stop.guard(self.rpc.subscribe_new_heads()).await else {
            return;
        };
        let (mut heads, sub) = match subscribed {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(node = %self, error = %e, "Failed to subscribe heads on out-of-sync RPC node");
                self.declare_unreachable();
                return;
            }
        };
        tracing::trace!(node = %self, "Successfully subscribed to heads feed on out-of-sync RPC node");

        let zombie_check = with_jitter(self.chain_config.zombie_node_check_interval());
        let mut zombie = Box::pin(sleep(zombie_check));
        let mut local = self.state_and_latest().1;

        let in_sync = loop {
            tokio::select! {
                _ = stop.stopped() => break None,

                head = heads.recv() => {
                    let Some(head) = head else {
                        tracing::error!(node = %self, "Subscription channel unexpectedly closed");
                        break Some(false);
                    };
                    if !self.on_new_head(&mut local, &head) {
                        continue;
                    }
                    let (number, td) = (head.block_number(), head.block_difficulty());
                    if !self.is_out_of_sync(check, number, td) {
                        tracing::info!(
                            node = %self,
                            block_number = number,
                            "{MSG_IN_SYNC}: {}. Node was out-of-sync for {:?}",
                            self,
                            out_of_sync_at.elapsed()
                        );
                        break Some(true);
                    }
                    tracing::debug!(node = %self, block_number = number, "{MSG_RECEIVED_BLOCK}");
                }

                _ = zombie.as_mut() => {
                    if self.pool_has_fewer_live_nodes_than(1) {
                        tracing::error!(
                            node = %self,
                            critical = true,
                            "RPC endpoint is still out of sync, but there are no other available nodes. This RPC node will be forcibly moved back into the live pool in a degraded state"
                        );
                        break Some(true);
                    }
                    zombie.as_mut().reset(Instant::now() + zombie_check);
                }

                err = sub.terminated() => {
                    tracing::error!(node = %self, error = ?err, "Subscription was terminated");
                    break Some(false);
                }
            }
        };

        sub.unsubscribe();
        match in_sync {
            None => {}
            Some(true) => self.declare_in_sync(),
            Some(false) => self.declare_unreachable(),
        }
    }

    // ─── Unreachable ─────────────────────────────────────────────────────────

    pub(super) async fn unreachable_loop(self: Arc<Self>) {
        match self.state() {
            NodeState::Unreachable => {}
            NodeState::Closed => return,
            other => panic!("unreachable_loop can only run for node in Unreachable state, got: {other}"),
        }
        let mut stop = self.stop_signal();
        let unreachable_at = Instant::now();
        tracing::debug!(node = %self, "Trying to revive unreachable RPC node");

        let mut backoff = RedialBackoff::default();
        loop {
            if stop.guard(sleep(backoff.next_delay())).await.is_none() {
                return;
            }
            tracing::trace!(node = %self, "Trying to re-dial RPC node");
            match stop.guard(self.rpc.dial()).await {
                None => return,
                Some(Err(e)) => {
                    tracing::error!(
                        node = %self,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to redial RPC node; still unreachable"
                    );
                    continue;
                }
                Some(Ok(())) => {}
            }
            if !self.set_state(NodeState::Dialed) {
                return;
            }
            match self.verify_chain_id(&mut stop).await {
                NodeState::Unreachable => {
                    tracing::error!(node = %self, "Failed to redial RPC node; verify failed");
                    if !self.set_state(NodeState::Unreachable) {
                        return;
                    }
                }
                NodeState::Alive => {
                    tracing::info!(
                        node = %self,
                        "Successfully redialled and verified RPC node {}. Node was offline for {:?}",
                        self,
                        unreachable_at.elapsed()
                    );
                    self.declare_alive();
                    return;
                }
                state => {
                    self.declare_state(state);
                    return;
                }
            }
        }
    }

    // ─── InvalidChainId ──────────────────────────────────────────────────────

    pub(super) async fn invalid_chain_id_loop(self: Arc<Self>) {
        match self.state() {
            NodeState::InvalidChainId => {}
            NodeState::Closed => return,
            other => panic!("invalid_chain_id_loop can only run for node in InvalidChainID state, got: {other}"),
        }
        let mut stop = self.stop_signal();
        let invalid_at = Instant::now();
        tracing::debug!(node = %self, "Trying to verify RPC node chain ID");

        let state = self.create_verified_conn(&mut stop).await;
        if state != NodeState::InvalidChainId {
            self.declare_state(state);
            return;
        }

        let mut backoff = RedialBackoff::default();
        loop {
            if stop.guard(sleep(backoff.next_delay())).await.is_none() {
                return;
            }
            match self.verify_chain_id(&mut stop).await {
                NodeState::InvalidChainId => continue,
                NodeState::Alive => {
                    tracing::info!(
                        node = %self,
                        "Successfully verified RPC node. Node was offline for {:?}",
                        invalid_at.elapsed()
                    );
                    self.declare_alive();
                    return;
                }
                NodeState::Unreachable => {
                    tracing::error!(node = %self, "Unexpected error while verifying RPC node chain ID");
                    self.declare_unreachable();
                    return;
                }
                state => {
                    self.declare_state(state);
                    return;
                }
            }
        }
    }
}
