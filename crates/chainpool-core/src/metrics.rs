//! Pool metrics definitions.
//!
//! All instruments come from the global OpenTelemetry meter, so they are
//! no-ops until the embedding application installs a meter provider.

use std::sync::OnceLock;

use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    KeyValue,
};

use crate::types::NodeState;

/// Central metrics handle for the pool.
#[derive(Clone)]
pub struct PoolMetrics {
    pub node_transitions: Counter<u64>,
    pub polls_total: Counter<u64>,
    pub polls_failed: Counter<u64>,
    pub polls_success: Counter<u64>,
    pub verifies: Counter<u64>,
    pub verifies_failed: Counter<u64>,
    pub verifies_success: Counter<u64>,
    pub seen_blocks: Counter<u64>,
    pub highest_seen_block: Gauge<i64>,
    pub highest_finalized_block: Gauge<i64>,
    pub node_states: Gauge<u64>,
    pub invariant_violations: Counter<u64>,
}

/// Returns the process-wide metrics handle.
pub fn metrics() -> &'static PoolMetrics {
    static METRICS: OnceLock<PoolMetrics> = OnceLock::new();
    METRICS.get_or_init(PoolMetrics::new)
}

impl PoolMetrics {
    fn new() -> Self {
        let meter = global::meter("chainpool");
        Self {
            node_transitions: meter
                .u64_counter("pool_rpc_node_transitions")
                .with_description("Node state transitions, by destination state")
                .build(),
            polls_total: meter
                .u64_counter("pool_rpc_node_polls_total")
                .with_description("Liveness polls issued")
                .build(),
            polls_failed: meter
                .u64_counter("pool_rpc_node_polls_failed")
                .with_description("Liveness polls that failed or timed out")
                .build(),
            polls_success: meter
                .u64_counter("pool_rpc_node_polls_success")
                .with_description("Liveness polls that succeeded")
                .build(),
            verifies: meter
                .u64_counter("pool_rpc_node_verifies")
                .with_description("Chain ID verifications attempted")
                .build(),
            verifies_failed: meter
                .u64_counter("pool_rpc_node_verifies_failed")
                .with_description("Chain ID verifications that errored or mismatched")
                .build(),
            verifies_success: meter
                .u64_counter("pool_rpc_node_verifies_success")
                .with_description("Chain ID verifications that matched")
                .build(),
            seen_blocks: meter
                .u64_counter("pool_rpc_node_num_seen_blocks")
                .with_description("Heads received by a node")
                .build(),
            highest_seen_block: meter
                .i64_gauge("pool_rpc_node_highest_seen_block")
                .with_description("Highest block number seen by a node")
                .build(),
            highest_finalized_block: meter
                .i64_gauge("pool_rpc_node_highest_finalized_block")
                .with_description("Highest finalized block number seen by a node")
                .build(),
            node_states: meter
                .u64_gauge("multi_node_states")
                .with_description("Number of primary nodes in each state")
                .build(),
            invariant_violations: meter
                .u64_counter("send_tx_invariant_violations")
                .with_description("Contradicting replies observed while broadcasting a transaction")
                .build(),
        }
    }

    pub fn record_transition(&self, chain_id: &str, node: &str, to: NodeState) {
        self.node_transitions.add(
            1,
            &[
                KeyValue::new("chain_id", chain_id.to_string()),
                KeyValue::new("node", node.to_string()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }

    pub fn record_poll(&self, chain_id: &str, node: &str, ok: bool) {
        let attrs = [
            KeyValue::new("chain_id", chain_id.to_string()),
            KeyValue::new("node", node.to_string()),
        ];
        self.polls_total.add(1, &attrs);
        if ok {
            self.polls_success.add(1, &attrs);
        } else {
            self.polls_failed.add(1, &attrs);
        }
    }

    pub fn record_verify(&self, chain_id: &str, node: &str, ok: bool) {
        let attrs = [
            KeyValue::new("chain_id", chain_id.to_string()),
            KeyValue::new("node", node.to_string()),
        ];
        self.verifies.add(1, &attrs);
        if ok {
            self.verifies_success.add(1, &attrs);
        } else {
            self.verifies_failed.add(1, &attrs);
        }
    }

    pub fn record_head(&self, chain_id: &str, node: &str, block_number: i64) {
        let attrs = [
            KeyValue::new("chain_id", chain_id.to_string()),
            KeyValue::new("node", node.to_string()),
        ];
        self.seen_blocks.add(1, &attrs);
        self.highest_seen_block.record(block_number, &attrs);
    }

    pub fn record_finalized(&self, chain_id: &str, node: &str, block_number: i64) {
        self.highest_finalized_block.record(
            block_number,
            &[
                KeyValue::new("chain_id", chain_id.to_string()),
                KeyValue::new("node", node.to_string()),
            ],
        );
    }

    pub fn record_node_states(&self, chain_id: &str, state: NodeState, count: u64) {
        self.node_states.record(
            count,
            &[
                KeyValue::new("chain_id", chain_id.to_string()),
                KeyValue::new("state", state.as_str()),
            ],
        );
    }

    pub fn record_invariant_violation(&self, chain_id: &str) {
        self.invariant_violations
            .add(1, &[KeyValue::new("chain_id", chain_id.to_string())]);
    }
}
