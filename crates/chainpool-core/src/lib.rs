//! chainpool-core: fault-tolerant pool of blockchain RPC endpoints.
//!
//! # Overview
//!
//! The pool keeps a set of RPC endpoints for one chain healthy and hands out
//! the best of them. The core crate defines:
//!
//! - [`RpcClient`] / [`Head`] / [`ChainId`]: the roles a chain integration implements
//! - [`Node`]: one endpoint driven by a lifecycle state machine
//! - [`SendOnlyNode`]: a broadcast-only endpoint
//! - [`selector`] module: highest head, round robin, total difficulty, priority level
//! - [`MultiNode`]: the orchestrator owning nodes and the active-node choice
//! - [`TransactionSender`]: parallel broadcast with result aggregation
//!
//! Logging goes through `tracing`; metrics through the global OpenTelemetry
//! meter. Neither is installed by this crate.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod multi_node;
pub mod node;
pub mod policy;
pub mod rpc;
pub mod selector;
pub mod send_only;
pub mod transaction_sender;
pub mod types;

mod task;

#[cfg(test)]
mod testutil;

pub use config::{ChainConfig, NodePoolConfig, QUERY_TIMEOUT};
pub use error::{ConfigError, MultiNodeError, NodeError, RpcError, SendTxError};
pub use multi_node::MultiNode;
pub use node::{Node, PoolInfoProvider};
pub use rpc::{ChainId, Head, RpcClient, Subscription, TransactionClient};
pub use selector::{new_node_selector, NodeSelector};
pub use send_only::SendOnlyNode;
pub use transaction_sender::{SendTxClassifier, SendTxOutcome, TransactionSender};
pub use types::{ChainInfo, NodeState, SelectionMode, SendTxReturnCode};
