//! Error types for RPC collaborators, nodes, the pool and the transaction sender.

use thiserror::Error;

/// Errors reported by an underlying RPC connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Connection could not be established.
    #[error("dial failed: {0}")]
    Dial(String),

    /// JSON-RPC protocol-level error returned by the endpoint.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A head subscription was terminated by the remote side.
    #[error("subscription terminated: {0}")]
    Subscription(String),

    /// The collaborator does not implement the requested call.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dial(_) | Self::Timeout { .. } | Self::Subscription(_) | Self::Closed
        )
    }
}

/// Errors returned by node lifecycle calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {node} has already been started")]
    AlreadyStarted { node: String },
}

/// Invalid pool configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown node selection mode: {0}")]
    UnknownSelectionMode(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by the `MultiNode` orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MultiNodeError {
    #[error("no available nodes for chain {chain_id}")]
    NoNodes { chain_id: String },

    #[error(
        "node {node} has configured chain ID {node_chain_id} which does not match multinode configured chain ID of {chain_id}"
    )]
    ChainIdMismatch {
        node: String,
        node_chain_id: String,
        chain_id: String,
    },

    #[error(
        "sendonly node {node} has configured chain ID {node_chain_id} which does not match multinode configured chain ID of {chain_id}"
    )]
    SendOnlyChainIdMismatch {
        node: String,
        node_chain_id: String,
        chain_id: String,
    },

    #[error(transparent)]
    Node(#[from] NodeError),

    /// Every primary node is out of the live pool.
    #[error("no live nodes available")]
    NoLiveNodes,

    #[error("MultiNode has already been started")]
    AlreadyStarted,

    #[error("MultiNode is stopped")]
    Stopped,

    /// Critical errors recorded since the last health check.
    #[error("{}", .0.join("; "))]
    Unhealthy(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors returned by `TransactionSender`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendTxError {
    /// No primary node was alive to receive the transaction.
    #[error("no live nodes available")]
    NoLiveNodes,

    /// The caller's deadline passed before a result was available.
    #[error("deadline exceeded while broadcasting tx")]
    DeadlineExceeded,

    #[error("aborted while broadcasting tx - transaction sender is stopped")]
    Stopped,

    #[error("transaction sender has not been started")]
    NotStarted,

    #[error("transaction sender has already been started")]
    AlreadyStarted,

    #[error("expected at least one response on SendTransaction")]
    NoResponses,

    #[error("found contradictions in nodes replies on SendTransaction: got success and severe error")]
    Contradiction,

    #[error("{}", .0.join("; "))]
    Unhealthy(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
