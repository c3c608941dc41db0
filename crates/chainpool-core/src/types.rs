//! Shared value types: node states, chain snapshots, selection modes and
//! transaction return codes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── NodeState ────────────────────────────────────────────────────────────────

/// Lifecycle state of a primary or send-only node.
///
/// `Closed` is terminal: once entered, every further transition request is
/// silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeState {
    /// Constructed but `start` has not run yet.
    Undialed,
    /// Connection established, chain ID not yet verified.
    Dialed,
    /// Remote endpoint reports a chain ID different from the configured one.
    InvalidChainId,
    /// Verified and tracking heads.
    Alive,
    /// Dial, subscription or poll failures; redialing with backoff.
    Unreachable,
    /// Fell behind the pool or stopped producing heads.
    OutOfSync,
    /// Permanently unusable (send-only dial failure).
    Unusable,
    /// Shut down.
    Closed,
}

impl NodeState {
    /// Every state, in declaration order.
    pub const ALL: [NodeState; 8] = [
        NodeState::Undialed,
        NodeState::Dialed,
        NodeState::InvalidChainId,
        NodeState::Alive,
        NodeState::Unreachable,
        NodeState::OutOfSync,
        NodeState::Unusable,
        NodeState::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undialed => "Undialed",
            Self::Dialed => "Dialed",
            Self::InvalidChainId => "InvalidChainID",
            Self::Alive => "Alive",
            Self::Unreachable => "Unreachable",
            Self::OutOfSync => "OutOfSync",
            Self::Unusable => "Unusable",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ChainInfo ────────────────────────────────────────────────────────────────

/// Height/weight snapshot observed on a node or aggregated across the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainInfo {
    pub block_number: i64,
    pub finalized_block_number: i64,
    /// `None` when the chain (or endpoint) does not report difficulty.
    pub total_difficulty: Option<U256>,
}

impl ChainInfo {
    /// Replace `total_difficulty` when `td` is known and strictly greater.
    pub fn set_total_difficulty_if_greater(&mut self, td: Option<U256>) {
        let Some(td) = td else { return };
        match self.total_difficulty {
            Some(current) if current >= td => {}
            _ => self.total_difficulty = Some(td),
        }
    }

    /// Raise every field to the maximum of `self` and `other`.
    pub fn merge_max(&mut self, other: &ChainInfo) {
        self.block_number = self.block_number.max(other.block_number);
        self.finalized_block_number = self
            .finalized_block_number
            .max(other.finalized_block_number);
        self.set_total_difficulty_if_greater(other.total_difficulty);
    }
}

/// Lexicographic by block number, then finalized block number, then
/// difficulty. A known difficulty is not comparable with an unknown one.
impl PartialOrd for ChainInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.block_number.cmp(&other.block_number) {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self
            .finalized_block_number
            .cmp(&other.finalized_block_number)
        {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match (self.total_difficulty, other.total_difficulty) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

// ─── SelectionMode ────────────────────────────────────────────────────────────

/// Strategy used by the pool to pick its active node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    #[default]
    HighestHead,
    RoundRobin,
    TotalDifficulty,
    PriorityLevel,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighestHead => "HighestHead",
            Self::RoundRobin => "RoundRobin",
            Self::TotalDifficulty => "TotalDifficulty",
            Self::PriorityLevel => "PriorityLevel",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HighestHead" => Ok(Self::HighestHead),
            "RoundRobin" => Ok(Self::RoundRobin),
            "TotalDifficulty" => Ok(Self::TotalDifficulty),
            "PriorityLevel" => Ok(Self::PriorityLevel),
            other => Err(ConfigError::UnknownSelectionMode(other.to_string())),
        }
    }
}

// ─── SendTxReturnCode ─────────────────────────────────────────────────────────

/// Classified outcome of broadcasting a transaction to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SendTxReturnCode {
    Successful,
    Fatal,
    Retryable,
    Underpriced,
    Unknown,
    Unsupported,
    TransactionAlreadyKnown,
    InsufficientFunds,
    ExceedsMaxFee,
    FeeOutOfValidRange,
    OutOfCounters,
}

impl SendTxReturnCode {
    /// Codes meaning the transaction reached the mempool.
    pub const SUCCESS: [SendTxReturnCode; 2] = [
        SendTxReturnCode::Successful,
        SendTxReturnCode::TransactionAlreadyKnown,
    ];

    /// Terminal codes, in the order they win aggregation.
    pub const SEVERE: [SendTxReturnCode; 6] = [
        SendTxReturnCode::Fatal,
        SendTxReturnCode::Underpriced,
        SendTxReturnCode::Unsupported,
        SendTxReturnCode::ExceedsMaxFee,
        SendTxReturnCode::FeeOutOfValidRange,
        SendTxReturnCode::Unknown,
    ];

    pub fn is_success(&self) -> bool {
        Self::SUCCESS.contains(self)
    }

    pub fn is_severe(&self) -> bool {
        Self::SEVERE.contains(self)
    }
}

impl fmt::Display for SendTxReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
