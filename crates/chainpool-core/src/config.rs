//! Pool and chain configuration.
//!
//! Loading is left to the embedding application; these structs deserialize
//! with serde and fall back to [`Default`] for missing fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SelectionMode;

/// Upper bound on a single query, also the ceiling for the zombie-node check.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-pool node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePoolConfig {
    /// Consecutive failed liveness polls before a node is declared unreachable.
    /// Zero disables the check.
    pub poll_failure_threshold: u32,
    /// Interval between liveness polls. Zero disables polling.
    pub poll_interval: Duration,
    pub selection_mode: SelectionMode,
    /// How many blocks (or units of difficulty) a node may lag the pool
    /// before it is declared out of sync. Zero disables the check.
    pub sync_threshold: u32,
    /// Interval at which the pool re-evaluates its active node. Zero disables
    /// lease switching.
    pub lease_duration: Duration,
    /// How long every primary must be down before the pool reports itself
    /// as having no primary nodes.
    pub death_declaration_delay: Duration,
    /// Interval of the pool's state report.
    pub report_interval: Duration,
}

impl Default for NodePoolConfig {
    fn default() -> Self {
        Self {
            poll_failure_threshold: 5,
            poll_interval: Duration::from_secs(10),
            selection_mode: SelectionMode::HighestHead,
            sync_threshold: 5,
            lease_duration: Duration::ZERO,
            death_declaration_delay: Duration::from_secs(10),
            report_interval: Duration::from_millis(6500),
        }
    }
}

impl NodePoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid("report_interval must be positive".into()));
        }
        Ok(())
    }
}

/// Per-chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// A node that produces no new head for this long is out of sync.
    /// Zero disables the check.
    pub no_new_heads_threshold: Duration,
    /// Same as `no_new_heads_threshold`, for finalized heads. Only applies
    /// when `finality_tag_enabled`.
    pub no_new_finalized_heads_threshold: Duration,
    /// Finalized heads come from a dedicated subscription instead of being
    /// derived from `finality_depth`.
    pub finality_tag_enabled: bool,
    pub finality_depth: u32,
    /// How long the transaction sender waits for more replies after the first.
    pub send_tx_soft_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            no_new_heads_threshold: Duration::from_secs(180),
            no_new_finalized_heads_threshold: Duration::ZERO,
            finality_tag_enabled: false,
            finality_depth: 50,
            send_tx_soft_timeout: QUERY_TIMEOUT / 2,
        }
    }
}

impl ChainConfig {
    /// Interval used to re-check the pool while a node is out of sync.
    pub fn zombie_node_check_interval(&self) -> Duration {
        let threshold = self.no_new_heads_threshold;
        if threshold.is_zero() || threshold > QUERY_TIMEOUT {
            QUERY_TIMEOUT
        } else {
            threshold
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_tx_soft_timeout.is_zero() {
            return Err(ConfigError::Invalid("send_tx_soft_timeout must be positive".into()));
        }
        Ok(())
    }
}
