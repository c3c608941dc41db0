//! Role traits the pool is generic over, and the subscription handle.
//!
//! The pool never speaks a wire protocol itself. A chain integration supplies
//! an [`RpcClient`] implementation (and a [`TransactionClient`] when it wants
//! to broadcast transactions) whose associated [`ChainId`] and [`Head`] types
//! describe the chain.

use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::RpcError;

/// Chain identifier. Compared with `==`, rendered with `Display`.
pub trait ChainId: Clone + PartialEq + Display + Debug + Send + Sync + 'static {}

impl<T> ChainId for T where T: Clone + PartialEq + Display + Debug + Send + Sync + 'static {}

/// A block header as delivered by a head subscription.
pub trait Head: Send + Sync + 'static {
    fn block_number(&self) -> i64;

    /// Total difficulty at this block, `None` when the chain does not report it.
    fn block_difficulty(&self) -> Option<U256>;

    fn is_valid(&self) -> bool;
}

/// Connection to a single RPC endpoint.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one client is shared between the
/// node's lifecycle task and every consumer that obtained it from the pool.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    type ChainId: ChainId;
    type Head: Head;

    /// Establish the underlying connection.
    async fn dial(&self) -> Result<(), RpcError>;

    /// Chain ID reported by the remote endpoint.
    async fn chain_id(&self) -> Result<Self::ChainId, RpcError>;

    /// Cheap liveness check.
    async fn client_version(&self) -> Result<String, RpcError>;

    /// Subscribe to new heads. Heads arrive on the receiver; the
    /// [`Subscription`] reports remote termination.
    async fn subscribe_new_heads(
        &self,
    ) -> Result<(mpsc::Receiver<Self::Head>, Subscription), RpcError>;

    /// Subscribe to finalized heads. Only used when the finality tag is enabled.
    async fn subscribe_finalized_heads(
        &self,
    ) -> Result<(mpsc::Receiver<Self::Head>, Subscription), RpcError> {
        Err(RpcError::Unsupported("finalized head subscription".into()))
    }

    /// Drop every subscription and in-flight request.
    fn disconnect_all(&self);

    /// Release the connection. Called once, after the node's tasks exited.
    fn close(&self);

    /// Number of live subscriptions held by consumers of this client.
    fn subscribers_count(&self) -> usize;

    /// Record the subscription owned by the node's alive loop so that
    /// [`unsubscribe_all_except_alive_loop`](Self::unsubscribe_all_except_alive_loop)
    /// leaves it in place.
    fn set_alive_loop_sub(&self, sub: Subscription);

    fn unsubscribe_all_except_alive_loop(&self);

    /// Endpoint identifier (URL or name).
    fn url(&self) -> &str;
}

/// An [`RpcClient`] able to submit transactions of type `Tx`.
#[async_trait]
pub trait TransactionClient<Tx: Send + Sync>: RpcClient {
    async fn send_transaction(&self, tx: &Tx) -> Result<(), RpcError>;
}

// ─── Subscription ─────────────────────────────────────────────────────────────

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionStatus {
    Active,
    Failed(String),
    Unsubscribed,
}

/// Handle to a remote head subscription.
///
/// Cloning shares the handle. The RPC implementation calls [`fail`](Self::fail)
/// when the remote side drops the subscription; the consumer observes it
/// through [`terminated`](Self::terminated).
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    status: Arc<watch::Sender<SubscriptionStatus>>,
}

impl Subscription {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SubscriptionStatus::Active);
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            status: Arc::new(status),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        *self.status.borrow() == SubscriptionStatus::Active
    }

    /// Cancel the subscription locally. No-op once terminated.
    pub fn unsubscribe(&self) {
        self.finish(SubscriptionStatus::Unsubscribed);
    }

    /// Mark the subscription as terminated by the remote side.
    pub fn fail(&self, reason: impl Into<String>) {
        self.finish(SubscriptionStatus::Failed(reason.into()));
    }

    fn finish(&self, next: SubscriptionStatus) {
        self.status.send_if_modified(|status| {
            if *status == SubscriptionStatus::Active {
                *status = next;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the subscription is no longer active. Returns the
    /// remote error, or `None` after a local unsubscribe.
    pub async fn terminated(&self) -> Option<RpcError> {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|s| *s != SubscriptionStatus::Active).await {
            Ok(status) => status.clone(),
            Err(_) => return None,
        };
        match status {
            SubscriptionStatus::Failed(reason) => Some(RpcError::Subscription(reason)),
            _ => None,
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscription {}
