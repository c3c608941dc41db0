//! Parallel transaction broadcast across the pool.
//!
//! A transaction goes to every alive primary node, and fire-and-forget to
//! every alive send-only node. Primary replies are classified into
//! [`SendTxReturnCode`]s and collected until one of them is a success, enough
//! of them have arrived, or the soft timeout expires after the first reply.
//! A background reporter sees every primary reply and records contradictions.
//!
//! When several cutoffs are ready at once the sender's own shutdown wins,
//! then the caller's deadline, then an available reply, then the soft timeout.

use std::collections::BTreeMap;
use std::future::pending;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant, Sleep};

use crate::config::ChainConfig;
use crate::error::{MultiNodeError, RpcError, SendTxError};
use crate::health::HealthErrors;
use crate::metrics::metrics;
use crate::multi_node::MultiNode;
use crate::rpc::TransactionClient;
use crate::task::TaskGroup;
use crate::types::SendTxReturnCode;

/// Share of alive primaries whose replies are enough to stop waiting.
const SEND_TX_QUORUM: f64 = 0.7;

/// Maps a node's reply to a return code.
pub trait SendTxClassifier<Tx>: Send + Sync + 'static {
    fn classify(&self, tx: &Tx, err: Option<&RpcError>) -> SendTxReturnCode;
}

impl<Tx, F> SendTxClassifier<Tx> for F
where
    F: Fn(&Tx, Option<&RpcError>) -> SendTxReturnCode + Send + Sync + 'static,
{
    fn classify(&self, tx: &Tx, err: Option<&RpcError>) -> SendTxReturnCode {
        self(tx, err)
    }
}

/// Aggregated result of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTxOutcome {
    pub code: SendTxReturnCode,
    /// Error reported by the node whose reply was picked.
    pub error: Option<RpcError>,
}

type SendTxResult = (SendTxReturnCode, Option<RpcError>);
type ResultsByCode = BTreeMap<SendTxReturnCode, Vec<Option<RpcError>>>;

/// Broadcasts transactions of type `Tx` through a [`MultiNode`].
pub struct TransactionSender<R, Tx>
where
    R: TransactionClient<Tx>,
    Tx: Send + Sync + 'static,
{
    chain_id: String,
    chain_config: Arc<ChainConfig>,
    multi_node: Arc<MultiNode<R>>,
    classifier: Arc<dyn SendTxClassifier<Tx>>,
    health: Arc<HealthErrors>,
    tasks: TaskGroup,
    started: AtomicBool,
    closed: AtomicBool,
    _tx: PhantomData<fn(Tx)>,
}

impl<R, Tx> TransactionSender<R, Tx>
where
    R: TransactionClient<Tx>,
    Tx: Send + Sync + 'static,
{
    pub fn new(
        chain_config: Arc<ChainConfig>,
        multi_node: Arc<MultiNode<R>>,
        classifier: impl SendTxClassifier<Tx>,
    ) -> Self {
        Self {
            chain_id: multi_node.chain_id().to_string(),
            chain_config,
            multi_node,
            classifier: Arc::new(classifier),
            health: Arc::new(HealthErrors::new()),
            tasks: TaskGroup::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            _tx: PhantomData,
        }
    }

    pub fn start(&self) -> Result<(), SendTxError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendTxError::Stopped);
        }
        self.chain_config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SendTxError::AlreadyStarted);
        }
        Ok(())
    }

    /// Abort in-flight broadcasts and wait for their tasks. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tasks.stop();
        self.tasks.wait().await;
    }

    /// Drain the invariant violations recorded since the last call.
    pub fn healthy(&self) -> Result<(), SendTxError> {
        let errors = self.health.drain();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SendTxError::Unhealthy(errors))
        }
    }

    pub async fn send_transaction(&self, tx: Tx) -> Result<SendTxOutcome, SendTxError> {
        self.broadcast(tx, None).await
    }

    /// Like [`send_transaction`](Self::send_transaction), giving up with
    /// [`SendTxError::DeadlineExceeded`] at `deadline`.
    pub async fn send_transaction_with_deadline(
        &self,
        tx: Tx,
        deadline: Instant,
    ) -> Result<SendTxOutcome, SendTxError> {
        self.broadcast(tx, Some(deadline)).await
    }

    async fn broadcast(&self, tx: Tx, deadline: Option<Instant>) -> Result<SendTxOutcome, SendTxError> {
        if self.closed.load(Ordering::SeqCst) || self.tasks.is_stopped() {
            return Err(SendTxError::Stopped);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(SendTxError::NotStarted);
        }
        if deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(SendTxError::DeadlineExceeded);
        }

        let tx = Arc::new(tx);
        let (results_tx, results_rx) = mpsc::unbounded_channel::<SendTxResult>();
        let (report_tx, report_rx) = mpsc::unbounded_channel::<SendTxResult>();
        let mut healthy = 0usize;

        let res = self.multi_node.do_all(|rpc, send_only| {
            let rpc = Arc::clone(rpc);
            let tx = Arc::clone(&tx);
            let classifier = Arc::clone(&self.classifier);
            let mut stop = self.tasks.stop_signal();
            if send_only {
                // Replies from send-only nodes are unreliable; they only help propagation.
                self.tasks.spawn(async move {
                    let _ = stop
                        .guard(Self::send_to_node(&*rpc, &tx, &*classifier, deadline))
                        .await;
                });
                return;
            }
            healthy += 1;
            let results_tx = results_tx.clone();
            let report_tx = report_tx.clone();
            self.tasks.spawn(async move {
                let Some(Some(result)) = stop
                    .guard(Self::send_to_node(&*rpc, &tx, &*classifier, deadline))
                    .await
                else {
                    return;
                };
                let _ = results_tx.send(result.clone());
                let _ = report_tx.send(result);
            });
        });
        drop(results_tx);
        drop(report_tx);

        match res {
            Ok(()) => {}
            Err(MultiNodeError::Stopped) => return Err(SendTxError::Stopped),
            Err(_) => return Err(SendTxError::NoLiveNodes),
        }

        self.spawn_anomaly_reporter(report_rx);
        self.collect(healthy, results_rx, deadline).await
    }

    /// Send to one node and classify the reply. `None` once `deadline` passed.
    async fn send_to_node(
        rpc: &R,
        tx: &Tx,
        classifier: &dyn SendTxClassifier<Tx>,
        deadline: Option<Instant>,
    ) -> Option<SendTxResult> {
        let reply = match deadline {
            Some(d) => tokio::time::timeout_at(d, rpc.send_transaction(tx)).await.ok()?,
            None => rpc.send_transaction(tx).await,
        };
        let err = reply.err();
        tracing::debug!(rpc = rpc.url(), error = ?err, "Node sent transaction");
        let code = classifier.classify(tx, err.as_ref());
        if !code.is_success() {
            tracing::warn!(rpc = rpc.url(), code = %code, error = ?err, "RPC returned error");
        }
        Some((code, err))
    }

    fn spawn_anomaly_reporter(&self, mut report_rx: mpsc::UnboundedReceiver<SendTxResult>) {
        let chain_id = self.chain_id.clone();
        let health = Arc::clone(&self.health);
        self.tasks.spawn(async move {
            let mut results = ResultsByCode::new();
            while let Some((code, err)) = report_rx.recv().await {
                results.entry(code).or_default().push(err);
            }
            let (_, violation) = aggregate_tx_results(&results);
            if let Some(violation) = violation {
                let codes: Vec<_> = results.iter().map(|(c, errs)| (*c, errs.len())).collect();
                health.push(violation.to_string());
                metrics().record_invariant_violation(&chain_id);
                tracing::error!(
                    critical = true,
                    chain_id = %chain_id,
                    results = ?codes,
                    error = %violation,
                    "observed invariant violation on SendTransaction"
                );
            }
        });
    }

    async fn collect(
        &self,
        healthy: usize,
        mut results_rx: mpsc::UnboundedReceiver<SendTxResult>,
        deadline: Option<Instant>,
    ) -> Result<SendTxOutcome, SendTxError> {
        if healthy == 0 {
            return Err(SendTxError::NoLiveNodes);
        }
        let required = (healthy as f64 * SEND_TX_QUORUM).ceil() as usize;
        let mut stop = self.tasks.stop_signal();
        let deadline_timer = async {
            match deadline {
                Some(d) => sleep_until(d).await,
                None => pending().await,
            }
        };
        tokio::pin!(deadline_timer);
        let mut soft_timeout: Option<Pin<Box<Sleep>>> = None;
        let mut results = ResultsByCode::new();
        let mut count = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => return Err(SendTxError::Stopped),
                _ = &mut deadline_timer => {
                    tracing::debug!(
                        chain_id = %self.chain_id,
                        collected = count,
                        "Failed to collect the results before the deadline"
                    );
                    return Err(SendTxError::DeadlineExceeded);
                }
                result = results_rx.recv() => {
                    let Some((code, err)) = result else {
                        break;
                    };
                    results.entry(code).or_default().push(err);
                    count += 1;
                    if code.is_success() || count >= required {
                        break;
                    }
                }
                _ = async {
                    match soft_timeout.as_mut() {
                        Some(timer) => timer.await,
                        None => pending().await,
                    }
                } => {
                    tracing::debug!(
                        chain_id = %self.chain_id,
                        collected = count,
                        required,
                        "Send Tx soft timeout expired - returning responses we've collected so far"
                    );
                    break;
                }
            }
            if soft_timeout.is_none() {
                soft_timeout = Some(Box::pin(sleep(self.chain_config.send_tx_soft_timeout)));
            }
        }

        // Contradictions are reported by the anomaly reporter.
        aggregate_tx_results(&results).0
    }
}

/// Pick the broadcast result from the replies grouped by code, and report a
/// contradiction when one exists.
///
/// A success-class reply always wins. Severe codes beat the remaining ones.
/// A success together with a severe code is a contradiction.
pub(crate) fn aggregate_tx_results(
    results: &ResultsByCode,
) -> (Result<SendTxOutcome, SendTxError>, Option<SendTxError>) {
    let first_in = |codes: &[SendTxReturnCode]| {
        codes.iter().find_map(|code| {
            results.get(code).and_then(|errs| {
                errs.first().map(|err| SendTxOutcome {
                    code: *code,
                    error: err.clone(),
                })
            })
        })
    };
    let severe = first_in(&SendTxReturnCode::SEVERE[..]);

    if let Some(success) = first_in(&SendTxReturnCode::SUCCESS[..]) {
        let violation = severe.map(|_| SendTxError::Contradiction);
        return (Ok(success), violation);
    }
    if let Some(severe) = severe {
        return (Ok(severe), None);
    }
    let remaining = results.iter().find_map(|(code, errs)| {
        errs.first().map(|err| SendTxOutcome {
            code: *code,
            error: err.clone(),
        })
    });
    match remaining {
        Some(outcome) => (Ok(outcome), None),
        None => (Err(SendTxError::NoResponses), Some(SendTxError::NoResponses)),
    }
}
