//! One registered chain connection and the tasks attached to it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use subwatch_chain::ChainRpc;
use subwatch_core::{
    BlockNumber, BlockRecord, BlockWindow, ChainId, ChainMetadata, ChainSummary,
    ConnectionStatus, DetailedStatus, Endpoint, HealthInput, HealthReport, NetworkStats, Page,
    unix_millis,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which long-lived task a subscription entry drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    NewHeads,
    FinalizedHeads,
    StatsTimer,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::NewHeads => write!(f, "new heads"),
            SubscriptionKind::FinalizedHeads => write!(f, "finalized heads"),
            SubscriptionKind::StatsTimer => write!(f, "stats timer"),
        }
    }
}

struct Subscription {
    kind: SubscriptionKind,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable tasks owned by one connection, torn down together.
#[derive(Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn push(&mut self, kind: SubscriptionKind, token: CancellationToken, handle: JoinHandle<()>) {
        self.entries.push(Subscription {
            kind,
            token,
            handle,
        });
    }

    /// Tasks that have not finished yet.
    pub fn running(&self) -> usize {
        self.entries.iter().filter(|s| !s.handle.is_finished()).count()
    }

    /// Request cancellation of every task. Every entry is attempted; the
    /// handles are returned so the caller can wait for them.
    pub fn cancel_all(&mut self) -> Vec<(SubscriptionKind, JoinHandle<()>)> {
        self.entries
            .drain(..)
            .map(|s| {
                s.token.cancel();
                (s.kind, s.handle)
            })
            .collect()
    }
}

/// Wait for cancelled tasks to stop and log any that failed.
pub(crate) async fn reap(chain_id: ChainId, handles: Vec<(SubscriptionKind, JoinHandle<()>)>) {
    for (kind, handle) in handles {
        match handle.await {
            Ok(()) => tracing::debug!("{} task for {} stopped", kind, chain_id),
            Err(e) => tracing::warn!("{} task for {} did not stop cleanly: {}", kind, chain_id, e),
        }
    }
}

/// A live chain connection: RPC handle, metadata, rolling block window,
/// latest stats snapshot and the subscriptions that keep them current.
///
/// The window and the snapshot are only written by this connection's own
/// tasks. Every write checks the cancellation token under the lock, so
/// nothing is committed once teardown has started.
pub struct ChainConnection {
    metadata: ChainMetadata,
    endpoint: Endpoint,
    rpc: Arc<dyn ChainRpc>,
    window: RwLock<BlockWindow>,
    stats: RwLock<Option<Arc<NetworkStats>>>,
    cancel: CancellationToken,
    subscriptions: Mutex<SubscriptionSet>,
    tearing_down: AtomicBool,
    heads_closed: AtomicBool,
}

impl ChainConnection {
    pub(crate) fn new(
        metadata: ChainMetadata,
        endpoint: Endpoint,
        rpc: Arc<dyn ChainRpc>,
        window_size: usize,
    ) -> Self {
        Self {
            metadata,
            endpoint,
            rpc,
            window: RwLock::new(BlockWindow::new(window_size)),
            stats: RwLock::new(None),
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(SubscriptionSet::default()),
            tearing_down: AtomicBool::new(false),
            heads_closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ChainId {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &ChainMetadata {
        &self.metadata
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.tearing_down.load(Ordering::SeqCst) {
            ConnectionStatus::Disconnecting
        } else if self.heads_closed.load(Ordering::SeqCst) || !self.rpc.is_connected() {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Rolling window, newest first.
    pub async fn blocks(&self) -> Vec<BlockRecord> {
        self.window.read().await.to_vec()
    }

    pub async fn latest_block(&self) -> Option<BlockRecord> {
        self.window.read().await.latest().cloned()
    }

    pub async fn block_page(&self, page: usize, limit: usize) -> Page<BlockRecord> {
        self.window.read().await.page(page, limit)
    }

    /// Latest stats snapshot, if one has been computed.
    pub async fn stats(&self) -> Option<Arc<NetworkStats>> {
        self.stats.read().await.clone()
    }

    pub async fn running_subscriptions(&self) -> usize {
        self.subscriptions.lock().await.running()
    }

    pub async fn summary(&self) -> ChainSummary {
        let latest = self.latest_block().await;
        let stats = self.stats().await;
        let status = self.status();

        ChainSummary {
            id: self.id().clone(),
            name: self.metadata.name.clone(),
            ws_url: self.metadata.ws_url.clone(),
            status,
            connected_at_ms: self.metadata.connected_at_ms,
            detailed_status: DetailedStatus {
                is_connected: status == ConnectionStatus::Connected,
                latest_block_number: latest.as_ref().map(|b| b.number).unwrap_or(0),
                latest_block_timestamp_ms: latest.as_ref().map(|b| b.timestamp_ms),
                finalized_block_number: stats.as_ref().map(|s| s.finalized_block).unwrap_or(0),
                active_validators: stats.as_ref().map(|s| s.active_validators).unwrap_or(0),
                total_validators: stats.as_ref().map(|s| s.total_validators).unwrap_or(0),
            },
        }
    }

    pub async fn health(&self, multiplier: u32) -> HealthReport {
        let latest = self.latest_block().await;
        let status = self.status();
        HealthReport::evaluate(HealthInput {
            chain_id: self.id(),
            is_connected: status == ConnectionStatus::Connected,
            connection_status: status,
            latest_block: latest.as_ref(),
            block_time_ms: self.metadata.block_time_ms,
            multiplier,
            now_ms: unix_millis(),
        })
    }

    /// Insert a block at the front of the window.
    /// Returns false once teardown has started.
    pub(crate) async fn record_block(&self, block: BlockRecord) -> bool {
        let mut window = self.window.write().await;
        if self.cancel.is_cancelled() {
            return false;
        }
        window.push(block);
        true
    }

    /// Flip the finalized flag of `number` if it is still in the window.
    pub(crate) async fn mark_finalized(&self, number: BlockNumber) -> bool {
        let mut window = self.window.write().await;
        if self.cancel.is_cancelled() {
            return false;
        }
        window.mark_finalized(number)
    }

    /// Replace the stats snapshot as a whole.
    /// Returns false once teardown has started.
    pub(crate) async fn replace_stats(&self, stats: NetworkStats) -> bool {
        let mut slot = self.stats.write().await;
        if self.cancel.is_cancelled() {
            return false;
        }
        *slot = Some(Arc::new(stats));
        true
    }

    pub(crate) fn mark_heads_closed(&self) {
        self.heads_closed.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn attach(
        &self,
        kind: SubscriptionKind,
        token: CancellationToken,
        handle: JoinHandle<()>,
    ) {
        self.subscriptions.lock().await.push(kind, token, handle);
    }

    /// Claim the teardown. Only the first caller gets true.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.tearing_down.swap(true, Ordering::SeqCst)
    }

    /// Cancel every subscription and close the RPC handle.
    ///
    /// In-flight calls are left to finish; their results are discarded by
    /// the cancellation check on commit.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = self.subscriptions.lock().await.cancel_all();
        self.rpc.close().await;
        tokio::spawn(reap(self.id().clone(), handles));
    }
}

impl fmt::Debug for ChainConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConnection")
            .field("id", self.id())
            .field("endpoint", &self.endpoint.as_str())
            .field("status", &self.status())
            .finish()
    }
}
