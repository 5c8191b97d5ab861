//! In-memory chain used by the tests.
//!
//! `FakeConnector` hands out a fresh `FakeRpc` per dial and keeps them so
//! tests can inject heads, script failures and count calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use subwatch_chain::{ChainConnector, ChainError, ChainFacts, ChainHead, ChainRpc, HeadStream};
use subwatch_core::{
    Balance, BlockNumber, BlockRecord, ChainCapabilities, ChainEndpointRequest, EraProgress,
    MonitorConfig, RuntimeVersion, ValidatorCounts, ValidatorSummary,
};

use crate::connection::ChainConnection;
use crate::registry::{ChainRegistry, build_metadata};

/// Poll `$cond` every 10ms for up to 2s. Evaluates to whether it held.
macro_rules! wait_for {
    ($cond:expr) => {{
        let mut held = false;
        for _ in 0..200 {
            if $cond {
                held = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        held
    }};
}

pub(crate) const TEST_URL: &str = "wss://rpc.example/ws";

type HeadSender = UnboundedSender<Result<ChainHead, ChainError>>;
type HeadReceiver = UnboundedReceiver<Result<ChainHead, ChainError>>;

pub(crate) fn head(number: BlockNumber) -> ChainHead {
    ChainHead {
        number,
        hash: format!("0x{:064x}", number),
        parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
    }
}

pub(crate) fn fake_facts(capabilities: ChainCapabilities) -> ChainFacts {
    ChainFacts {
        chain_name: "Fakechain".to_string(),
        runtime_version: RuntimeVersion {
            spec_name: "fakechain".to_string(),
            spec_version: 1_000,
            impl_version: 0,
            authoring_version: 1,
            transaction_version: 1,
        },
        genesis_hash: format!("0x{}", "ab".repeat(32)),
        token_symbol: "FAKE".to_string(),
        token_decimals: 10,
        ss58_format: 42,
        block_time_ms: 6_000,
        capabilities,
    }
}

pub(crate) fn full_capabilities() -> ChainCapabilities {
    ChainCapabilities {
        has_staking: true,
        has_session: true,
        has_babe: true,
        has_balances: true,
        has_governance: false,
        has_identity: false,
    }
}

/// Short timeouts; periodic tasks effectively fire once.
pub(crate) fn test_config() -> MonitorConfig {
    MonitorConfig {
        dial_timeout: Duration::from_millis(300),
        stats_interval: Duration::from_secs(3600),
        stats_query_timeout: Duration::from_millis(300),
        block_fetch_timeout: Duration::from_millis(300),
        broadcast_interval: Duration::from_secs(3600),
        viewer_buffer: 8,
        ..MonitorConfig::default()
    }
}

pub(crate) struct FakeRpc {
    facts: ChainFacts,
    new_heads_tx: HeadSender,
    new_heads_rx: Mutex<Option<HeadReceiver>>,
    finalized_tx: HeadSender,
    finalized_rx: Mutex<Option<HeadReceiver>>,
    failing_blocks: Mutex<HashSet<BlockNumber>>,
    stats_failures: AtomicUsize,
    best_number: AtomicU64,
    pub best_head_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    connected: AtomicBool,
}

impl FakeRpc {
    pub fn new(facts: ChainFacts) -> Self {
        let (new_heads_tx, new_heads_rx) = unbounded();
        let (finalized_tx, finalized_rx) = unbounded();
        Self {
            facts,
            new_heads_tx,
            new_heads_rx: Mutex::new(Some(new_heads_rx)),
            finalized_tx,
            finalized_rx: Mutex::new(Some(finalized_rx)),
            failing_blocks: Mutex::new(HashSet::new()),
            stats_failures: AtomicUsize::new(0),
            best_number: AtomicU64::new(100),
            best_head_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        }
    }

    /// Deliver a new head. Ignored once the listener is gone.
    pub fn push_head(&self, number: BlockNumber) {
        let _ = self.new_heads_tx.unbounded_send(Ok(head(number)));
    }

    pub fn push_finalized(&self, number: BlockNumber) {
        let _ = self.finalized_tx.unbounded_send(Ok(head(number)));
    }

    /// End the new-heads stream, as a dropped transport would.
    pub fn end_new_heads(&self) {
        self.new_heads_tx.close_channel();
    }

    pub fn fail_block(&self, number: BlockNumber) {
        self.failing_blocks.lock().unwrap().insert(number);
    }

    /// Fail the next `n` best-head queries.
    pub fn fail_stats(&self, n: usize) {
        self.stats_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_best(&self, number: BlockNumber) {
        self.best_number.store(number, Ordering::SeqCst);
    }

    fn take(slot: &Mutex<Option<HeadReceiver>>) -> Result<HeadStream, ChainError> {
        slot.lock()
            .unwrap()
            .take()
            .map(|rx| rx.boxed())
            .ok_or_else(|| ChainError::Rpc("already subscribed".into()))
    }
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn chain_facts(&self) -> Result<ChainFacts, ChainError> {
        Ok(self.facts.clone())
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ChainError> {
        Self::take(&self.new_heads_rx)
    }

    async fn subscribe_finalized_heads(&self) -> Result<HeadStream, ChainError> {
        Self::take(&self.finalized_rx)
    }

    async fn fetch_block(&self, head: &ChainHead) -> Result<BlockRecord, ChainError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_blocks.lock().unwrap().contains(&head.number) {
            return Err(ChainError::Rpc("unable to decode block".into()));
        }
        Ok(BlockRecord {
            number: head.number,
            hash: head.hash.clone(),
            parent_hash: head.parent_hash.clone(),
            timestamp_ms: 1_700_000_000_000 + head.number * 6_000,
            author: None,
            extrinsics_count: 3,
            size: 256,
            finalized: false,
            degraded: false,
        })
    }

    async fn best_head(&self) -> Result<ChainHead, ChainError> {
        self.best_head_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .stats_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::Rpc("best head unavailable".into()));
        }
        Ok(head(self.best_number.load(Ordering::SeqCst)))
    }

    async fn finalized_head(&self) -> Result<ChainHead, ChainError> {
        Ok(head(self.best_number.load(Ordering::SeqCst).saturating_sub(2)))
    }

    async fn total_issuance(&self) -> Result<Balance, ChainError> {
        Ok(12_000_000_000_000_000_000)
    }

    async fn validator_counts(&self) -> Result<ValidatorCounts, ChainError> {
        Ok(ValidatorCounts {
            active: 297,
            total: 350,
        })
    }

    async fn era_progress(
        &self,
        _capabilities: ChainCapabilities,
    ) -> Result<EraProgress, ChainError> {
        Ok(EraProgress {
            era: 1_500,
            epoch: 9_000,
            session_progress: 0.5,
        })
    }

    async fn active_validators(
        &self,
        offset: usize,
        limit: usize,
        _ss58_format: u16,
    ) -> Result<Vec<ValidatorSummary>, ChainError> {
        Ok((offset..(offset + limit).min(5))
            .map(|i| ValidatorSummary {
                account_id: format!("validator-{}", i),
                commission: 0.05,
                blocked: false,
            })
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialMode {
    Accept,
    Refuse,
    Hang,
}

pub(crate) struct FakeConnector {
    mode: Mutex<DialMode>,
    capabilities: ChainCapabilities,
    stats_failures: AtomicUsize,
    dials: AtomicUsize,
    rpcs: Mutex<Vec<Arc<FakeRpc>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(full_capabilities())
    }

    pub fn with_capabilities(capabilities: ChainCapabilities) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(DialMode::Accept),
            capabilities,
            stats_failures: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            rpcs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: DialMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Every chain dialed from now on fails its first `n` stats queries.
    pub fn fail_stats_on_dial(&self, n: usize) {
        self.stats_failures.store(n, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn last_rpc(&self) -> Arc<FakeRpc> {
        self.rpcs.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChainConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn ChainRpc>, ChainError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            DialMode::Accept => {
                let rpc = Arc::new(FakeRpc::new(fake_facts(self.capabilities)));
                rpc.fail_stats(self.stats_failures.load(Ordering::SeqCst));
                self.rpcs.lock().unwrap().push(rpc.clone());
                Ok(rpc as Arc<dyn ChainRpc>)
            }
            DialMode::Refuse => Err(ChainError::Connection("connection refused".into())),
            DialMode::Hang => std::future::pending().await,
        }
    }
}

pub(crate) fn test_registry(connector: Arc<FakeConnector>) -> Arc<ChainRegistry> {
    Arc::new(ChainRegistry::new(connector, test_config()))
}

/// A connection with no tasks attached, for driving the monitor and
/// refresher by hand.
pub(crate) fn detached_connection(rpc: Arc<FakeRpc>) -> Arc<ChainConnection> {
    let request = ChainEndpointRequest::new(TEST_URL);
    let endpoint = request.validate().unwrap();
    let metadata = build_metadata(&endpoint, &request, rpc.facts.clone());
    Arc::new(ChainConnection::new(metadata, endpoint, rpc, 10))
}
