//! Core domain types for chain monitoring.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::endpoint::Endpoint;

pub type BlockNumber = u64;
pub type Balance = u128;

/// Milliseconds since the Unix epoch, or 0 if the system clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static CHAIN_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique key of one chain connection.
///
/// Built from the endpoint host and port plus a nonce, so two connections
/// to the same URL (concurrent dials, or a reconnect) never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    /// Generate a fresh identity for a validated endpoint.
    pub fn generate(endpoint: &Endpoint) -> Self {
        let seq = CHAIN_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}_{}_{}{:03}",
            endpoint.host(),
            endpoint.port(),
            unix_millis(),
            seq % 1000
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional runtime modules detected once at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCapabilities {
    pub has_staking: bool,
    pub has_session: bool,
    pub has_babe: bool,
    pub has_balances: bool,
    pub has_governance: bool,
    pub has_identity: bool,
}

impl ChainCapabilities {
    /// Validator counts need both the staking and the session modules.
    pub fn has_validator_set(&self) -> bool {
        self.has_staking && self.has_session
    }
}

/// Runtime version as reported by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_name: String,
    pub spec_version: u32,
    pub impl_version: u32,
    pub authoring_version: u32,
    pub transaction_version: u32,
}

/// Descriptive facts about a chain, fetched once per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
    pub id: ChainId,
    /// Display name: the caller-supplied name, or the chain name.
    pub name: String,
    /// Chain name as reported by `system_chain`.
    pub chain_name: String,
    pub ws_url: String,
    pub runtime_version: RuntimeVersion,
    /// 0x-prefixed genesis hash.
    pub genesis_hash: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub ss58_format: u16,
    /// Nominal block time in milliseconds.
    pub block_time_ms: u64,
    pub capabilities: ChainCapabilities,
    pub connected_at_ms: u64,
}

/// One observed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: BlockNumber,
    pub hash: String,
    pub parent_hash: String,
    /// On-chain timestamp, or time of receipt for degraded records.
    pub timestamp_ms: u64,
    pub author: Option<String>,
    pub extrinsics_count: u32,
    /// SCALE-encoded block size in bytes.
    pub size: u64,
    pub finalized: bool,
    /// Set when the block body could not be fetched or decoded.
    pub degraded: bool,
}

impl BlockRecord {
    /// Minimal record kept when the block body is unavailable, so the
    /// window still reflects chain height.
    pub fn degraded(
        number: BlockNumber,
        hash: String,
        parent_hash: String,
        received_at_ms: u64,
    ) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp_ms: received_at_ms,
            author: None,
            extrinsics_count: 0,
            size: 0,
            finalized: false,
            degraded: true,
        }
    }
}

/// Network-wide statistics snapshot. Replaced as a whole on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub chain_id: ChainId,
    pub timestamp_ms: u64,
    pub block_number: BlockNumber,
    pub block_hash: String,
    pub block_time_ms: u64,
    pub finalized_block: BlockNumber,
    /// Decimal string, the value does not fit JSON numbers.
    pub total_issuance: String,
    pub active_validators: u32,
    pub waiting_validators: u32,
    pub total_validators: u32,
    pub era: u32,
    pub epoch: u64,
    /// Fraction of the current epoch elapsed (0.0 to 1.0).
    pub session_progress: f64,
}

/// Validator set sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorCounts {
    pub active: u32,
    pub total: u32,
}

impl ValidatorCounts {
    pub fn waiting(&self) -> u32 {
        self.total.saturating_sub(self.active)
    }
}

/// Era and session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EraProgress {
    pub era: u32,
    pub epoch: u64,
    pub session_progress: f64,
}

/// An active validator with its preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSummary {
    /// SS58-encoded account, using the chain's address format.
    pub account_id: String,
    /// Commission rate as a fraction (0.0 to 1.0).
    pub commission: f64,
    pub blocked: bool,
}

/// Lifecycle state of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnecting,
    Disconnected,
}

/// Derived liveness figures for a connection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStatus {
    pub is_connected: bool,
    pub latest_block_number: BlockNumber,
    pub latest_block_timestamp_ms: Option<u64>,
    pub finalized_block_number: BlockNumber,
    pub active_validators: u32,
    pub total_validators: u32,
}

/// One entry of the connection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub id: ChainId,
    pub name: String,
    pub ws_url: String,
    pub status: ConnectionStatus,
    pub connected_at_ms: u64,
    pub detailed_status: DetailedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health of one chain connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub chain_id: ChainId,
    pub status: HealthStatus,
    pub is_connected: bool,
    pub latest_block_number: BlockNumber,
    pub latest_block_timestamp_ms: u64,
    pub time_since_last_block_ms: u64,
    pub expected_block_time_ms: u64,
    pub connection_status: ConnectionStatus,
}

/// Inputs for a health evaluation.
#[derive(Debug, Clone)]
pub struct HealthInput<'a> {
    pub chain_id: &'a ChainId,
    pub is_connected: bool,
    pub connection_status: ConnectionStatus,
    pub latest_block: Option<&'a BlockRecord>,
    pub block_time_ms: u64,
    pub multiplier: u32,
    pub now_ms: u64,
}

impl HealthReport {
    /// A chain is healthy while connected and its latest block is younger
    /// than `multiplier` nominal block times. With no block yet, the
    /// elapsed time counts as zero.
    pub fn evaluate(input: HealthInput<'_>) -> Self {
        let latest_ts = input
            .latest_block
            .map(|b| b.timestamp_ms)
            .unwrap_or(input.now_ms);
        let elapsed = input.now_ms.saturating_sub(latest_ts);
        let threshold = input.block_time_ms.saturating_mul(input.multiplier as u64);

        let status = if input.is_connected && elapsed < threshold {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            chain_id: input.chain_id.clone(),
            status,
            is_connected: input.is_connected,
            latest_block_number: input.latest_block.map(|b| b.number).unwrap_or(0),
            latest_block_timestamp_ms: latest_ts,
            time_since_last_block_ms: elapsed,
            expected_block_time_ms: input.block_time_ms,
            connection_status: input.connection_status,
        }
    }
}

/// Pagination figures reported next to a page of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

/// A page of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T: Clone> Page<T> {
    /// Slice `items` into the 1-based `page` of size `limit`.
    /// Zero values are raised to 1. Pages past the end are empty.
    pub fn slice(items: &[T], page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let start = (page - 1).saturating_mul(limit).min(items.len());
        let end = start.saturating_add(limit).min(items.len());

        Self {
            items: items[start..end].to_vec(),
            pagination: Pagination {
                total: items.len(),
                page,
                limit,
                pages: items.len().div_ceil(limit),
            },
        }
    }
}
