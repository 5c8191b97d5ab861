//! The chain RPC capability used by the connection registry.
//!
//! The registry only talks to chains through these traits, so the
//! monitoring logic can be driven by an in-memory chain in tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use subwatch_core::{
    Balance, BlockNumber, BlockRecord, ChainCapabilities, EraProgress, ValidatorCounts,
    ValidatorSummary,
};

use crate::error::ChainError;
use crate::queries::metadata::ChainFacts;

/// Identity of a block as announced by a head subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub number: BlockNumber,
    pub hash: String,
    pub parent_hash: String,
}

/// Stream of heads. Ends when the underlying subscription is closed.
pub type HeadStream = BoxStream<'static, Result<ChainHead, ChainError>>;

/// Dials chain endpoints.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Open a transport to `url` and wait until it is usable.
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainRpc>, ChainError>;
}

/// One live RPC session with a chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Descriptive facts and pallet capabilities, fetched once per connection.
    async fn chain_facts(&self) -> Result<ChainFacts, ChainError>;

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ChainError>;

    async fn subscribe_finalized_heads(&self) -> Result<HeadStream, ChainError>;

    /// Fetch the body of an announced block and summarize it.
    async fn fetch_block(&self, head: &ChainHead) -> Result<BlockRecord, ChainError>;

    async fn best_head(&self) -> Result<ChainHead, ChainError>;

    async fn finalized_head(&self) -> Result<ChainHead, ChainError>;

    async fn total_issuance(&self) -> Result<Balance, ChainError>;

    async fn validator_counts(&self) -> Result<ValidatorCounts, ChainError>;

    /// Era and session counters. Only the parts backed by `capabilities`
    /// are queried, the rest stay zero.
    async fn era_progress(&self, capabilities: ChainCapabilities)
    -> Result<EraProgress, ChainError>;

    /// Up to `limit` validators of the current session starting at
    /// `offset`, addresses encoded with `ss58_format`.
    async fn active_validators(
        &self,
        offset: usize,
        limit: usize,
        ss58_format: u16,
    ) -> Result<Vec<ValidatorSummary>, ChainError>;

    /// Whether the transport is believed to be open.
    fn is_connected(&self) -> bool;

    /// Stop using the transport. Idempotent.
    async fn close(&self);
}
