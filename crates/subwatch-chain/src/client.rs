//! Chain client using subxt over a WebSocket RPC connection.
//!
//! Head subscriptions, headers and raw blocks go through the JSON-RPC
//! client. Storage and constants go through the metadata-aware
//! `OnlineClient`, which shares the same transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Poll;

use async_trait::async_trait;
use futures::StreamExt;
use subwatch_core::{
    Balance, BlockRecord, ChainCapabilities, EraProgress, ValidatorCounts, ValidatorSummary,
    unix_millis,
};
use subxt::backend::rpc::RpcClient;
use subxt::dynamic::DecodedValueThunk;
use subxt::ext::subxt_rpcs::rpc_params;
use subxt::{OnlineClient, PolkadotConfig};

use crate::error::ChainError;
use crate::header::{ChainHeader, SignedBlock, parse_block_hash, to_head};
use crate::queries::metadata::ChainFacts;
use crate::rpc::{ChainConnector, ChainHead, ChainRpc, HeadStream};

/// Dials chains with [`ChainClient::connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubxtConnector;

#[async_trait]
impl ChainConnector for SubxtConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainRpc>, ChainError> {
        let client = ChainClient::connect(url).await?;
        Ok(Arc::new(client))
    }
}

/// One WebSocket session with a Substrate-based chain.
pub struct ChainClient {
    url: String,
    rpc: RpcClient,
    client: OnlineClient<PolkadotConfig>,
    connected: Arc<AtomicBool>,
}

impl ChainClient {
    /// Connect to `url` and download the runtime metadata.
    pub async fn connect(url: &str) -> Result<Self, ChainError> {
        tracing::info!("Connecting to {}", url);

        let rpc = RpcClient::from_url(url).await.map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", url, e);
            ChainError::Connection(e.to_string())
        })?;

        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc.clone())
            .await
            .map_err(|e| {
                tracing::warn!("Failed to create client from {}: {}", url, e);
                ChainError::Connection(e.to_string())
            })?;

        tracing::info!("Connected to {}", url);

        Ok(Self {
            url: url.to_string(),
            rpc,
            client,
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the underlying subxt client.
    pub fn client(&self) -> &OnlineClient<PolkadotConfig> {
        &self.client
    }

    /// Get the raw JSON-RPC client.
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn genesis_hash(&self) -> String {
        format!("0x{}", hex::encode(self.client.genesis_hash().0))
    }

    async fn header(&self, hash: Option<&str>) -> Result<ChainHeader, ChainError> {
        let header = match hash {
            Some(hash) => {
                self.rpc
                    .request::<Option<ChainHeader>>("chain_getHeader", rpc_params![hash])
                    .await
            }
            None => {
                self.rpc
                    .request::<Option<ChainHeader>>("chain_getHeader", rpc_params![])
                    .await
            }
        }
        .map_err(ChainError::rpc)?;

        header.ok_or_else(|| ChainError::InvalidData("Header not found".into()))
    }

    /// `Timestamp::Now` at block `hash`, if the chain has the pallet.
    async fn block_timestamp(&self, hash: &str) -> Result<Option<u64>, ChainError> {
        let storage_query = subxt::dynamic::storage("Timestamp", "Now", ());
        let result: Option<DecodedValueThunk> = self
            .client
            .storage()
            .at(parse_block_hash(hash)?)
            .fetch(&storage_query)
            .await?;

        let Some(value) = result else {
            return Ok(None);
        };
        let now = value
            .to_value()?
            .as_u128()
            .ok_or_else(|| ChainError::InvalidData("Timestamp::Now is not a number".into()))?;
        Ok(Some(now as u64))
    }

    async fn subscribe_heads(
        &self,
        method: &str,
        unsubscribe: &str,
    ) -> Result<HeadStream, ChainError> {
        let subscription = self
            .rpc
            .subscribe::<ChainHeader>(method, rpc_params![], unsubscribe)
            .await
            .map_err(ChainError::rpc)?;

        tracing::debug!("Subscribed to {} on {}", method, self.url);

        let connected = self.connected.clone();
        let on_end = self.connected.clone();
        let heads = subscription
            .map(move |item| match item {
                Ok(header) => Ok(to_head(&header)),
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    Err(ChainError::rpc(e))
                }
            })
            // The subscription only ends when the transport goes away
            .chain(futures::stream::poll_fn(move |_| {
                on_end.store(false, Ordering::SeqCst);
                Poll::Ready(None)
            }));

        Ok(heads.boxed())
    }
}

#[async_trait]
impl ChainRpc for ChainClient {
    async fn chain_facts(&self) -> Result<ChainFacts, ChainError> {
        self.fetch_chain_facts().await
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ChainError> {
        self.subscribe_heads("chain_subscribeNewHeads", "chain_unsubscribeNewHeads")
            .await
    }

    async fn subscribe_finalized_heads(&self) -> Result<HeadStream, ChainError> {
        self.subscribe_heads(
            "chain_subscribeFinalizedHeads",
            "chain_unsubscribeFinalizedHeads",
        )
        .await
    }

    async fn fetch_block(&self, head: &ChainHead) -> Result<BlockRecord, ChainError> {
        let signed: Option<SignedBlock> = self
            .rpc
            .request("chain_getBlock", rpc_params![head.hash.as_str()])
            .await
            .map_err(ChainError::rpc)?;

        let block = signed
            .ok_or_else(|| ChainError::InvalidData(format!("Block {} not found", head.hash)))?
            .block;

        let timestamp_ms = match self.block_timestamp(&head.hash).await? {
            Some(ts) => ts,
            None => unix_millis(),
        };

        Ok(BlockRecord {
            number: head.number,
            hash: head.hash.clone(),
            parent_hash: head.parent_hash.clone(),
            timestamp_ms,
            author: None,
            extrinsics_count: block.extrinsics_count(),
            size: block.encoded_size()?,
            finalized: false,
            degraded: false,
        })
    }

    async fn best_head(&self) -> Result<ChainHead, ChainError> {
        Ok(to_head(&self.header(None).await?))
    }

    async fn finalized_head(&self) -> Result<ChainHead, ChainError> {
        let hash: String = self
            .rpc
            .request("chain_getFinalizedHead", rpc_params![])
            .await
            .map_err(ChainError::rpc)?;

        let header = self.header(Some(&hash)).await?;
        Ok(ChainHead {
            hash,
            ..to_head(&header)
        })
    }

    async fn total_issuance(&self) -> Result<Balance, ChainError> {
        self.get_total_issuance().await
    }

    async fn validator_counts(&self) -> Result<ValidatorCounts, ChainError> {
        self.get_validator_counts().await
    }

    async fn era_progress(
        &self,
        capabilities: ChainCapabilities,
    ) -> Result<EraProgress, ChainError> {
        self.get_era_progress(capabilities).await
    }

    async fn active_validators(
        &self,
        offset: usize,
        limit: usize,
        ss58_format: u16,
    ) -> Result<Vec<ValidatorSummary>, ChainError> {
        self.get_active_validators(offset, limit, ss58_format)
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        // The socket is released once the last clone of the client is dropped
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Closed connection to {}", self.url);
        }
    }
}
