//! Connection registry: the single owner of every chain connection.
//!
//! The map lock is only held for lookups, inserts and removals. Dialing,
//! metadata fetches and teardown all run without it, so a stalled chain
//! never blocks `list()` or `get()` for the others.
//!
//! Once a dial succeeds, starting the tasks and inserting into the map run
//! on a spawned task. A caller that drops `connect` half way (an HTTP
//! client hanging up, say) still leaves the connection registered.

use std::collections::HashMap;
use std::sync::Arc;

use subwatch_chain::{ChainConnector, ChainError, ChainFacts, ChainRpc, HeadStream};
use subwatch_core::{
    ChainEndpointRequest, ChainId, ChainMetadata, ChainSummary, ConnectionStatus, Endpoint,
    MonitorConfig, unix_millis,
};
use tokio::sync::{RwLock, broadcast};

use crate::connection::{ChainConnection, SubscriptionKind};
use crate::error::RegistryError;
use crate::monitor::{spawn_finalized_heads, spawn_new_heads};
use crate::stats::spawn_stats_refresher;

/// Lifecycle notifications for registry observers.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Connected(ChainMetadata),
    Disconnected(ChainId),
}

type ConnectionMap = Arc<RwLock<HashMap<ChainId, Arc<ChainConnection>>>>;

/// Everything a dial produces before the connection is registered.
struct Opened {
    rpc: Arc<dyn ChainRpc>,
    facts: ChainFacts,
    new_heads: HeadStream,
    finalized_heads: HeadStream,
}

pub struct ChainRegistry {
    connector: Arc<dyn ChainConnector>,
    config: MonitorConfig,
    connections: ConnectionMap,
    events: broadcast::Sender<RegistryEvent>,
}

impl ChainRegistry {
    pub fn new(connector: Arc<dyn ChainConnector>, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            connector,
            config,
            connections: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Receive `Connected` / `Disconnected` notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Connect to a chain, or return the live connection already open for
    /// the same endpoint.
    ///
    /// The URL is validated before any network I/O. Dial, metadata and
    /// head subscriptions share one `dial_timeout` budget. On success the
    /// connection is registered with all monitoring tasks running before
    /// it is returned.
    pub async fn connect(
        &self,
        request: ChainEndpointRequest,
    ) -> Result<Arc<ChainConnection>, RegistryError> {
        self.connect_or_reuse(request).await.map(|(conn, _)| conn)
    }

    /// Like [`connect`](Self::connect), also reporting whether a new
    /// connection was opened (`true`) or a live one reused (`false`).
    pub async fn connect_or_reuse(
        &self,
        request: ChainEndpointRequest,
    ) -> Result<(Arc<ChainConnection>, bool), RegistryError> {
        let endpoint = request.validate()?;

        if let Some(existing) = self.find_live(&endpoint).await {
            tracing::info!(
                "Already connected to {} as {}",
                endpoint,
                existing.id()
            );
            return Ok((existing, false));
        }

        tracing::info!("Connecting to chain at {}", endpoint);

        let opened = match tokio::time::timeout(self.config.dial_timeout, self.open(&endpoint)).await
        {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                tracing::warn!("Failed to connect to {}: {}", endpoint, e);
                return Err(RegistryError::ConnectionRefused(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    "Connecting to {} timed out after {:?}",
                    endpoint,
                    self.config.dial_timeout
                );
                return Err(RegistryError::ConnectTimeout(endpoint.to_string()));
            }
        };

        let metadata = build_metadata(&endpoint, &request, opened.facts);
        let conn = Arc::new(ChainConnection::new(
            metadata,
            endpoint,
            opened.rpc,
            self.config.window_size,
        ));

        let commit = tokio::spawn(register(
            conn.clone(),
            opened.new_heads,
            opened.finalized_heads,
            self.config.clone(),
            self.connections.clone(),
            self.events.clone(),
        ));
        if let Err(e) = commit.await {
            tracing::error!("Registering {} failed: {}", conn.id(), e);
            conn.shutdown().await;
            return Err(RegistryError::ConnectionRefused(e.to_string()));
        }

        Ok((conn, true))
    }

    /// Dial, fetch chain facts and open both head subscriptions.
    async fn open(&self, endpoint: &Endpoint) -> Result<Opened, ChainError> {
        let rpc = self.connector.connect(endpoint.as_str()).await?;

        let ready = async {
            let facts = rpc.chain_facts().await?;
            let new_heads = rpc.subscribe_new_heads().await?;
            let finalized_heads = rpc.subscribe_finalized_heads().await?;
            Ok::<_, ChainError>((facts, new_heads, finalized_heads))
        };

        match ready.await {
            Ok((facts, new_heads, finalized_heads)) => Ok(Opened {
                rpc,
                facts,
                new_heads,
                finalized_heads,
            }),
            Err(e) => {
                rpc.close().await;
                Err(e)
            }
        }
    }

    async fn find_live(&self, endpoint: &Endpoint) -> Option<Arc<ChainConnection>> {
        self.connections
            .read()
            .await
            .values()
            .find(|c| c.endpoint() == endpoint && c.status() == ConnectionStatus::Connected)
            .cloned()
    }

    /// Tear down a connection and remove it from the registry.
    ///
    /// Safe to race with itself: the second caller gets `NotFound`.
    pub async fn disconnect(&self, id: &ChainId) -> Result<(), RegistryError> {
        let conn = self
            .get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        if !conn.begin_teardown() {
            return Err(RegistryError::NotFound(id.clone()));
        }

        conn.shutdown().await;
        self.connections.write().await.remove(id);

        tracing::info!("Disconnected from {} ({})", conn.metadata().name, id);
        let _ = self.events.send(RegistryEvent::Disconnected(id.clone()));
        Ok(())
    }

    /// Disconnect, then connect again to the same URL under the same name.
    /// The new connection gets a new identity.
    pub async fn reconnect(&self, id: &ChainId) -> Result<Arc<ChainConnection>, RegistryError> {
        let conn = self
            .get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let request = ChainEndpointRequest::new(conn.metadata().ws_url.clone())
            .with_display_name(conn.metadata().name.clone());
        drop(conn);

        self.disconnect(id).await?;
        self.connect(request).await
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<ChainId> = self.connections.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                tracing::debug!("Skipping {}: {}", id, e);
            }
        }
    }

    pub async fn get(&self, id: &ChainId) -> Option<Arc<ChainConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Snapshot of the registered connections, oldest first.
    pub async fn connections(&self) -> Vec<Arc<ChainConnection>> {
        let mut conns: Vec<_> = self.connections.read().await.values().cloned().collect();
        conns.sort_by(|a, b| {
            a.metadata()
                .connected_at_ms
                .cmp(&b.metadata().connected_at_ms)
                .then_with(|| a.id().cmp(b.id()))
        });
        conns
    }

    /// Summaries of every registered connection, including ones whose
    /// transport has dropped.
    pub async fn list(&self) -> Vec<ChainSummary> {
        let mut summaries = Vec::new();
        for conn in self.connections().await {
            summaries.push(conn.summary().await);
        }
        summaries
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

/// Start the monitoring tasks, insert the connection and announce it.
async fn register(
    conn: Arc<ChainConnection>,
    new_heads: HeadStream,
    finalized_heads: HeadStream,
    config: MonitorConfig,
    connections: ConnectionMap,
    events: broadcast::Sender<RegistryEvent>,
) {
    let token = conn.cancel_token().child_token();
    let handle = spawn_new_heads(
        conn.clone(),
        new_heads,
        token.clone(),
        config.block_fetch_timeout,
    );
    conn.attach(SubscriptionKind::NewHeads, token, handle).await;

    let token = conn.cancel_token().child_token();
    let handle = spawn_finalized_heads(conn.clone(), finalized_heads, token.clone());
    conn.attach(SubscriptionKind::FinalizedHeads, token, handle)
        .await;

    let token = conn.cancel_token().child_token();
    let handle = spawn_stats_refresher(
        conn.clone(),
        token.clone(),
        config.stats_interval,
        config.stats_query_timeout,
    );
    conn.attach(SubscriptionKind::StatsTimer, token, handle)
        .await;

    connections
        .write()
        .await
        .insert(conn.id().clone(), conn.clone());

    tracing::info!(
        "Connected to {} ({}) as {}",
        conn.metadata().name,
        conn.metadata().chain_name,
        conn.id()
    );
    let _ = events.send(RegistryEvent::Connected(conn.metadata().clone()));
}

pub(crate) fn build_metadata(
    endpoint: &Endpoint,
    request: &ChainEndpointRequest,
    facts: ChainFacts,
) -> ChainMetadata {
    let name = request
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| facts.chain_name.clone());

    ChainMetadata {
        id: ChainId::generate(endpoint),
        name,
        chain_name: facts.chain_name,
        ws_url: request.ws_url.trim().to_string(),
        runtime_version: facts.runtime_version,
        genesis_hash: facts.genesis_hash,
        token_symbol: facts.token_symbol,
        token_decimals: facts.token_decimals,
        ss58_format: facts.ss58_format,
        block_time_ms: facts.block_time_ms,
        capabilities: facts.capabilities,
        connected_at_ms: unix_millis(),
    }
}
