//! Realtime fan-out of registry state to connected viewers.
//!
//! Viewers join topics `(chain)` or `(chain, event kind)`. A periodic
//! broadcaster pushes each chain's stats and its latest block to the
//! matching viewers; registry events are forwarded as they happen. The hub
//! only reads registry state, except for the connect/disconnect requests a
//! viewer sends, which go through the registry's own API.
//!
//! Each viewer has a bounded queue. When it is full the event is dropped
//! for that viewer only, so a slow viewer never stalls the broadcaster.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use subwatch_core::{ChainEndpointRequest, ChainId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::protocol::{EventKind, ServerEvent, ViewerRequest};
use crate::registry::{ChainRegistry, RegistryEvent};

pub type ViewerId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Chain(ChainId),
    ChainEvent(ChainId, EventKind),
}

impl Topic {
    fn chain(&self) -> &ChainId {
        match self {
            Topic::Chain(id) | Topic::ChainEvent(id, _) => id,
        }
    }
}

struct Viewer {
    tx: mpsc::Sender<ServerEvent>,
    topics: HashSet<Topic>,
}

impl Viewer {
    fn wants(&self, chain_id: &ChainId, kind: EventKind) -> bool {
        self.topics.contains(&Topic::Chain(chain_id.clone()))
            || self
                .topics
                .contains(&Topic::ChainEvent(chain_id.clone(), kind))
    }

    fn follows(&self, chain_id: &ChainId) -> bool {
        self.topics.iter().any(|t| t.chain() == chain_id)
    }
}

pub struct ViewerHub {
    registry: Arc<ChainRegistry>,
    viewers: RwLock<HashMap<ViewerId, Viewer>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl ViewerHub {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        let buffer = registry.config().viewer_buffer.max(1);
        Self {
            registry,
            viewers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer,
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    /// Add a viewer. It immediately receives the current chain list.
    pub async fn register(&self) -> (ViewerId, mpsc::Receiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let chains = self.registry.list().await;
        let _ = tx.try_send(ServerEvent::ChainList { chains });

        self.viewers.write().await.insert(
            id,
            Viewer {
                tx,
                topics: HashSet::new(),
            },
        );
        tracing::info!("Viewer {} connected", id);
        (id, rx)
    }

    /// Remove a viewer. Chain connections are not affected.
    pub async fn unregister(&self, id: ViewerId) {
        if self.viewers.write().await.remove(&id).is_some() {
            tracing::info!("Viewer {} disconnected", id);
        }
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    /// Number of viewers following any topic of `chain_id`.
    pub async fn subscriber_count(&self, chain_id: &ChainId) -> usize {
        self.viewers
            .read()
            .await
            .values()
            .filter(|v| v.follows(chain_id))
            .count()
    }

    pub async fn handle_request(&self, id: ViewerId, request: ViewerRequest) {
        match request {
            ViewerRequest::Subscribe { chain_id, events } => {
                self.subscribe(id, chain_id, &events).await;
            }
            ViewerRequest::Unsubscribe { chain_id, events } => {
                self.unsubscribe(id, &chain_id, &events).await;
            }
            ViewerRequest::Connect { ws_url, name } => {
                tracing::info!("Viewer {} requesting connection to {}", id, ws_url);
                let mut request = ChainEndpointRequest::new(ws_url.clone());
                request.display_name = name;
                match self.registry.connect(request).await {
                    Ok(conn) => {
                        self.send_to(
                            id,
                            ServerEvent::Connected {
                                chain_id: conn.id().clone(),
                                metadata: conn.metadata().clone(),
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        self.send_to(id, ServerEvent::endpoint_error(ws_url, e.to_string()))
                            .await;
                    }
                }
            }
            ViewerRequest::Disconnect { chain_id } => {
                if let Err(e) = self.registry.disconnect(&chain_id).await {
                    self.send_to(id, ServerEvent::chain_error(chain_id, e.to_string()))
                        .await;
                }
            }
        }
    }

    /// Join `(chain)` and any `(chain, kind)` topics, then push the
    /// current stats and rolling window without waiting for a tick.
    pub async fn subscribe(&self, id: ViewerId, chain_id: ChainId, events: &[EventKind]) {
        {
            let mut viewers = self.viewers.write().await;
            let Some(viewer) = viewers.get_mut(&id) else {
                return;
            };
            viewer.topics.insert(Topic::Chain(chain_id.clone()));
            for kind in events.iter().filter(|k| **k != EventKind::Unknown) {
                viewer
                    .topics
                    .insert(Topic::ChainEvent(chain_id.clone(), *kind));
            }
        }
        tracing::debug!("Viewer {} subscribed to {}", id, chain_id);

        let Some(conn) = self.registry.get(&chain_id).await else {
            return;
        };

        if let Some(stats) = conn.stats().await {
            self.send_to(
                id,
                ServerEvent::Stats {
                    chain_id: chain_id.clone(),
                    stats: (*stats).clone(),
                },
            )
            .await;
        }

        let blocks = conn.blocks().await;
        if !blocks.is_empty() {
            self.send_to(id, ServerEvent::Blocks { chain_id, blocks })
                .await;
        }
    }

    /// Leave the given `(chain, kind)` topics, or every topic of the
    /// chain when `events` is empty.
    pub async fn unsubscribe(&self, id: ViewerId, chain_id: &ChainId, events: &[EventKind]) {
        let mut viewers = self.viewers.write().await;
        let Some(viewer) = viewers.get_mut(&id) else {
            return;
        };

        if events.is_empty() {
            viewer.topics.retain(|t| t.chain() != chain_id);
        } else {
            for kind in events {
                viewer
                    .topics
                    .remove(&Topic::ChainEvent(chain_id.clone(), *kind));
            }
        }
        tracing::debug!("Viewer {} unsubscribed from {}", id, chain_id);
    }

    /// Push to one viewer.
    pub async fn send_to(&self, id: ViewerId, event: ServerEvent) {
        if let Some(viewer) = self.viewers.read().await.get(&id) {
            deliver(id, &viewer.tx, event);
        }
    }

    /// Push to every viewer subscribed to `(chain)` or `(chain, kind)`.
    pub async fn publish(&self, chain_id: &ChainId, kind: EventKind, event: ServerEvent) -> usize {
        let viewers = self.viewers.read().await;
        let mut sent = 0;
        for (id, viewer) in viewers.iter().filter(|(_, v)| v.wants(chain_id, kind)) {
            if deliver(*id, &viewer.tx, event.clone()) {
                sent += 1;
            }
        }
        sent
    }

    async fn publish_all(&self, event: ServerEvent) {
        let viewers = self.viewers.read().await;
        for (id, viewer) in viewers.iter() {
            deliver(*id, &viewer.tx, event.clone());
        }
    }

    /// One broadcast pass: stats and the latest block of every chain.
    /// Only the newest block is sent; viewers append it to their list.
    pub async fn broadcast_once(&self) {
        for conn in self.registry.connections().await {
            let chain_id = conn.id();

            if let Some(stats) = conn.stats().await {
                self.publish(
                    chain_id,
                    EventKind::Stats,
                    ServerEvent::Stats {
                        chain_id: chain_id.clone(),
                        stats: (*stats).clone(),
                    },
                )
                .await;
            }

            if let Some(block) = conn.latest_block().await {
                self.publish(
                    chain_id,
                    EventKind::NewBlock,
                    ServerEvent::NewBlock {
                        chain_id: chain_id.clone(),
                        block,
                    },
                )
                .await;
            }
        }
    }

    /// Forward one registry lifecycle event.
    pub async fn on_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Connected(_) => {}
            RegistryEvent::Disconnected(chain_id) => {
                // Tell the chain's viewers before dropping its topics
                let mut viewers = self.viewers.write().await;
                for (id, viewer) in viewers.iter_mut().filter(|(_, v)| v.follows(&chain_id)) {
                    deliver(
                        *id,
                        &viewer.tx,
                        ServerEvent::Disconnected {
                            chain_id: chain_id.clone(),
                        },
                    );
                    viewer.topics.retain(|t| t.chain() != &chain_id);
                }
            }
        }

        let chains = self.registry.list().await;
        self.publish_all(ServerEvent::ChainList { chains }).await;
    }

    /// Run the broadcaster and the registry event forwarder until
    /// `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.registry.subscribe_events();
        let interval = self.registry.config().broadcast_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.broadcast_once().await,
                    event = events.recv() => match event {
                        Ok(event) => self.on_registry_event(event).await,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Viewer hub missed {} registry events", n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("Viewer broadcaster stopped");
        })
    }
}

/// Queue an event without waiting. Returns false if it was dropped.
fn deliver(id: ViewerId, tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!("Viewer {} queue full, dropping event", id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
