//! Multi-chain monitoring server.
//!
//! This crate provides:
//! - The connection registry that owns every chain connection (`registry`)
//! - Per-connection block monitoring and stats refreshing (`monitor`, `stats`)
//! - Realtime fan-out to viewers (`fanout`, `protocol`)
//! - The HTTP facade and viewer WebSocket endpoint (`api`)

#[cfg(test)]
#[macro_use]
mod testing;

pub mod api;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod stats;

pub use api::{AppState, router};
pub use connection::ChainConnection;
pub use error::RegistryError;
pub use fanout::ViewerHub;
pub use registry::{ChainRegistry, RegistryEvent};
