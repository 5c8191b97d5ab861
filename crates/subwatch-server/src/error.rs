//! Errors surfaced by the connection registry.
//!
//! Block fetch and stats query failures never appear here: they are
//! contained in the monitoring tasks, logged, and show up as degraded
//! block records or a retained stats snapshot.

use subwatch_core::{ChainId, EndpointError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Chain not found: {0}")]
    NotFound(ChainId),
}
