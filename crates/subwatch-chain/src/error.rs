//! Errors raised while talking to a chain node.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    /// The endpoint could not be dialed or the handshake failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A JSON-RPC call or subscription failed.
    #[error("RPC call failed: {0}")]
    Rpc(String),

    #[error("Storage query failed: {0}")]
    Storage(String),

    #[error(transparent)]
    Subxt(#[from] subxt::Error),

    #[error("Could not decode chain value: {0}")]
    Decode(#[from] subxt::error::DecodeError),

    /// The node answered with something we cannot interpret.
    #[error("Unexpected chain data: {0}")]
    InvalidData(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl ChainError {
    pub(crate) fn rpc(err: impl std::fmt::Display) -> Self {
        ChainError::Rpc(err.to_string())
    }
}
