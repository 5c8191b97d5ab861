pub mod client;
pub mod error;
pub mod header;
pub mod queries;
pub mod rpc;
pub mod ss58;

pub use client::*;
pub use error::*;
pub use header::{BlockBody, ChainHeader};
pub use queries::metadata::ChainFacts;
pub use rpc::*;
pub use ss58::encode_ss58;
