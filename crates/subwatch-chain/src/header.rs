//! JSON-RPC header and block shapes.
//!
//! Headers arrive as JSON from `chain_subscribeNewHeads`, `chain_getHeader`
//! and `chain_getBlock`. The block hash is not part of the payload; subxt's
//! `SubstrateHeader` recomputes it from the SCALE-encoded header.

use parity_scale_codec::{Compact, CompactLen, Encode};
use serde::Deserialize;
use subxt::config::Header;
use subxt::config::substrate::{BlakeTwo256, SubstrateHeader};
use subxt::utils::H256;

use crate::error::ChainError;
use crate::rpc::ChainHead;

/// Relay chain and parachain header layout: u32 numbers, blake2 hashes.
pub type ChainHeader = SubstrateHeader<u32, BlakeTwo256>;

/// Decode a 0x-prefixed hex string.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| ChainError::InvalidData(format!("Bad hex {}: {}", s, e)))
}

pub fn parse_block_hash(s: &str) -> Result<H256, ChainError> {
    let bytes: [u8; 32] = decode_hex(s)?
        .try_into()
        .map_err(|_| ChainError::InvalidData(format!("Hash is not 32 bytes: {}", s)))?;
    Ok(H256::from(bytes))
}

fn hash_hex(hash: H256) -> String {
    format!("0x{}", hex::encode(hash.0))
}

pub fn to_head(header: &ChainHeader) -> ChainHead {
    ChainHead {
        number: header.number as u64,
        hash: hash_hex(header.hash_with(BlakeTwo256)),
        parent_hash: hash_hex(header.parent_hash),
    }
}

/// Inner block of a `chain_getBlock` response.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockBody {
    pub header: ChainHeader,
    /// Each entry is an encoded opaque extrinsic, length prefix included.
    #[serde(default)]
    pub extrinsics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedBlock {
    pub block: BlockBody,
}

impl BlockBody {
    pub fn extrinsics_count(&self) -> u32 {
        self.extrinsics.len() as u32
    }

    /// Size of the SCALE-encoded block in bytes.
    pub fn encoded_size(&self) -> Result<u64, ChainError> {
        let header = self.header.encoded_size();
        let prefix = Compact::<u32>::compact_len(&(self.extrinsics.len() as u32));
        let mut body = 0usize;
        for ext in &self.extrinsics {
            body += decode_hex(ext)?.len();
        }
        Ok((header + prefix + body) as u64)
    }
}
