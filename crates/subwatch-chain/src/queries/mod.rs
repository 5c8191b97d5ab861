//! Chain query implementations.

pub mod metadata;
pub mod stats;
pub mod validators;

use subxt::dynamic::{At, Value};

use crate::ChainClient;
use crate::error::ChainError;

/// Read an unsigned integer, unwrapping single-field newtypes such as `Slot`.
pub(crate) fn value_as_u128(value: &Value<u32>) -> Option<u128> {
    value
        .as_u128()
        .or_else(|| value.at(0).and_then(value_as_u128))
}

impl ChainClient {
    /// Helper to get a u64 constant from runtime.
    pub(crate) fn get_constant_u64(&self, pallet: &str, name: &str) -> Result<u64, ChainError> {
        let constant = subxt::dynamic::constant(pallet, name);
        let value = self.client().constants().at(&constant)?;
        let decoded = value.to_value()?;
        value_as_u128(&decoded).map(|v| v as u64).ok_or_else(|| {
            ChainError::InvalidData(format!("Invalid constant {}::{}", pallet, name))
        })
    }

    /// Fetch a plain storage value as an integer. Unset values read as `None`.
    pub(crate) async fn fetch_storage_u128(
        &self,
        pallet: &str,
        entry: &str,
    ) -> Result<Option<u128>, ChainError> {
        let storage_query = subxt::dynamic::storage(pallet, entry, ());
        let result = self
            .client()
            .storage()
            .at_latest()
            .await?
            .fetch(&storage_query)
            .await?;

        let Some(value) = result else {
            tracing::debug!("{}::{} storage returned None", pallet, entry);
            return Ok(None);
        };

        let decoded = value.to_value()?;
        value_as_u128(&decoded)
            .map(Some)
            .ok_or_else(|| ChainError::InvalidData(format!("Invalid {}::{}", pallet, entry)))
    }
}
