//! Network statistics queries: issuance, validator set sizes, era and
//! session counters.

use subwatch_core::{Balance, ChainCapabilities, EraProgress, ValidatorCounts};
use subxt::dynamic::{At, DecodedValueThunk, Value};

use crate::ChainClient;
use crate::error::ChainError;

/// Fraction of the current epoch elapsed, clamped to `0.0..=1.0`.
///
/// Epoch `n` starts at slot `genesis_slot + n * epoch_duration`.
pub fn session_progress(
    current_slot: u64,
    genesis_slot: u64,
    epoch_index: u64,
    epoch_duration: u64,
) -> f64 {
    if epoch_duration == 0 {
        return 0.0;
    }
    let epoch_start = genesis_slot.saturating_add(epoch_index.saturating_mul(epoch_duration));
    let elapsed = current_slot.saturating_sub(epoch_start);
    (elapsed as f64 / epoch_duration as f64).clamp(0.0, 1.0)
}

impl ChainClient {
    /// Total token issuance. Zero when the chain has no balances pallet.
    pub async fn get_total_issuance(&self) -> Result<Balance, ChainError> {
        Ok(self
            .fetch_storage_u128("Balances", "TotalIssuance")
            .await?
            .unwrap_or(0))
    }

    /// Number of validators in the current session.
    pub async fn get_session_validator_count(&self) -> Result<u32, ChainError> {
        let storage_query = subxt::dynamic::storage("Session", "Validators", ());
        let result: Option<DecodedValueThunk> = self
            .client()
            .storage()
            .at_latest()
            .await?
            .fetch(&storage_query)
            .await?;

        let Some(value) = result else {
            return Ok(0);
        };
        let decoded = value.to_value()?;

        // Vec<AccountId> decodes as an unnamed composite
        let count = (0..)
            .take_while(|i: &usize| decoded.at(*i).is_some())
            .count();
        Ok(count as u32)
    }

    /// Active validators from the session, registered ones from staking.
    pub async fn get_validator_counts(&self) -> Result<ValidatorCounts, ChainError> {
        let active = self.get_session_validator_count().await?;
        let registered = self
            .fetch_storage_u128("Staking", "CounterForValidators")
            .await?
            .unwrap_or(0) as u32;

        Ok(ValidatorCounts {
            active,
            total: registered.max(active),
        })
    }

    /// Index of the active era, falling back to the planned era.
    pub async fn get_active_era_index(&self) -> Result<u32, ChainError> {
        let storage_query = subxt::dynamic::storage("Staking", "ActiveEra", ());
        let result: Option<DecodedValueThunk> = self
            .client()
            .storage()
            .at_latest()
            .await?
            .fetch(&storage_query)
            .await?;

        if let Some(value) = result {
            let decoded = value.to_value()?;
            // ActiveEraInfo = { index: u32, start: Option<u64> }
            if let Some(index) = decoded.at("index").and_then(|v: &Value<u32>| v.as_u128()) {
                return Ok(index as u32);
            }
        }

        Ok(self
            .fetch_storage_u128("Staking", "CurrentEra")
            .await?
            .unwrap_or(0) as u32)
    }

    /// Babe epoch index and progress through it.
    pub async fn get_babe_epoch(&self) -> Result<(u64, f64), ChainError> {
        let epoch_index = self
            .fetch_storage_u128("Babe", "EpochIndex")
            .await?
            .unwrap_or(0) as u64;
        let current_slot = self
            .fetch_storage_u128("Babe", "CurrentSlot")
            .await?
            .unwrap_or(0) as u64;
        let genesis_slot = self
            .fetch_storage_u128("Babe", "GenesisSlot")
            .await?
            .unwrap_or(0) as u64;
        let epoch_duration = self.get_constant_u64("Babe", "EpochDuration")?;

        Ok((
            epoch_index,
            session_progress(current_slot, genesis_slot, epoch_index, epoch_duration),
        ))
    }

    pub async fn get_era_progress(
        &self,
        capabilities: ChainCapabilities,
    ) -> Result<EraProgress, ChainError> {
        let mut progress = EraProgress::default();

        if capabilities.has_staking {
            progress.era = self.get_active_era_index().await?;
        }

        if capabilities.has_babe {
            let (epoch, fraction) = self.get_babe_epoch().await?;
            progress.epoch = epoch;
            progress.session_progress = fraction;
        } else if capabilities.has_session {
            progress.epoch = self
                .fetch_storage_u128("Session", "CurrentIndex")
                .await?
                .unwrap_or(0) as u64;
        }

        Ok(progress)
    }
}
