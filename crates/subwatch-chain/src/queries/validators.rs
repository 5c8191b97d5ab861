//! Validator listing for the current session.

use subwatch_core::ValidatorSummary;
use subxt::dynamic::{At, DecodedValueThunk, Value};

use crate::ChainClient;
use crate::error::ChainError;
use crate::ss58::encode_ss58;

/// Extract a 32-byte account id from a decoded value.
///
/// Depending on the runtime, an `AccountId32` decodes either as a plain
/// sequence of 32 bytes or as a newtype wrapping one.
pub(crate) fn account_bytes(value: &Value<u32>) -> Option<[u8; 32]> {
    let mut bytes = Vec::with_capacity(32);
    for k in 0..32 {
        match value.at(k).and_then(|b| b.as_u128()) {
            Some(b) => bytes.push(b as u8),
            None => break,
        }
    }

    if bytes.len() == 32 {
        return bytes.try_into().ok();
    }

    value.at(0).and_then(account_bytes)
}

impl ChainClient {
    /// Up to `limit` accounts of `Session::Validators`, starting at `offset`.
    pub async fn get_session_validators(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<[u8; 32]>, ChainError> {
        let storage_query = subxt::dynamic::storage("Session", "Validators", ());
        let result: Option<DecodedValueThunk> = self
            .client()
            .storage()
            .at_latest()
            .await?
            .fetch(&storage_query)
            .await?;

        let Some(value) = result else {
            return Ok(Vec::new());
        };
        let decoded = value.to_value()?;

        let mut accounts = Vec::new();
        for i in offset..offset.saturating_add(limit) {
            let Some(entry) = decoded.at(i) else {
                break;
            };
            let account = account_bytes(entry)
                .ok_or_else(|| ChainError::InvalidData("Invalid validator account".into()))?;
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Session validators with their staking preferences.
    ///
    /// Chains without staking report zero commission for every validator.
    pub async fn get_active_validators(
        &self,
        offset: usize,
        limit: usize,
        ss58_format: u16,
    ) -> Result<Vec<ValidatorSummary>, ChainError> {
        let accounts = self.get_session_validators(offset, limit).await?;
        let storage = self.client().storage().at_latest().await?;

        let mut validators = Vec::with_capacity(accounts.len());
        for account in accounts {
            let storage_query = subxt::dynamic::storage(
                "Staking",
                "Validators",
                vec![Value::from_bytes(account)],
            );

            // Missing pallet or entry both leave default preferences
            let prefs = match storage.fetch(&storage_query).await {
                Ok(Some(value)) => Some(value.to_value()?),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!("Staking::Validators lookup failed: {}", e);
                    None
                }
            };

            // ValidatorPrefs = { commission: Perbill, blocked: bool }
            let commission_perbill = prefs
                .as_ref()
                .and_then(|p| p.at("commission"))
                .and_then(|v: &Value<u32>| v.as_u128())
                .unwrap_or(0);
            let blocked = prefs
                .as_ref()
                .and_then(|p| p.at("blocked"))
                .and_then(|v: &Value<u32>| v.as_bool())
                .unwrap_or(false);

            validators.push(ValidatorSummary {
                account_id: encode_ss58(&account, ss58_format),
                // Perbill is parts per billion (1_000_000_000 = 100%)
                commission: commission_perbill as f64 / 1_000_000_000.0,
                blocked,
            });
        }

        Ok(validators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_seq(bytes: &[u8; 32]) -> Value {
        Value::unnamed_composite(bytes.iter().map(|b| Value::u128(*b as u128)))
    }

    #[test]
    fn test_account_bytes_direct() {
        let raw = [7u8; 32];
        let value = byte_seq(&raw).map_context(|_| 0u32);
        assert_eq!(account_bytes(&value), Some(raw));
    }

    #[test]
    fn test_account_bytes_newtype() {
        let raw = [9u8; 32];
        let wrapped = Value::unnamed_composite(vec![byte_seq(&raw)]).map_context(|_| 0u32);
        assert_eq!(account_bytes(&wrapped), Some(raw));
    }

    #[test]
    fn test_account_bytes_too_short() {
        let short = Value::unnamed_composite((0..4).map(Value::u128)).map_context(|_| 0u32);
        assert_eq!(account_bytes(&short), None);
    }
}
