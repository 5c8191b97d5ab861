//! Chain identity, runtime facts and pallet capability detection.

use serde_json::Value as JsonValue;
use subwatch_core::{ChainCapabilities, RuntimeVersion};
use subxt::Metadata;
use subxt::ext::subxt_rpcs::rpc_params;

use crate::ChainClient;
use crate::error::ChainError;

/// Block time used when the runtime exposes none of the known constants.
pub const DEFAULT_BLOCK_TIME_MS: u64 = 6_000;

/// Descriptive facts about a chain, independent of how it was registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFacts {
    pub chain_name: String,
    pub runtime_version: RuntimeVersion,
    pub genesis_hash: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub ss58_format: u16,
    pub block_time_ms: u64,
    pub capabilities: ChainCapabilities,
}

/// Token facts from `system_properties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenProperties {
    pub symbol: String,
    pub decimals: u8,
    pub ss58_format: u16,
}

impl Default for TokenProperties {
    fn default() -> Self {
        Self {
            symbol: "UNIT".to_string(),
            decimals: 12,
            ss58_format: 42,
        }
    }
}

impl TokenProperties {
    /// Parse `system_properties`. Multi-token chains report arrays; the
    /// first entry is the native token.
    pub fn from_json(props: &JsonValue) -> Self {
        fn first(v: Option<&JsonValue>) -> Option<&JsonValue> {
            match v? {
                JsonValue::Array(items) => items.first(),
                other => Some(other),
            }
        }

        let defaults = Self::default();
        Self {
            symbol: first(props.get("tokenSymbol"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(defaults.symbol),
            decimals: first(props.get("tokenDecimals"))
                .and_then(|v| v.as_u64())
                .and_then(|v| u8::try_from(v).ok())
                .unwrap_or(defaults.decimals),
            ss58_format: props
                .get("ss58Format")
                .and_then(|v| v.as_u64())
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(defaults.ss58_format),
        }
    }
}

/// Which optional modules the runtime carries.
pub fn detect_capabilities(metadata: &Metadata) -> ChainCapabilities {
    let has = |name: &str| metadata.pallet_by_name(name).is_some();
    ChainCapabilities {
        has_staking: has("Staking"),
        has_session: has("Session"),
        has_babe: has("Babe"),
        has_balances: has("Balances"),
        has_governance: has("Referenda") || has("Democracy") || has("ConvictionVoting"),
        has_identity: has("Identity"),
    }
}

impl ChainClient {
    /// Fetch everything needed to describe the chain. Called once per
    /// connection.
    pub async fn fetch_chain_facts(&self) -> Result<ChainFacts, ChainError> {
        let chain_name: String = self
            .rpc()
            .request("system_chain", rpc_params![])
            .await
            .map_err(ChainError::rpc)?;
        tracing::info!("Chain reported name: {}", chain_name);

        let properties: JsonValue = self
            .rpc()
            .request("system_properties", rpc_params![])
            .await
            .map_err(ChainError::rpc)?;
        let token = TokenProperties::from_json(&properties);

        let runtime_version: RuntimeVersion = self
            .rpc()
            .request("state_getRuntimeVersion", rpc_params![])
            .await
            .map_err(ChainError::rpc)?;

        let capabilities = detect_capabilities(&self.client().metadata());
        let block_time_ms = self.get_block_time_ms();

        tracing::info!(
            "{} runtime {} v{}, block time {}ms",
            chain_name,
            runtime_version.spec_name,
            runtime_version.spec_version,
            block_time_ms
        );

        Ok(ChainFacts {
            chain_name,
            runtime_version,
            genesis_hash: self.genesis_hash(),
            token_symbol: token.symbol,
            token_decimals: token.decimals,
            ss58_format: token.ss58_format,
            block_time_ms,
            capabilities,
        })
    }

    /// Nominal block time in milliseconds.
    ///
    /// Babe chains expose `ExpectedBlockTime`, Aura chains `SlotDuration`.
    /// Otherwise the timestamp pallet's minimum period is half a slot.
    pub fn get_block_time_ms(&self) -> u64 {
        if let Ok(ms) = self.get_constant_u64("Babe", "ExpectedBlockTime") {
            return ms;
        }
        if let Ok(ms) = self.get_constant_u64("Aura", "SlotDuration") {
            return ms;
        }
        if let Ok(ms) = self.get_constant_u64("Timestamp", "MinimumPeriod")
            && ms > 0
        {
            return ms * 2;
        }
        tracing::debug!("No block time constant found, using {}ms", DEFAULT_BLOCK_TIME_MS);
        DEFAULT_BLOCK_TIME_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_properties_scalar() {
        let props = json!({ "ss58Format": 0, "tokenDecimals": 10, "tokenSymbol": "DOT" });
        let token = TokenProperties::from_json(&props);
        assert_eq!(token.symbol, "DOT");
        assert_eq!(token.decimals, 10);
        assert_eq!(token.ss58_format, 0);
    }

    #[test]
    fn test_token_properties_arrays_take_first() {
        let props = json!({ "tokenDecimals": [18, 12], "tokenSymbol": ["ACA", "AUSD"] });
        let token = TokenProperties::from_json(&props);
        assert_eq!(token.symbol, "ACA");
        assert_eq!(token.decimals, 18);
        assert_eq!(token.ss58_format, 42);
    }

    #[test]
    fn test_token_properties_empty() {
        assert_eq!(
            TokenProperties::from_json(&json!({})),
            TokenProperties::default()
        );
        assert_eq!(
            TokenProperties::from_json(&JsonValue::Null),
            TokenProperties::default()
        );
    }

    #[test]
    fn test_runtime_version_ignores_extra_fields() {
        let raw = json!({
            "specName": "polkadot",
            "implName": "parity-polkadot",
            "authoringVersion": 0,
            "specVersion": 1_003_000,
            "implVersion": 0,
            "apis": [],
            "transactionVersion": 26,
            "stateVersion": 1
        });
        let version: RuntimeVersion = serde_json::from_value(raw).unwrap();
        assert_eq!(version.spec_name, "polkadot");
        assert_eq!(version.spec_version, 1_003_000);
        assert_eq!(version.transaction_version, 26);
    }
}
