//! On-the-wire JSON shape for a persisted swap, with explicit constructors
//! in place of "either positional or object" constructor overloading:
//! `from_fields` builds one from a fresh `SwapRecord` plus the engine's own
//! bookkeeping fields, `from_serialized` parses one that storage handed
//! back.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{SwapRecord, SwapState};

/// The swap-record fields exactly as committed on-chain, serialized the
/// way the contract's ABI tuple is shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSwapData {
    #[serde(rename = "type")]
    pub kind: String,
    pub offerer: Address,
    pub claimer: Address,
    pub token: Address,
    pub amount: U256,
    pub payment_hash: B256,
    pub data: U256,
    pub security_deposit: U256,
    pub claimer_bounty: U256,
    pub txo_hash: Option<B256>,
}

impl From<&SwapRecord> for PersistedSwapData {
    fn from(swap: &SwapRecord) -> Self {
        Self {
            kind: "evm".to_string(),
            offerer: swap.offerer,
            claimer: swap.claimer,
            token: swap.token,
            amount: swap.amount,
            payment_hash: swap.payment_hash,
            data: swap.data,
            security_deposit: swap.security_deposit,
            claimer_bounty: swap.claimer_bounty,
            txo_hash: swap.txo_hash,
        }
    }
}

impl From<&PersistedSwapData> for SwapRecord {
    fn from(data: &PersistedSwapData) -> Self {
        SwapRecord {
            offerer: data.offerer,
            claimer: data.claimer,
            token: data.token,
            amount: data.amount,
            payment_hash: data.payment_hash,
            data: data.data,
            security_deposit: data.security_deposit,
            claimer_bounty: data.claimer_bounty,
            txo_hash: data.txo_hash,
        }
    }
}

/// The full persisted record: on-chain swap fields plus the engine's
/// per-swap wrapper state (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSwap {
    #[serde(flatten)]
    pub swap: PersistedSwapData,
    pub url: String,
    /// The Lightning payment request (or equivalent payment descriptor)
    /// identifying this swap to the intermediary, distinct from the
    /// on-chain `payment_hash`.
    pub pr: String,
    /// Bearer token the intermediary issued for this swap's HTTP calls.
    pub auth_token: String,
    pub base_fee_sats: u64,
    pub fee_ppm: u64,
    pub swap_fee: u64,
    pub prefix: Option<String>,
    pub timeout: Option<u64>,
    pub signature: Option<String>,
    pub fee_rate: u64,
    pub commit_tx_id: Option<String>,
    pub claim_tx_id: Option<String>,
    pub expiry: u64,
    pub state: SwapState,
}

impl PersistedSwap {
    /// Build a freshly created record from its swap tuple and the
    /// engine-side terms negotiated with the intermediary.
    #[allow(clippy::too_many_arguments)]
    pub fn from_fields(
        swap: &SwapRecord,
        url: String,
        pr: String,
        auth_token: String,
        base_fee_sats: u64,
        fee_ppm: u64,
        swap_fee: u64,
        fee_rate: u64,
        expiry: u64,
        state: SwapState,
    ) -> Self {
        Self {
            swap: PersistedSwapData::from(swap),
            url,
            pr,
            auth_token,
            base_fee_sats,
            fee_ppm,
            swap_fee,
            prefix: None,
            timeout: None,
            signature: None,
            fee_rate,
            commit_tx_id: None,
            claim_tx_id: None,
            expiry,
            state,
        }
    }

    /// Parse a record that storage handed back as its stored JSON text.
    pub fn from_serialized(record: &str) -> Result<Self> {
        serde_json::from_str(record).map_err(|e| Error::Parse(format!("invalid persisted swap record: {e}")))
    }

    pub fn to_serialized(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    pub fn payment_hash(&self) -> B256 {
        self.swap.payment_hash
    }

    pub fn to_swap_record(&self) -> SwapRecord {
        SwapRecord::from(&self.swap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::pack_data;
    use crate::types::{SwapDataFields, SwapKind};

    fn sample_swap() -> SwapRecord {
        let fields = SwapDataFields {
            expiry: 2_000_000_000,
            nonce: 1,
            confirmations: 1,
            kind: SwapKind::Htlc,
            pay_in: true,
            pay_out: true,
            index: 0,
        };
        SwapRecord {
            offerer: Address::repeat_byte(0xAA),
            claimer: Address::repeat_byte(0xBB),
            token: Address::ZERO,
            amount: U256::from(1000u64),
            payment_hash: B256::repeat_byte(0xCC),
            data: pack_data(&fields),
            security_deposit: U256::ZERO,
            claimer_bounty: U256::ZERO,
            txo_hash: None,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let swap = sample_swap();
        let persisted = PersistedSwap::from_fields(
            &swap,
            "https://intermediary.example".to_string(),
            "lnbc1...".to_string(),
            "token-abc".to_string(),
            10,
            1_000,
            100,
            5_000,
            2_000_000_000,
            SwapState::PrCreated,
        );
        let json = persisted.to_serialized().unwrap();
        let parsed = PersistedSwap::from_serialized(&json).unwrap();
        assert_eq!(parsed, persisted);
        assert_eq!(parsed.to_swap_record(), swap);
    }

    #[test]
    fn from_serialized_rejects_garbage() {
        assert!(PersistedSwap::from_serialized("not json").is_err());
    }
}
