//! Shared data model: swap records, the packed on-chain `data` word, relay
//! tips, Merkle proofs, and the unsigned-transaction/receipt shapes every
//! tx-building component returns.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// What kind of settlement a swap's escrow represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwapKind {
    /// Lightning-settled HTLC: claimed by revealing a preimage.
    Htlc = 0,
    /// Bitcoin on-chain payment, claimed with an SPV proof of any output.
    Chain = 1,
    /// Bitcoin on-chain payment to a script committing to an escrow nonce.
    ChainNonced = 2,
    /// Bitcoin on-chain payment identified by a specific txid.
    ChainTxid = 3,
}

impl SwapKind {
    /// Decode the 8-bit `kind` sub-field of the packed `data` word.
    pub fn from_u8(value: u8) -> crate::error::Result<Self> {
        match value {
            0 => Ok(SwapKind::Htlc),
            1 => Ok(SwapKind::Chain),
            2 => Ok(SwapKind::ChainNonced),
            3 => Ok(SwapKind::ChainTxid),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown swap kind {other}"
            ))),
        }
    }
}

/// The decoded fields of a swap's packed `data:u256` word (see
/// `commitment::pack_data`/`unpack_data` for the bit layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapDataFields {
    /// Unix timestamp after which the swap can be refunded.
    pub expiry: u64,
    /// Escrow nonce, unique per offerer/claimer pair.
    pub nonce: u64,
    /// Confirmations required before an on-chain claim is accepted.
    pub confirmations: u16,
    /// HTLC vs. chain-settlement flavor.
    pub kind: SwapKind,
    /// Whether the offerer pays into the escrow themselves (vs. a relayer).
    pub pay_in: bool,
    /// Whether the claimer receives the payout directly (vs. a relayer).
    pub pay_out: bool,
    /// The on-chain commitment slot's nonce/status value at creation time,
    /// carried forward for replay protection (see `auth::verify`).
    pub index: u8,
}

/// A swap's lifecycle state, as tracked by `engine::SwapEngine` and
/// persisted alongside the record (`persisted::PersistedSwap::state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapState {
    /// Payment request issued, not yet observed as paid.
    PrCreated,
    /// Payment observed; init authorization obtained from the intermediary.
    PrPaid,
    /// On-chain commitment observed matching this swap.
    ClaimCommitted,
    /// Claim observed; the swap paid out successfully.
    ClaimClaimed,
    /// Timed out before a commitment was observed.
    Expired,
    /// Failed after commitment (refunded, or commitment lost before claim).
    Failed,
}

impl SwapState {
    /// Whether this state is one of the three terminal states (spec
    /// invariant: exactly one terminal transition is ever observed).
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::ClaimClaimed | SwapState::Expired | SwapState::Failed)
    }
}

/// Status of a swap's on-chain commitment slot, as derived by
/// `contract::SwapContractClient::get_commit_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// The commitment slot holds the sentinel `PAID` value.
    Paid,
    /// The slot's keccak commitment matches this swap's `commit_hash`.
    Committed,
    /// Committed, expired, and the caller is the offerer: refund is legal.
    Refundable,
    /// Past expiry with no legal next step for this caller.
    Expired,
    /// No live commitment at this slot.
    NotCommitted,
}

/// A swap record: the fields committed to on-chain plus the packed `data`
/// word, exactly as defined by the relay/escrow contract's tuple layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub offerer: Address,
    pub claimer: Address,
    /// Zero address means the native chain currency.
    pub token: Address,
    pub amount: U256,
    pub payment_hash: B256,
    pub data: U256,
    pub security_deposit: U256,
    pub claimer_bounty: U256,
    /// Set once the Bitcoin-side output/txid is known (chain-settled swaps).
    pub txo_hash: Option<B256>,
}

impl SwapRecord {
    /// Decode this record's packed `data` word.
    pub fn data_fields(&self) -> crate::error::Result<SwapDataFields> {
        crate::commitment::unpack_data(self.data)
    }

    /// `true` if `token` is the native-currency sentinel (zero address).
    pub fn is_native(&self) -> bool {
        self.token.is_zero()
    }
}

/// Raw, already-validated Bitcoin light-client tip read from the relay
/// contract: `get_tip()` returns `None` while `height == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTip {
    pub commit_hash: B256,
    pub chain_work: U256,
    pub height: u32,
}

/// SPV Merkle inclusion proof for a Bitcoin transaction, as furnished by a
/// Bitcoin RPC collaborator and consumed by
/// `contract::SwapContractClient::claim_with_tx_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub block_height: u32,
    /// Index of the transaction within the block.
    pub tx_pos: u32,
    /// Sibling hashes from the transaction's leaf up to the block's
    /// merkle root, in bottom-up order.
    pub merkle: Vec<[u8; 32]>,
}

/// An unsigned transaction this crate has prepared for the caller to sign
/// and submit via its own `EvmRpc::send_transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas_limit: u64,
}

/// A confirmed (or reverted) on-chain transaction outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub status: bool,
    pub block_number: u64,
}

/// EIP-1559/legacy gas pricing, as returned by `EvmRpc::get_fee_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeData {
    pub last_base_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// Legacy gas price, used when EIP-1559 fields are unavailable.
    pub gas_price: U256,
}

impl FeeData {
    /// The gas price to use for fee estimation: `base + priority` if both
    /// EIP-1559 fields are present, else the legacy `gas_price`.
    pub fn effective_gas_price(&self) -> U256 {
        match (self.last_base_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(base), Some(tip)) => base + tip,
            _ => self.gas_price,
        }
    }
}
