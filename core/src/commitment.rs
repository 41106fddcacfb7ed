//! Canonical commitment hashing: the packed `data:u256` field, the swap
//! commitment hash the escrow contract stores per `payment_hash`, and the
//! Bitcoin-output commitment used by chain-settled swaps.

use alloy_primitives::{B256, U256, keccak256};

use crate::abi;
use crate::error::{Error, Result};
use crate::types::{SwapDataFields, SwapKind, SwapRecord};

/// Pack a swap's decoded fields into the on-chain `data:u256` word.
///
/// Bit layout (lowest bit first): `expiry[0..64) | nonce[64..128) |
/// confirmations[128..144) | kind[144..152) | pay_in[152..160) |
/// pay_out[160..168) | index[168..176)`. Bits 176..256 are reserved (zero).
pub fn pack_data(fields: &SwapDataFields) -> U256 {
    U256::from(fields.expiry)
        | (U256::from(fields.nonce) << 64)
        | (U256::from(fields.confirmations) << 128)
        | (U256::from(fields.kind as u8) << 144)
        | (U256::from(fields.pay_in as u8) << 152)
        | (U256::from(fields.pay_out as u8) << 160)
        | (U256::from(fields.index) << 168)
}

/// Inverse of [`pack_data`].
pub fn unpack_data(data: U256) -> Result<SwapDataFields> {
    let mask64 = U256::from(u64::MAX);
    let expiry = ((data) & mask64).to::<u64>();
    let nonce = ((data >> 64) & mask64).to::<u64>();
    let confirmations = ((data >> 128) & U256::from(u16::MAX)).to::<u16>();
    let kind = ((data >> 144) & U256::from(u8::MAX)).to::<u8>();
    let pay_in = ((data >> 152) & U256::from(u8::MAX)).to::<u8>() != 0;
    let pay_out = ((data >> 160) & U256::from(u8::MAX)).to::<u8>() != 0;
    let index = ((data >> 168) & U256::from(u8::MAX)).to::<u8>();

    Ok(SwapDataFields {
        expiry,
        nonce,
        confirmations,
        kind: SwapKind::from_u8(kind)?,
        pay_in,
        pay_out,
        index,
    })
}

/// The on-chain commitment at a `payment_hash` slot, below which values are
/// reserved status codes rather than commitment hashes.
pub const COMMITMENT_STATUS_RANGE: U256 = U256::from_limbs([0x100, 0, 0, 0]);

/// The sentinel value meaning "this swap has been paid out".
pub const COMMITMENT_PAID: U256 = U256::from_limbs([0x100, 0, 0, 0]);

/// `keccak256(abi.encode(offerer, claimer, token, amount, payment_hash,
/// data, security_deposit, claimer_bounty))`. Every field is a static
/// 32-byte ABI word, so this is the plain concatenation of the eight
/// head words.
pub fn commit_hash(swap: &SwapRecord) -> B256 {
    let words = [
        abi::encode_address(&swap.offerer),
        abi::encode_address(&swap.claimer),
        abi::encode_address(&swap.token),
        abi::encode_u256(swap.amount),
        abi::encode_bytes32(&swap.payment_hash.0),
        abi::encode_u256(swap.data),
        abi::encode_u256(swap.security_deposit),
        abi::encode_u256(swap.claimer_bounty),
    ];
    abi::keccak_over_words(&words)
}

/// Whether `onchain` is a live commitment (as opposed to a reserved status
/// code below `0x100`, or the `PAID` sentinel).
pub fn is_live_commitment(onchain: U256) -> bool {
    onchain > COMMITMENT_STATUS_RANGE
}

/// Bitcoin-output commitment used by chain-settled swaps:
/// `keccak256(nonce_8B_BE || keccak256(amount_sats_8B_LE || output_script))`.
pub fn hash_for_onchain(output_script: &[u8], amount_sats: u64, nonce_sats: u64) -> B256 {
    let mut preimage = Vec::with_capacity(8 + output_script.len());
    preimage.extend_from_slice(&amount_sats.to_le_bytes());
    preimage.extend_from_slice(output_script);
    let txo_hash = keccak256(&preimage);

    let mut outer = Vec::with_capacity(8 + 32);
    outer.extend_from_slice(&nonce_sats.to_be_bytes());
    outer.extend_from_slice(txo_hash.as_slice());
    keccak256(&outer)
}

/// Convenience wrapper erroring with [`Error::SwapDataVerification`] when a
/// swap's packed `data.index` doesn't match the on-chain commitment slot's
/// current nonce/status value, used by replay protection in `auth`.
pub fn check_index_matches(expected_index: u8, onchain_index: U256) -> Result<()> {
    if U256::from(expected_index) != onchain_index {
        return Err(Error::SwapDataVerification(format!(
            "replay check failed: swap data.index {expected_index} != on-chain {onchain_index}"
        )));
    }
    Ok(())
}
