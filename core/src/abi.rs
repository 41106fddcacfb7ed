//! Minimal Solidity ABI word encoding.
//!
//! This is not a general-purpose ABI codec: the crate never decodes contract
//! return data structurally (reads go through the narrow [`crate::rpc`]
//! traits instead), and every value this crate ever ABI-encodes is either a
//! static 32-byte word or a `bytes`/array tail appended after the head
//! words. That is all `encode_*` below needs to support.

use alloy_primitives::{Address, B256, U256, keccak256};

/// keccak256 of a function signature, truncated to the 4-byte selector
/// Solidity uses to dispatch calls.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Left-pad a 20-byte address into its 32-byte ABI head word.
pub fn encode_address(addr: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..32].copy_from_slice(addr.as_slice());
    word
}

/// A `uint256`/`bytes32` word, already 32 bytes wide.
pub fn encode_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes()
}

/// A `bytes32` word.
pub fn encode_bytes32(value: &[u8; 32]) -> [u8; 32] {
    *value
}

/// A `bool` head word.
pub fn encode_bool(value: bool) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[31] = value as u8;
    word
}

/// A `uint64` head word (right-aligned, like every other ABI integer).
pub fn encode_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..32].copy_from_slice(&value.to_be_bytes());
    word
}

/// Encode a dynamic `bytes` value as Solidity would in the tail of a call:
/// a 32-byte length word followed by the data, right-padded to a multiple
/// of 32 bytes.
pub fn encode_bytes_tail(data: &[u8]) -> Vec<u8> {
    let mut out = encode_u64(data.len() as u64).to_vec();
    out.extend_from_slice(data);
    let padding = (32 - (data.len() % 32)) % 32;
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}

/// Encode a dynamic array of `bytes32` words (e.g. a Merkle proof) as
/// Solidity would in the tail of a call: a length word, then the words.
pub fn encode_bytes32_array_tail(items: &[[u8; 32]]) -> Vec<u8> {
    let mut out = encode_u64(items.len() as u64).to_vec();
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// Concatenate a selector with a flat sequence of already-encoded words,
/// as for a call whose arguments are all static.
pub fn encode_call(selector: [u8; 4], words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + words.len() * 32);
    out.extend_from_slice(&selector);
    for word in words {
        out.extend_from_slice(word);
    }
    out
}

/// keccak256 over the concatenation of a set of already-encoded words —
/// the "static tuple" case of `abi.encode`, used for [`crate::commitment`]'s
/// swap commitment hash.
pub fn keccak_over_words(words: &[[u8; 32]]) -> B256 {
    let mut buf = Vec::with_capacity(words.len() * 32);
    for word in words {
        buf.extend_from_slice(word);
    }
    keccak256(buf)
}
