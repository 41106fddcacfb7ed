//! Bit-exact codec for raw Bitcoin block headers and the "stored header"
//! extension the BTC Relay contract commits to.
//!
//! The nBits decode and chain-work accumulation mirror the algorithm used by
//! Bitcoin Core (and reimplemented by every from-scratch light client): the
//! mantissa/exponent "compact" target encoding, and `work = 2^256/(target+1)`.

use alloy_primitives::U256;
use bitcoin::hashes::{Hash, sha256d};

use crate::error::{Error, Result};

/// Serialized size of a raw Bitcoin block header.
pub const RAW_HEADER_SIZE: usize = 80;

/// How many previous timestamps a stored header keeps, for median-time-past
/// style checks performed by the relay contract.
pub const PREV_TIMESTAMPS_LEN: usize = 10;

/// Height interval at which Bitcoin recalculates difficulty.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = 2016;

/// The 80-byte Bitcoin block header, decoded into its six canonical fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub nbits: u32,
    pub nonce: u32,
}

impl RawHeader {
    /// Serialize to the canonical 80-byte little-endian wire form.
    pub fn serialize(&self) -> [u8; RAW_HEADER_SIZE] {
        let mut buf = [0u8; RAW_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(&self.prev_hash);
        buf[36..68].copy_from_slice(&self.merkle_root);
        buf[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[72..76].copy_from_slice(&self.nbits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Parse the canonical 80-byte little-endian wire form.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RAW_HEADER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "header must be {RAW_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            version: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            prev_hash: bytes[4..36].try_into().unwrap(),
            merkle_root: bytes[36..68].try_into().unwrap(),
            timestamp: u32::from_le_bytes(bytes[68..72].try_into().unwrap()),
            nbits: u32::from_le_bytes(bytes[72..76].try_into().unwrap()),
            nonce: u32::from_le_bytes(bytes[76..80].try_into().unwrap()),
        })
    }

    /// Double-SHA256 of the serialized header, as Bitcoin's internal
    /// (little-endian) block hash representation.
    pub fn block_hash(&self) -> [u8; 32] {
        let digest = sha256d::Hash::hash(&self.serialize());
        *digest.as_byte_array()
    }

    /// Decode the "compact" nBits encoding into a full 256-bit target.
    ///
    /// This is the mantissa/exponent scheme Bitcoin Core uses (3 mantissa
    /// bytes, a 1-byte exponent, treated as if sign-extended from a 32-bit
    /// float): a mantissa with its top bit set (`> 0x7F_FFFF`) would be
    /// negative and decodes to a zero target instead.
    pub fn target(&self) -> U256 {
        let unshifted_expt = self.nbits >> 24;
        let (mant, expt): (u32, u32) = if unshifted_expt <= 3 {
            (
                (self.nbits & 0x00FF_FFFF) >> (8 * (3 - unshifted_expt)),
                0,
            )
        } else {
            (self.nbits & 0x00FF_FFFF, 8 * (unshifted_expt - 3))
        };

        if mant > 0x7F_FFFF {
            U256::ZERO
        } else {
            U256::from(mant) << expt
        }
    }

    /// Work contributed by a block with this header's target:
    /// `2^256 / (target + 1)`, computed without overflowing `U256`.
    pub fn work(&self) -> U256 {
        target_to_work(self.target())
    }
}

/// `2^256 / (target + 1)`, computed as `(!target) / (target + 1) + 1` to
/// avoid representing `2^256` itself (one past `U256::MAX`).
pub fn target_to_work(target: U256) -> U256 {
    let denom = target + U256::from(1);
    (!target) / denom + U256::from(1)
}

/// The relay contract's extended header: a raw header plus the accumulated
/// state a light client needs to validate the next one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredHeader {
    pub header: RawHeader,
    pub chain_work: U256,
    pub last_diff_adjustment_epoch: u32,
    pub prev_block_timestamps: [u32; PREV_TIMESTAMPS_LEN],
    pub block_height: u32,
}

impl StoredHeader {
    /// Construct the genesis/checkpoint stored header an initial sync
    /// starts from.
    pub fn new_initial(
        header: RawHeader,
        block_height: u32,
        chain_work: U256,
        last_diff_adjustment_epoch: u32,
        prev_block_timestamps: [u32; PREV_TIMESTAMPS_LEN],
    ) -> Self {
        Self {
            header,
            chain_work,
            last_diff_adjustment_epoch,
            prev_block_timestamps,
            block_height,
        }
    }

    /// Derive the stored header that follows `self` once `next` is mined on
    /// top of it.
    pub fn compute_next(&self, next: RawHeader) -> StoredHeader {
        let block_height = self.block_height + 1;
        let chain_work = self.chain_work + next.work();

        let mut prev_block_timestamps = self.prev_block_timestamps;
        prev_block_timestamps[(block_height as usize) % PREV_TIMESTAMPS_LEN] = next.timestamp;

        let last_diff_adjustment_epoch = if block_height % DIFFICULTY_ADJUSTMENT_INTERVAL == 0 {
            next.timestamp
        } else {
            self.last_diff_adjustment_epoch
        };

        StoredHeader {
            header: next,
            chain_work,
            last_diff_adjustment_epoch,
            prev_block_timestamps,
            block_height,
        }
    }

    /// Serialize in the layout the relay contract hashes: raw header bytes,
    /// then `last_diff_adjustment_epoch`, the ten previous timestamps,
    /// `block_height`, and finally `chain_work` as a 32-byte big-endian word.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RAW_HEADER_SIZE + 4 + PREV_TIMESTAMPS_LEN * 4 + 4 + 32);
        buf.extend_from_slice(&self.header.serialize());
        buf.extend_from_slice(&self.last_diff_adjustment_epoch.to_le_bytes());
        for ts in &self.prev_block_timestamps {
            buf.extend_from_slice(&ts.to_le_bytes());
        }
        buf.extend_from_slice(&self.block_height.to_le_bytes());
        buf.extend_from_slice(&self.chain_work.to_be_bytes::<32>());
        buf
    }

    /// Serialized size of [`StoredHeader::serialize`]'s output.
    pub const SERIALIZED_SIZE: usize = RAW_HEADER_SIZE + 4 + PREV_TIMESTAMPS_LEN * 4 + 4 + 32;

    /// Inverse of [`serialize`](Self::serialize). This is the layout carried
    /// in a relay event's log data, letting a scanner that has already found
    /// the matching event reconstruct the stored header without a separate
    /// Bitcoin RPC round trip.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SERIALIZED_SIZE {
            return Err(Error::InvalidArgument(format!(
                "stored header must be {} bytes, got {}",
                Self::SERIALIZED_SIZE,
                bytes.len()
            )));
        }

        let header = RawHeader::deserialize(&bytes[0..RAW_HEADER_SIZE])?;
        let mut offset = RAW_HEADER_SIZE;

        let last_diff_adjustment_epoch =
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;

        let mut prev_block_timestamps = [0u32; PREV_TIMESTAMPS_LEN];
        for ts in prev_block_timestamps.iter_mut() {
            *ts = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
            offset += 4;
        }

        let block_height = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;

        let chain_work = U256::from_be_bytes::<32>(bytes[offset..offset + 32].try_into().unwrap());

        Ok(Self {
            header,
            chain_work,
            last_diff_adjustment_epoch,
            prev_block_timestamps,
            block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(timestamp: u32, nonce: u32) -> RawHeader {
        RawHeader {
            version: 0x2000_0000,
            prev_hash: [0u8; 32],
            merkle_root: [1u8; 32],
            timestamp,
            nbits: 0x1705_3894,
            nonce,
        }
    }

    #[test]
    fn raw_header_roundtrips() {
        let header = sample_header(1_700_000_000, 42);
        let bytes = header.serialize();
        assert_eq!(bytes.len(), RAW_HEADER_SIZE);
        let decoded = RawHeader::deserialize(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn deserialize_rejects_wrong_length() {
        let err = RawHeader::deserialize(&[0u8; 79]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn target_decodes_low_exponent_mantissa() {
        // exponent byte <= 3 takes the right-shift branch.
        let header = RawHeader {
            nbits: 0x0300_8000,
            ..sample_header(0, 0)
        };
        assert_eq!(header.target(), U256::from(0x80u32));
    }

    #[test]
    fn target_is_zero_for_negative_mantissa() {
        let header = RawHeader {
            nbits: 0x0480_0000,
            ..sample_header(0, 0)
        };
        assert_eq!(header.target(), U256::ZERO);
    }

    #[test]
    fn work_of_max_target_is_one() {
        // target = 2^256 - 1 is not representable; use target = U256::MAX - 1
        // as a very large target, so (!target) is small.
        let work = target_to_work(U256::MAX);
        assert_eq!(work, U256::from(1));
    }

    #[test]
    fn compute_next_accumulates_height_and_work() {
        let genesis = sample_header(1_700_000_000, 0);
        let stored = StoredHeader::new_initial(genesis, 0, U256::from(1000), 1_700_000_000, [0; 10]);

        let next_raw = sample_header(1_700_000_600, 1);
        let next = stored.compute_next(next_raw.clone());

        assert_eq!(next.block_height, 1);
        assert_eq!(next.chain_work, stored.chain_work + next_raw.work());
        assert_eq!(next.prev_block_timestamps[1], 1_700_000_600);
        assert_eq!(next.last_diff_adjustment_epoch, 1_700_000_000);
    }

    #[test]
    fn compute_next_rolls_difficulty_epoch_at_boundary() {
        let genesis = sample_header(0, 0);
        let mut stored = StoredHeader::new_initial(genesis, DIFFICULTY_ADJUSTMENT_INTERVAL - 1, U256::ZERO, 0, [0; 10]);
        let next_raw = sample_header(99, 1);
        stored = stored.compute_next(next_raw);
        assert_eq!(stored.block_height, DIFFICULTY_ADJUSTMENT_INTERVAL);
        assert_eq!(stored.last_diff_adjustment_epoch, 99);
    }

    #[test]
    fn stored_header_roundtrips() {
        let genesis = sample_header(1_700_000_000, 7);
        let stored = StoredHeader::new_initial(
            genesis,
            12_345,
            U256::from(987_654_321u64),
            1_699_998_000,
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
        );
        let bytes = stored.serialize();
        assert_eq!(bytes.len(), StoredHeader::SERIALIZED_SIZE);
        let decoded = StoredHeader::deserialize(&bytes).unwrap();
        assert_eq!(stored, decoded);
    }

    #[test]
    fn stored_header_deserialize_rejects_wrong_length() {
        let err = StoredHeader::deserialize(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn block_hash_is_stable_for_identical_headers() {
        let a = sample_header(1, 1);
        let b = sample_header(1, 1);
        assert_eq!(a.block_hash(), b.block_hash());
    }
}
