//! Storage abstraction for persisted swap records: a typed key/value store
//! keyed by `payment_hash`, implementation left to the caller (filesystem,
//! browser storage, a database) — this crate only ever consumes `Storage`,
//! never implements a concrete backend.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use alloy_primitives::B256;

use crate::error::Result;
use crate::persisted::PersistedSwap;

/// Boxed future alias for [`Storage`], `Send` on native targets so the
/// trait stays usable from a multi-threaded runtime.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Typed persistence for swap records. Implementations own serialization
/// details; this crate only ever reads/writes whole `PersistedSwap`s.
pub trait Storage: Send + Sync {
    /// Load every persisted swap, keyed by payment hash.
    fn load_all_swaps(&self) -> StorageFuture<'_, HashMap<B256, PersistedSwap>>;
    fn save(&self, swap: PersistedSwap) -> StorageFuture<'_, ()>;
    fn save_many(&self, swaps: Vec<PersistedSwap>) -> StorageFuture<'_, ()>;
    fn remove(&self, payment_hash: B256) -> StorageFuture<'_, ()>;
}

/// In-memory [`Storage`] fake for tests, extending the crate's
/// in-memory-fake-per-collaborator convention to swap records.
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySwapStorage {
        swaps: Mutex<HashMap<B256, PersistedSwap>>,
    }

    impl MemorySwapStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Storage for MemorySwapStorage {
        fn load_all_swaps(&self) -> StorageFuture<'_, HashMap<B256, PersistedSwap>> {
            let swaps = self.swaps.lock().unwrap().clone();
            Box::pin(async move { Ok(swaps) })
        }

        fn save(&self, swap: PersistedSwap) -> StorageFuture<'_, ()> {
            self.swaps.lock().unwrap().insert(swap.payment_hash(), swap);
            Box::pin(async move { Ok(()) })
        }

        fn save_many(&self, swaps: Vec<PersistedSwap>) -> StorageFuture<'_, ()> {
            let mut guard = self.swaps.lock().unwrap();
            for swap in swaps {
                guard.insert(swap.payment_hash(), swap);
            }
            drop(guard);
            Box::pin(async move { Ok(()) })
        }

        fn remove(&self, payment_hash: B256) -> StorageFuture<'_, ()> {
            self.swaps.lock().unwrap().remove(&payment_hash);
            Box::pin(async move { Ok(()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySwapStorage;
    use super::*;
    use crate::commitment::pack_data;
    use crate::types::{SwapDataFields, SwapKind, SwapRecord, SwapState};
    use alloy_primitives::{Address, U256};

    fn sample(payment_hash: u8) -> PersistedSwap {
        let fields = SwapDataFields {
            expiry: 2_000_000_000,
            nonce: 1,
            confirmations: 1,
            kind: SwapKind::Htlc,
            pay_in: true,
            pay_out: true,
            index: 0,
        };
        let swap = SwapRecord {
            offerer: Address::repeat_byte(0xAA),
            claimer: Address::repeat_byte(0xBB),
            token: Address::ZERO,
            amount: U256::from(1000u64),
            payment_hash: B256::repeat_byte(payment_hash),
            data: pack_data(&fields),
            security_deposit: U256::ZERO,
            claimer_bounty: U256::ZERO,
            txo_hash: None,
        };
        PersistedSwap::from_fields(
            &swap,
            "https://x.example".into(),
            "lnbc1...".into(),
            "token-abc".into(),
            5,
            1_000,
            10,
            1000,
            2_000_000_000,
            SwapState::PrCreated,
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let storage = MemorySwapStorage::new();
        storage.save(sample(1)).await.unwrap();
        storage.save(sample(2)).await.unwrap();

        let all = storage.load_all_swaps().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&B256::repeat_byte(1)));
    }

    #[tokio::test]
    async fn save_many_then_remove() {
        let storage = MemorySwapStorage::new();
        storage.save_many(vec![sample(1), sample(2), sample(3)]).await.unwrap();
        storage.remove(B256::repeat_byte(2)).await.unwrap();

        let all = storage.load_all_swaps().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all.contains_key(&B256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn save_overwrites_existing_entry() {
        let storage = MemorySwapStorage::new();
        storage.save(sample(1)).await.unwrap();
        let mut updated = sample(1);
        updated.state = SwapState::ClaimClaimed;
        storage.save(updated).await.unwrap();

        let all = storage.load_all_swaps().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&B256::repeat_byte(1)].state, SwapState::ClaimClaimed);
    }
}
