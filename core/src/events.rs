//! Event Source: decodes the escrow contract's log stream into a tagged
//! `SwapEvent` variant (never the runtime `instanceof` double-dispatch the
//! source systems in this space use) and fans it out to registered
//! listeners in arrival order.

use std::sync::{Arc, Mutex};

use alloy_primitives::{B256, keccak256};

use crate::error::Result;
use crate::rpc::{EvmLog, RpcFuture};
use crate::types::SwapRecord;

mod topics {
    use alloy_primitives::B256;

    pub fn initialize() -> B256 {
        keccak256_of(b"Initialize(bytes32,uint64,bytes32,uint8)")
    }
    pub fn claim() -> B256 {
        keccak256_of(b"Claim(bytes32,uint64,bytes32)")
    }
    pub fn refund() -> B256 {
        keccak256_of(b"Refund(bytes32,uint64)")
    }

    fn keccak256_of(bytes: &[u8]) -> B256 {
        alloy_primitives::keccak256(bytes)
    }
}

/// A callback that resolves the full swap tuple an `Initialize` event
/// refers to. Logs only ever carry the commitment key, not the tuple
/// itself, so the event carries a way to fetch it lazily rather than the
/// tuple directly.
pub trait SwapDataFetcher: Send + Sync {
    fn fetch(&self) -> RpcFuture<'_, SwapRecord>;
}

/// Builds a [`SwapDataFetcher`] for a freshly decoded `Initialize` event,
/// parameterized over whatever collaborator (contract read, indexer call)
/// can resolve the swap tuple for a given transaction.
pub trait SwapDataFetcherFactory: Send + Sync {
    fn fetcher_for(&self, payment_hash: B256, transaction_hash: B256) -> Arc<dyn SwapDataFetcher>;
}

/// One decoded escrow-contract log, already resolved to its semantic kind.
#[derive(Clone)]
pub enum SwapEvent {
    Initialize {
        payment_hash: B256,
        sequence: u64,
        txo_hash: Option<B256>,
        index: u8,
        fetcher: Arc<dyn SwapDataFetcher>,
    },
    Claim {
        payment_hash: B256,
        sequence: u64,
        secret: [u8; 32],
    },
    Refund {
        payment_hash: B256,
        sequence: u64,
    },
}

impl std::fmt::Debug for SwapEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapEvent::Initialize {
                payment_hash,
                sequence,
                txo_hash,
                index,
                ..
            } => f
                .debug_struct("Initialize")
                .field("payment_hash", payment_hash)
                .field("sequence", sequence)
                .field("txo_hash", txo_hash)
                .field("index", index)
                .finish(),
            SwapEvent::Claim {
                payment_hash,
                sequence,
                secret,
            } => f
                .debug_struct("Claim")
                .field("payment_hash", payment_hash)
                .field("sequence", sequence)
                .field("secret", &hex::encode(secret))
                .finish(),
            SwapEvent::Refund {
                payment_hash,
                sequence,
            } => f
                .debug_struct("Refund")
                .field("payment_hash", payment_hash)
                .field("sequence", sequence)
                .finish(),
        }
    }
}

impl SwapEvent {
    pub fn payment_hash(&self) -> B256 {
        match self {
            SwapEvent::Initialize { payment_hash, .. } => *payment_hash,
            SwapEvent::Claim { payment_hash, .. } => *payment_hash,
            SwapEvent::Refund { payment_hash, .. } => *payment_hash,
        }
    }
}

/// Decode one log into a [`SwapEvent`], or `None` if it isn't one of the
/// three topics this crate understands (the contract may emit other
/// events this crate doesn't need).
pub fn decode_log(log: &EvmLog, factory: &dyn SwapDataFetcherFactory) -> Option<SwapEvent> {
    let topic0 = *log.topics.first()?;
    let payment_hash = *log.topics.get(1)?;

    if topic0 == topics::initialize() {
        if log.data.len() < 96 {
            return None;
        }
        let sequence = u64::from_be_bytes(log.data[24..32].try_into().ok()?);
        let txo_hash = B256::from_slice(&log.data[32..64]);
        let txo_hash = if txo_hash.is_zero() {
            None
        } else {
            Some(txo_hash)
        };
        let index = *log.data.get(95)?;
        let fetcher = factory.fetcher_for(payment_hash, log.transaction_hash);
        Some(SwapEvent::Initialize {
            payment_hash,
            sequence,
            txo_hash,
            index,
            fetcher,
        })
    } else if topic0 == topics::claim() {
        if log.data.len() < 64 {
            return None;
        }
        let sequence = u64::from_be_bytes(log.data[24..32].try_into().ok()?);
        let secret: [u8; 32] = log.data[32..64].try_into().ok()?;
        Some(SwapEvent::Claim {
            payment_hash,
            sequence,
            secret,
        })
    } else if topic0 == topics::refund() {
        if log.data.len() < 32 {
            return None;
        }
        let sequence = u64::from_be_bytes(log.data[24..32].try_into().ok()?);
        Some(SwapEvent::Refund {
            payment_hash,
            sequence,
        })
    } else {
        None
    }
}

/// Receives decoded events one batch at a time. Delivery within a batch is
/// sequential and awaited: a listener that is slow to return delays every
/// listener and event after it.
pub trait EventListener: Send + Sync {
    fn on_event<'a>(&'a self, event: &'a SwapEvent) -> RpcFuture<'a, ()>;
}

/// Registry + dispatcher for decoded escrow events. Registration and
/// unregistration are synchronous; [`Self::dispatch`] awaits each listener
/// in turn for every event in the batch, in order.
#[derive(Default)]
pub struct EventSource {
    listeners: Mutex<Vec<(u64, Arc<dyn EventListener>)>>,
    next_id: Mutex<u64>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning a handle for [`Self::unregister`].
    pub fn register(&self, listener: Arc<dyn EventListener>) -> u64 {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    pub fn unregister(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(l_id, _)| *l_id != id);
    }

    /// Deliver `events` to every registered listener, in arrival order,
    /// awaiting each call before moving to the next.
    pub async fn dispatch(&self, events: &[SwapEvent]) -> Result<()> {
        let listeners: Vec<_> = self.listeners.lock().unwrap().iter().map(|(_, l)| l.clone()).collect();
        for event in events {
            for listener in &listeners {
                listener.on_event(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::EvmLog;
    use alloy_primitives::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullFetcher;
    impl SwapDataFetcher for NullFetcher {
        fn fetch(&self) -> RpcFuture<'_, SwapRecord> {
            Box::pin(async move { Err(crate::error::Error::Other("not needed in test".into())) })
        }
    }

    struct NullFactory;
    impl SwapDataFetcherFactory for NullFactory {
        fn fetcher_for(&self, _payment_hash: B256, _transaction_hash: B256) -> Arc<dyn SwapDataFetcher> {
            Arc::new(NullFetcher)
        }
    }

    fn make_log(topic0: B256, payment_hash: B256, data: Vec<u8>) -> EvmLog {
        EvmLog {
            address: Address::ZERO,
            topics: vec![topic0, payment_hash],
            data,
            block_number: 1,
            transaction_hash: B256::repeat_byte(0xEE),
        }
    }

    #[test]
    fn decodes_initialize_event() {
        let payment_hash = B256::repeat_byte(0x11);
        let mut data = vec![0u8; 96];
        data[24..32].copy_from_slice(&7u64.to_be_bytes());
        data[32..64].copy_from_slice(B256::repeat_byte(0x22).as_slice());
        data[95] = 3;
        let log = make_log(topics::initialize(), payment_hash, data);

        let event = decode_log(&log, &NullFactory).unwrap();
        match event {
            SwapEvent::Initialize {
                payment_hash: ph,
                sequence,
                txo_hash,
                index,
                ..
            } => {
                assert_eq!(ph, payment_hash);
                assert_eq!(sequence, 7);
                assert_eq!(txo_hash, Some(B256::repeat_byte(0x22)));
                assert_eq!(index, 3);
            }
            _ => panic!("expected Initialize"),
        }
    }

    #[test]
    fn decodes_claim_event() {
        let payment_hash = B256::repeat_byte(0x33);
        let mut data = vec![0u8; 64];
        data[24..32].copy_from_slice(&9u64.to_be_bytes());
        data[32..64].copy_from_slice(&[0xAB; 32]);
        let log = make_log(topics::claim(), payment_hash, data);

        let event = decode_log(&log, &NullFactory).unwrap();
        match event {
            SwapEvent::Claim {
                payment_hash: ph,
                sequence,
                secret,
            } => {
                assert_eq!(ph, payment_hash);
                assert_eq!(sequence, 9);
                assert_eq!(secret, [0xABu8; 32]);
            }
            _ => panic!("expected Claim"),
        }
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let log = make_log(B256::repeat_byte(0xFF), B256::ZERO, vec![]);
        assert!(decode_log(&log, &NullFactory).is_none());
    }

    #[tokio::test]
    async fn dispatch_delivers_to_every_listener_in_order() {
        struct CountingListener(Arc<AtomicUsize>);
        impl EventListener for CountingListener {
            fn on_event<'a>(&'a self, _event: &'a SwapEvent) -> RpcFuture<'a, ()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(()) })
            }
        }

        let source = EventSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        source.register(Arc::new(CountingListener(count.clone())));
        source.register(Arc::new(CountingListener(count.clone())));

        let events = vec![SwapEvent::Refund {
            payment_hash: B256::ZERO,
            sequence: 0,
        }];
        source.dispatch(&events).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        struct CountingListener(Arc<AtomicUsize>);
        impl EventListener for CountingListener {
            fn on_event<'a>(&'a self, _event: &'a SwapEvent) -> RpcFuture<'a, ()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(()) })
            }
        }

        let source = EventSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = source.register(Arc::new(CountingListener(count.clone())));
        source.unregister(id);

        let events = vec![SwapEvent::Refund {
            payment_hash: B256::ZERO,
            sequence: 0,
        }];
        source.dispatch(&events).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
