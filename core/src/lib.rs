//! Swaprelay Core - Client SDK for trust-minimized BTC <-> EVM atomic swaps
//!
//! Platform-agnostic logic for a participant (end-user or market-making
//! intermediary) to prepare, authorize, submit, track, claim, or refund
//! atomic swaps between Bitcoin (on-chain and Lightning) and an
//! EVM-compatible chain, settled against a Bitcoin light-client relay
//! contract. Storage, the EVM/Bitcoin RPC transport, and the intermediary
//! HTTP API are abstracted through traits so this crate can be driven from
//! any host (a CLI, a service, a browser extension) supplying its own
//! backends.
//!
//! The two hardest pieces are [`engine`] (the per-swap lifecycle state
//! machine) and [`relay`] (reconstructing and extending the on-chain
//! Bitcoin header chain). Everything else in this crate exists to feed
//! them a consistent, bit-exact view of the two chains' commitments.
//!
//! # Example
//!
//! ```rust,ignore
//! use swaprelay_core::{EngineConfig, SwapEngine};
//!
//! let engine = SwapEngine::new(storage, rpc, contract_address, intermediary, own_address, config);
//! engine.init(&cancel).await?;
//! ```

pub mod abi;
pub mod auth;
pub mod cancel;
pub mod commitment;
pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod events;
pub mod header;
pub mod intermediary;
pub mod oracle;
pub mod persisted;
pub mod relay;
pub mod retry;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod wallet;

pub use config::EngineConfig;
pub use contract::SwapContractClient;
pub use engine::SwapEngine;
pub use error::{Error, Result};
pub use events::EventSource;
pub use persisted::PersistedSwap;
pub use relay::RelayClient;
pub use storage::Storage;
pub use types::{CommitStatus, SwapRecord, SwapState};
pub use wallet::{LocalSigner, Signer};
