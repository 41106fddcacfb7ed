//! Collaborator interfaces this crate consumes but never implements: the
//! EVM transport (log queries + transaction submission), a narrow set of
//! typed on-chain reads for the relay/escrow contracts, and the Bitcoin RPC
//! used to validate SPV proofs against the canonical chain.
//!
//! These use boxed futures so the traits stay object-safe, letting callers
//! wire in `ethers`/`alloy`-backed or fully synthetic implementations
//! interchangeably.

use std::future::Future;
use std::pin::Pin;

use alloy_primitives::{Address, B256, U256};

use crate::error::Result;
use crate::types::{FeeData, MerkleProof, TxReceipt, UnsignedTx};

/// Boxed future alias for the RPC traits below, `Send` on native targets.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A `get_logs` query window.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    /// `None` matches any topic in that position.
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

/// A single decoded EVM log entry.
#[derive(Debug, Clone)]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    /// Transaction that emitted this log, needed by `events` to report it.
    pub transaction_hash: B256,
}

/// The EVM JSON-RPC surface this crate needs: log queries and transaction
/// submission/confirmation, never raw contract calls (those go through the
/// narrower [`RelayRpc`]/[`SwapContractRpc`] read traits below).
pub trait EvmRpc: Send + Sync {
    fn get_block_number(&self) -> RpcFuture<'_, u64>;
    fn get_logs(&self, filter: LogFilter) -> RpcFuture<'_, Vec<EvmLog>>;
    fn get_transaction_receipt(&self, tx_hash: B256) -> RpcFuture<'_, Option<TxReceipt>>;
    /// Block until `tx_hash` is mined (or reverted) and return its receipt.
    fn wait_for_transaction(&self, tx_hash: B256) -> RpcFuture<'_, TxReceipt>;
    fn get_fee_data(&self) -> RpcFuture<'_, FeeData>;
    fn get_gas_price(&self) -> RpcFuture<'_, U256>;
    /// Submit a signed-by-the-caller transaction and return its hash.
    /// Unsigned transactions this crate prepares are handed to the caller,
    /// who signs with their own `Signer` before calling this.
    fn send_transaction(&self, tx: UnsignedTx) -> RpcFuture<'_, B256>;
}

/// Typed reads of the BTC Relay contract's storage, standing in for the
/// generic `eth_call` a real client would issue against the relay's ABI.
pub trait RelayRpc: Send + Sync {
    /// The packed tip word (`block_height << 224 | chain_work`); `0` if the
    /// relay has not been initialized.
    fn get_tip_raw(&self) -> RpcFuture<'_, U256>;
    /// The keccak commitment the relay has stored for `height`.
    fn get_commitment_at_height(&self, height: u32) -> RpcFuture<'_, B256>;
    /// The relay's current fork counter (next fork id to be assigned).
    fn get_fork_counter(&self) -> RpcFuture<'_, u32>;
}

/// Typed reads of the escrow contract's per-`payment_hash` commitment slot
/// and ERC-20 allowances, standing in for generic `eth_call`s.
pub trait SwapContractRpc: Send + Sync {
    fn get_commitment(&self, payment_hash: B256) -> RpcFuture<'_, U256>;
    fn get_allowance(&self, token: Address, owner: Address, spender: Address) -> RpcFuture<'_, U256>;
}

/// Bitcoin RPC surface needed to validate SPV proofs and detect reorgs.
pub trait BitcoinRpc: Send + Sync {
    fn get_block_header(&self, hash: B256) -> RpcFuture<'_, crate::header::RawHeader>;
    fn is_in_main_chain(&self, hash: B256) -> RpcFuture<'_, bool>;
    fn get_merkle_proof(&self, txid: B256, block_hash: B256) -> RpcFuture<'_, MerkleProof>;
}

/// A synchronizer that can bring the relay up to the latest Bitcoin tip,
/// consumed opportunistically by `contract::SwapContractClient::claim_with_tx_data`
/// when the relay hasn't reached the confirmations a claim needs yet.
pub trait RelaySynchronizer: Send + Sync {
    fn sync_to_latest(
        &self,
    ) -> RpcFuture<'_, (Vec<UnsignedTx>, std::collections::HashMap<u32, crate::header::StoredHeader>)>;
}
