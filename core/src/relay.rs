//! BTC Relay Client: tip reads, header-submission transaction builders, and
//! paginated log search for reconstructing stored headers by block hash or
//! commitment.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};

use crate::abi;
use crate::cancel::CancellationToken;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::header::{RawHeader, StoredHeader};
use crate::rpc::{BitcoinRpc, EvmRpc, LogFilter, RelayRpc};
use crate::types::{FeeData, RelayTip, UnsignedTx};

/// Topic0 values the relay contract emits; kept as named constants rather
/// than inline literals since `retrieve_*` filters on them directly.
mod topics {
    use alloy_primitives::B256;

    pub fn store_header() -> B256 {
        alloy_primitives::keccak256(b"StoreHeader(bytes32,uint32)")
    }

    pub fn store_fork() -> B256 {
        alloy_primitives::keccak256(b"StoreFork(bytes32,uint32,uint256)")
    }
}

/// Result of a header-submission builder: the prepared transaction plus the
/// stored-header chain the client precomputed off-chain, so callers don't
/// need a round trip to learn what they just submitted.
#[derive(Debug, Clone)]
pub struct HeaderSubmission {
    pub fork_id: u32,
    pub last_stored: StoredHeader,
    pub tx: UnsignedTx,
    pub computed: Vec<StoredHeader>,
}

/// A stored header recovered from relay logs, plus the relay's tip height
/// at the time of the scan.
#[derive(Debug, Clone)]
pub struct LogLookupResult {
    pub stored: StoredHeader,
    pub tip_height: u32,
}

pub struct RelayClient<R, B> {
    relay_rpc: R,
    bitcoin_rpc: B,
    contract_address: Address,
    config: RelayConfig,
}

impl<R, B> RelayClient<R, B>
where
    R: RelayRpc + EvmRpc,
    B: BitcoinRpc,
{
    pub fn new(relay_rpc: R, bitcoin_rpc: B, contract_address: Address, config: RelayConfig) -> Self {
        Self {
            relay_rpc,
            bitcoin_rpc,
            contract_address,
            config,
        }
    }

    /// Unpack the relay's packed tip word and pair it with its commitment,
    /// or `None` if the relay hasn't been initialized (`height == 0`).
    pub async fn get_tip(&self) -> Result<Option<RelayTip>> {
        let raw = self.relay_rpc.get_tip_raw().await?;
        let height = (raw >> 224).to::<u64>() as u32;
        if height == 0 {
            return Ok(None);
        }
        let chain_work = raw & ((U256::from(1u8) << 224) - U256::from(1u8));
        let commit_hash = self.relay_rpc.get_commitment_at_height(height).await?;
        Ok(Some(RelayTip {
            commit_hash,
            chain_work,
            height,
        }))
    }

    fn selector(name: &str) -> [u8; 4] {
        abi::function_selector(name)
    }

    /// Prepare the transaction that seeds the relay with its genesis
    /// checkpoint. `prev_timestamps` must be exactly 10 entries.
    pub fn save_initial_header(
        &self,
        raw: &RawHeader,
        height: u32,
        chain_work: U256,
        epoch_start: u32,
        prev_timestamps: &[u32],
    ) -> Result<UnsignedTx> {
        if prev_timestamps.len() != 10 {
            return Err(Error::InvalidArgument(format!(
                "expected exactly 10 previous timestamps, got {}",
                prev_timestamps.len()
            )));
        }

        let mut data = abi::encode_call(
            Self::selector("saveInitialHeader(bytes,uint32,uint256,uint32)"),
            &[
                abi::encode_u256(U256::from(height)),
                abi::encode_u256(chain_work),
                abi::encode_u256(U256::from(epoch_start)),
            ],
        );
        data.extend_from_slice(&abi::encode_bytes_tail(&raw.serialize()));
        for ts in prev_timestamps {
            data.extend_from_slice(&abi::encode_u256(U256::from(*ts)));
        }

        Ok(UnsignedTx {
            to: self.contract_address,
            data,
            value: U256::ZERO,
            gas_limit: self.config.gas_initial,
        })
    }

    /// Precompute the stored-header chain that extends `prev_stored` with
    /// `raws`, in order.
    fn precompute_chain(prev_stored: &StoredHeader, raws: &[RawHeader]) -> Vec<StoredHeader> {
        let mut chain = Vec::with_capacity(raws.len());
        let mut prev = prev_stored.clone();
        for raw in raws {
            let next = prev.compute_next(raw.clone());
            chain.push(next.clone());
            prev = next;
        }
        chain
    }

    fn submission_gas(base: u64, per_header: u64, n: usize) -> u64 {
        base + per_header * n as u64
    }

    fn raws_tail(raws: &[RawHeader]) -> Vec<u8> {
        let mut tail = Vec::new();
        let flat: Vec<u8> = raws.iter().flat_map(|r| r.serialize()).collect();
        tail.extend_from_slice(&abi::encode_bytes_tail(&flat));
        tail
    }

    /// Extend the main chain with a sequence of headers following
    /// `prev_stored`.
    pub fn save_main_headers(
        &self,
        raws: &[RawHeader],
        prev_stored: &StoredHeader,
    ) -> HeaderSubmission {
        let computed = Self::precompute_chain(prev_stored, raws);
        let mut data = abi::encode_call(Self::selector("saveMainHeaders(bytes)"), &[]);
        data.extend_from_slice(&Self::raws_tail(raws));

        HeaderSubmission {
            fork_id: 0,
            last_stored: computed.last().cloned().unwrap_or_else(|| prev_stored.clone()),
            tx: UnsignedTx {
                to: self.contract_address,
                data,
                value: U256::ZERO,
                gas_limit: Self::submission_gas(
                    self.config.gas_main_base,
                    self.config.gas_main_per_header,
                    raws.len(),
                ),
            },
            computed,
        }
    }

    /// Open a brand-new fork with `raws` extending `prev_stored`. If the
    /// precomputed tail ends up heavier than `tip_work`, the returned
    /// `fork_id` is advisory-zeroed: submission still targets the
    /// "new fork" entry point, but the caller/synchronizer should treat the
    /// fork as about to be promoted to main (see DESIGN.md open question).
    pub async fn save_new_fork_headers(
        &self,
        raws: &[RawHeader],
        prev_stored: &StoredHeader,
        tip_work: U256,
    ) -> Result<HeaderSubmission> {
        let fork_id = self.relay_rpc.get_fork_counter().await?;
        let computed = Self::precompute_chain(prev_stored, raws);
        let last = computed.last().cloned().unwrap_or_else(|| prev_stored.clone());
        let reported_fork_id = if last.chain_work > tip_work { 0 } else { fork_id };

        let mut data = abi::encode_call(Self::selector("saveNewForkHeaders(bytes)"), &[]);
        data.extend_from_slice(&Self::raws_tail(raws));

        Ok(HeaderSubmission {
            fork_id: reported_fork_id,
            last_stored: last,
            tx: UnsignedTx {
                to: self.contract_address,
                data,
                value: U256::ZERO,
                gas_limit: Self::submission_gas(
                    self.config.gas_new_fork_base,
                    self.config.gas_new_fork_per_header,
                    raws.len(),
                ),
            },
            computed,
        })
    }

    /// Extend an existing fork `fork_id` with `raws`. Same promotion rule
    /// as [`Self::save_new_fork_headers`].
    pub fn save_fork_headers(
        &self,
        raws: &[RawHeader],
        prev_stored: &StoredHeader,
        fork_id: u32,
        tip_work: U256,
    ) -> HeaderSubmission {
        let computed = Self::precompute_chain(prev_stored, raws);
        let last = computed.last().cloned().unwrap_or_else(|| prev_stored.clone());
        let reported_fork_id = if last.chain_work > tip_work { 0 } else { fork_id };

        let mut data = abi::encode_call(
            Self::selector("saveForkHeaders(bytes,uint32)"),
            &[abi::encode_u256(U256::from(fork_id))],
        );
        data.extend_from_slice(&Self::raws_tail(raws));

        HeaderSubmission {
            fork_id: reported_fork_id,
            last_stored: last,
            tx: UnsignedTx {
                to: self.contract_address,
                data,
                value: U256::ZERO,
                gas_limit: Self::submission_gas(
                    self.config.gas_fork_base,
                    self.config.gas_fork_per_header,
                    raws.len(),
                ),
            },
            computed,
        }
    }

    /// Decode a `StoreHeader`/`StoreFork` log's payload, laid out as
    /// `blockHash(32, reversed-LE) ++ commitHash(32) ++
    /// serializedStoredHeader(160)`. The stored header travels in the log
    /// itself so a scan hit never needs a Bitcoin RPC round trip to
    /// reconstruct it.
    fn decode_log_payload(data: &[u8]) -> Option<(B256, B256, StoredHeader)> {
        const PREFIX: usize = 64;
        if data.len() < PREFIX + StoredHeader::SERIALIZED_SIZE {
            return None;
        }
        let mut logged_hash = [0u8; 32];
        logged_hash.copy_from_slice(&data[0..32]);
        logged_hash.reverse();
        let mut commit_hash = [0u8; 32];
        commit_hash.copy_from_slice(&data[32..64]);
        let stored =
            StoredHeader::deserialize(&data[PREFIX..PREFIX + StoredHeader::SERIALIZED_SIZE]).ok()?;
        Some((B256::from(logged_hash), B256::from(commit_hash), stored))
    }

    /// Page backwards over the relay's log history in windows of
    /// `log_blocks_limit`, looking for a `StoreHeader`/`StoreFork` event
    /// whose reversed block hash matches `block_hash`. Returns `None` if
    /// the relay hasn't yet reached `required_height.unwrap_or(height)`.
    pub async fn retrieve_log_and_blockheight(
        &self,
        block_hash: B256,
        height: u32,
        required_height: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<LogLookupResult>> {
        let tip = match self.get_tip().await? {
            Some(tip) => tip,
            None => return Ok(None),
        };
        if tip.height < required_height.unwrap_or(height) {
            return Ok(None);
        }

        let mut window_end = self.relay_rpc.get_block_number().await?;
        loop {
            cancel.check()?;
            let window_start = window_end.saturating_sub(self.config.log_blocks_limit);

            let logs = self
                .relay_rpc
                .get_logs(LogFilter {
                    address: self.contract_address,
                    topics: vec![None],
                    from_block: window_start,
                    to_block: window_end,
                })
                .await?;

            for log in logs.iter().rev() {
                if log.topics.is_empty() {
                    continue;
                }
                if log.topics[0] != topics::store_header() && log.topics[0] != topics::store_fork() {
                    continue;
                }
                let Some((logged_hash, commit_hash, stored)) = Self::decode_log_payload(&log.data)
                else {
                    continue;
                };
                if logged_hash != block_hash {
                    continue;
                }

                let onchain_commit = self
                    .relay_rpc
                    .get_commitment_at_height(stored.block_height)
                    .await?;
                if onchain_commit != commit_hash {
                    // This log's height is not on the relay's current main
                    // chain (superseded by a later reorg); keep scanning.
                    continue;
                }

                return Ok(Some(LogLookupResult {
                    stored,
                    tip_height: tip.height,
                }));
            }

            if window_start == 0 {
                return Ok(None);
            }
            window_end = window_start.saturating_sub(1);
            tokio::time::sleep(std::time::Duration::from_millis(self.config.log_scan_sleep_ms)).await;
        }
    }

    /// Symmetric to [`Self::retrieve_log_and_blockheight`], but searches by
    /// the log's committed keccak digest rather than the block hash.
    pub async fn retrieve_log_by_commit_hash(
        &self,
        commit_hash: B256,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<LogLookupResult>> {
        let tip = match self.get_tip().await? {
            Some(tip) => tip,
            None => return Ok(None),
        };
        if tip.height < height {
            return Ok(None);
        }

        let mut window_end = self.relay_rpc.get_block_number().await?;
        loop {
            cancel.check()?;
            let window_start = window_end.saturating_sub(self.config.log_blocks_limit);

            let logs = self
                .relay_rpc
                .get_logs(LogFilter {
                    address: self.contract_address,
                    topics: vec![None],
                    from_block: window_start,
                    to_block: window_end,
                })
                .await?;

            for log in logs.iter().rev() {
                if log.topics.is_empty() {
                    continue;
                }
                if log.topics[0] != topics::store_header() && log.topics[0] != topics::store_fork() {
                    continue;
                }
                let Some((_logged_hash, logged_commit, stored)) =
                    Self::decode_log_payload(&log.data)
                else {
                    continue;
                };
                if logged_commit != commit_hash {
                    continue;
                }

                let onchain_commit = self
                    .relay_rpc
                    .get_commitment_at_height(stored.block_height)
                    .await?;
                if onchain_commit != commit_hash {
                    continue;
                }

                return Ok(Some(LogLookupResult {
                    stored,
                    tip_height: tip.height,
                }));
            }

            if window_start == 0 {
                return Ok(None);
            }
            window_end = window_start.saturating_sub(1);
            tokio::time::sleep(std::time::Duration::from_millis(self.config.log_scan_sleep_ms)).await;
        }
    }

    /// Scan backwards for the most recent relay log whose block hash is
    /// both on the Bitcoin RPC's main chain and whose committed data on the
    /// EVM side matches.
    pub async fn retrieve_latest_known_block_log(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<StoredHeader>> {
        if self.get_tip().await?.is_none() {
            return Ok(None);
        }

        let mut window_end = self.relay_rpc.get_block_number().await?;
        loop {
            cancel.check()?;
            let window_start = window_end.saturating_sub(self.config.log_blocks_limit);

            let logs = self
                .relay_rpc
                .get_logs(LogFilter {
                    address: self.contract_address,
                    topics: vec![None],
                    from_block: window_start,
                    to_block: window_end,
                })
                .await?;

            for log in logs.iter().rev() {
                let Some((block_hash, commit_hash, stored)) = Self::decode_log_payload(&log.data)
                else {
                    continue;
                };

                if !self.bitcoin_rpc.is_in_main_chain(block_hash).await? {
                    continue;
                }
                let onchain_commit = self
                    .relay_rpc
                    .get_commitment_at_height(stored.block_height)
                    .await?;
                if onchain_commit != commit_hash {
                    continue;
                }

                return Ok(Some(stored));
            }

            if window_start == 0 {
                return Ok(None);
            }
            window_end = window_start.saturating_sub(1);
            tokio::time::sleep(std::time::Duration::from_millis(self.config.log_scan_sleep_ms)).await;
        }
    }

    /// `(target_height - current_height) * gas_per_synchronize_header *
    /// gas_price`, zero if the relay has already caught up.
    pub async fn estimate_synchronize_fee(&self, target_height: u32) -> Result<U256> {
        let current_height = self.get_tip().await?.map(|t| t.height).unwrap_or(0);
        if target_height <= current_height {
            return Ok(U256::ZERO);
        }
        let fee_data: FeeData = self.relay_rpc.get_fee_data().await?;
        let gas_price = fee_data.effective_gas_price();
        let headers = U256::from(target_height - current_height);
        Ok(headers * U256::from(self.config.gas_per_synchronize_header) * gas_price)
    }

    /// Computed stored-header map keyed by height, as `RelaySynchronizer`
    /// implementations return to callers that need to look up intermediate
    /// headers without re-deriving the chain.
    pub fn computed_map(computed: &[StoredHeader]) -> HashMap<u32, StoredHeader> {
        computed.iter().map(|h| (h.block_height, h.clone())).collect()
    }
}
