//! Swap Engine: the per-swap lifecycle state machine, the hardest single
//! piece in this crate. It owns the in-process swap cache,
//! reconciles persisted state against intermediary polls and on-chain
//! commitment reads at startup, and applies `Initialize`/`Claim`/`Refund`
//! events from the [`crate::events::EventSource`] afterwards — queueing
//! any that arrive before startup reconciliation completes so the local
//! poll always sees a chain view at least as fresh as the earliest
//! replayed event.
//!
//! Per-swap transitions are serialized through a short-lived registry of
//! per-`payment_hash` async mutexes (never one global lock: unrelated
//! swaps must never block each other). Startup reconciliation itself fans
//! out across swaps with a bounded concurrency limit
//! (`EngineConfig::max_concurrent_requests`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::auth::{self, AuthKind, Authorization};
use crate::cancel::CancellationToken;
use crate::commitment;
use crate::config::EngineConfig;
use crate::contract::SwapContractClient;
use crate::error::{Error, Result};
use crate::events::{EventListener, SwapEvent};
use crate::intermediary::IntermediaryApi;
use crate::persisted::PersistedSwap;
use crate::rpc::{EvmRpc, RpcFuture, SwapContractRpc};
use crate::storage::Storage;
use crate::types::{CommitStatus, SwapRecord, SwapState, TxReceipt};
use crate::wallet::RecoverableSignature;

/// One update from [`SwapEngine::wait_for_payment`]'s poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProgress {
    pub tx_id: String,
    pub confirmations: u32,
    pub target_confirmations: u32,
}

impl PaymentProgress {
    pub fn is_complete(&self) -> bool {
        self.confirmations >= self.target_confirmations
    }
}

/// Collaborator that reports a swap's inbound-payment progress —
/// Lightning invoice settlement or on-chain confirmation count,
/// whichever this swap's kind calls for. Decoding the payment itself
/// (Lightning invoices, mempool lookups) is out of scope for this crate;
/// this trait is the narrow seam the engine polls.
pub trait PaymentWatcher: Send + Sync {
    fn poll(&self, payment_hash: B256) -> RpcFuture<'_, PaymentProgress>;
}

/// Notified after every persisted state transition, once the new state is
/// durably saved. Exactly one call per transition: a swap settles into at
/// most one terminal state (`ClaimClaimed`, `Refunded`, `Expired`, `Failed`)
/// and is never observed crossing back out of it.
pub trait SwapStateListener: Send + Sync {
    fn on_state_change(&self, payment_hash: B256, old_state: SwapState, new_state: SwapState);
}

fn parse_signature(hex_str: &str) -> Result<RecoverableSignature> {
    let bytes =
        hex::decode(hex_str.trim_start_matches("0x")).map_err(|e| Error::Parse(format!("invalid signature hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(Error::Parse(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[0..32]);
    s.copy_from_slice(&bytes[32..64]);
    Ok(RecoverableSignature { r, s, v: bytes[64] })
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Structural equality of the fields an on-chain `Initialize` event's
/// fetched swap tuple must share with the locally persisted record. A
/// divergence here is logged and the event dropped rather than treated as
/// a crash, since there is no well-defined notion of a chain-sequence
/// comparison on the EVM path.
fn swap_data_matches(a: &SwapRecord, b: &SwapRecord) -> bool {
    a.offerer == b.offerer
        && a.claimer == b.claimer
        && a.token == b.token
        && a.amount == b.amount
        && a.payment_hash == b.payment_hash
        && a.security_deposit == b.security_deposit
        && a.claimer_bounty == b.claimer_bounty
}

/// The per-swap lifecycle state machine plus its wrapper: create, persist,
/// poll, reconcile with on-chain events, and expose the user-facing
/// operations (`commit`, `claim`, `refund`, `wait_for_payment`).
pub struct SwapEngine<S, R, I> {
    storage: Arc<S>,
    rpc: R,
    contract: SwapContractClient<R>,
    intermediary: Arc<I>,
    config: EngineConfig,
    /// The identity this engine instance acts as — compared against
    /// `swap.offerer` to decide which side of `get_commit_status` applies.
    own_address: Address,
    cache: StdMutex<HashMap<B256, PersistedSwap>>,
    locks: StdMutex<HashMap<B256, Arc<AsyncMutex<()>>>>,
    /// `Some(queue)` before [`Self::init`] has drained it: events arriving
    /// during startup reconciliation accumulate here instead of being
    /// applied directly. `None` once startup has handed off to live
    /// dispatch.
    queue: StdMutex<Option<VecDeque<SwapEvent>>>,
    state_listeners: StdMutex<Vec<(u64, Arc<dyn SwapStateListener>)>>,
    next_listener_id: StdMutex<u64>,
}

impl<S, R, I> SwapEngine<S, R, I>
where
    S: Storage,
    R: SwapContractRpc + EvmRpc + Clone,
    I: IntermediaryApi,
{
    pub fn new(storage: Arc<S>, rpc: R, contract_address: Address, intermediary: Arc<I>, own_address: Address, config: EngineConfig) -> Self {
        let contract = SwapContractClient::new(rpc.clone(), contract_address, config.contract.clone());
        Self {
            storage,
            rpc,
            contract,
            intermediary,
            config,
            own_address,
            cache: StdMutex::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            queue: StdMutex::new(Some(VecDeque::new())),
            state_listeners: StdMutex::new(Vec::new()),
            next_listener_id: StdMutex::new(0),
        }
    }

    pub fn register_state_listener(&self, listener: Arc<dyn SwapStateListener>) -> u64 {
        let mut next_id = self.next_listener_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        self.state_listeners.lock().unwrap().push((id, listener));
        id
    }

    pub fn unregister_state_listener(&self, id: u64) {
        self.state_listeners.lock().unwrap().retain(|(l_id, _)| *l_id != id);
    }

    fn notify_state_change(&self, payment_hash: B256, old_state: SwapState, new_state: SwapState) {
        let listeners = self.state_listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener.on_state_change(payment_hash, old_state, new_state);
        }
    }

    fn swap_lock(&self, payment_hash: B256) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(payment_hash)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn get(&self, payment_hash: B256) -> Option<PersistedSwap> {
        self.cache.lock().unwrap().get(&payment_hash).cloned()
    }

    /// Create a new swap record negotiated with an intermediary, in
    /// `PR_CREATED`, and persist it.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_swap(
        &self,
        swap: SwapRecord,
        url: String,
        pr: String,
        auth_token: String,
        base_fee_sats: u64,
        fee_ppm: u64,
        swap_fee: u64,
        fee_rate: u64,
    ) -> Result<PersistedSwap> {
        let fields = swap.data_fields()?;
        let persisted = PersistedSwap::from_fields(
            &swap,
            url,
            pr,
            auth_token,
            base_fee_sats,
            fee_ppm,
            swap_fee,
            fee_rate,
            fields.expiry,
            SwapState::PrCreated,
        );
        self.storage.save(persisted.clone()).await?;
        self.cache.lock().unwrap().insert(persisted.payment_hash(), persisted.clone());
        Ok(persisted)
    }

    /// Persist `new_state` for `persisted`, update the cache, and emit
    /// exactly one state-change notification — state writes are always
    /// durable before any observable event is emitted.
    async fn set_state(&self, mut persisted: PersistedSwap, new_state: SwapState) -> Result<PersistedSwap> {
        let old_state = persisted.state;
        persisted.state = new_state;
        self.storage.save(persisted.clone()).await?;
        self.cache.lock().unwrap().insert(persisted.payment_hash(), persisted.clone());
        self.notify_state_change(persisted.payment_hash(), old_state, new_state);
        Ok(persisted)
    }

    /// Load every persisted swap, fan out startup reconciliation across
    /// non-terminal swaps bounded by `max_concurrent_requests`, then drain
    /// whatever events queued up while that fan-out was running. Must run
    /// once before live events are accepted.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<()> {
        let loaded = self.storage.load_all_swaps().await?;
        {
            let mut cache = self.cache.lock().unwrap();
            *cache = loaded;
        }

        let pending: Vec<B256> = {
            let cache = self.cache.lock().unwrap();
            cache
                .values()
                .filter(|s| !s.state.is_terminal())
                .map(|s| s.payment_hash())
                .collect()
        };

        let now = now_unix();
        let limit = self.config.max_concurrent_requests.max(1);
        stream::iter(pending)
            .for_each_concurrent(limit, |payment_hash| async move {
                if let Err(e) = self.reconcile_once(payment_hash, now, cancel).await {
                    log::warn!("startup reconciliation failed for swap {payment_hash:#x}: {e}");
                }
            })
            .await;

        let queued: Vec<SwapEvent> = {
            let mut guard = self.queue.lock().unwrap();
            guard.take().unwrap_or_default().into_iter().collect()
        };
        for event in queued {
            if let Err(e) = self.process_event(&event, now_unix()).await {
                log::warn!("failed to apply queued event for {:#x}: {e}", event.payment_hash());
            }
        }
        Ok(())
    }

    async fn reconcile_once(&self, payment_hash: B256, now: u64, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let lock = self.swap_lock(payment_hash);
        let _guard = lock.lock().await;
        let persisted = self.cache.lock().unwrap().get(&payment_hash).cloned();
        let Some(persisted) = persisted else { return Ok(()) };

        match persisted.state {
            SwapState::PrCreated => self.reconcile_pr_created(persisted, now).await,
            SwapState::PrPaid => self.reconcile_pr_paid(persisted, now).await,
            SwapState::ClaimCommitted => self.reconcile_claim_committed(persisted, now).await,
            _ => Ok(()),
        }
    }

    async fn reconcile_pr_created(&self, persisted: PersistedSwap, now: u64) -> Result<()> {
        if now > persisted.expiry {
            self.set_state(persisted, SwapState::Expired).await?;
            return Ok(());
        }

        let swap = persisted.to_swap_record();
        let result = self
            .intermediary
            .get_payment_authorization(
                &persisted.url,
                &persisted.pr,
                &persisted.auth_token,
                swap.offerer,
                persisted.base_fee_sats,
                persisted.fee_ppm,
            )
            .await;

        match result {
            Ok(auth) if auth.is_paid => {
                let mut updated = persisted;
                updated.prefix = auth.prefix;
                updated.timeout = auth.timeout;
                updated.signature = auth.signature;
                if let Some(data) = auth.data {
                    updated.swap.data = data;
                }
                if let Some(expiry) = auth.expiry {
                    updated.expiry = expiry;
                }
                self.set_state(updated, SwapState::PrPaid).await?;
            }
            Ok(_) => {}
            Err(Error::PaymentAuth(_)) => {
                self.set_state(persisted, SwapState::Expired).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn reconcile_pr_paid(&self, persisted: PersistedSwap, now: u64) -> Result<()> {
        let swap = persisted.to_swap_record();
        let caller_is_offerer = swap.offerer == self.own_address;
        let status = self
            .contract
            .get_commit_status(&swap, caller_is_offerer, now, &self.config)
            .await?;

        match status {
            CommitStatus::Paid => {
                self.set_state(persisted, SwapState::ClaimClaimed).await?;
            }
            CommitStatus::Expired => {
                self.set_state(persisted, SwapState::Expired).await?;
            }
            CommitStatus::Committed => {
                self.set_state(persisted, SwapState::ClaimCommitted).await?;
            }
            CommitStatus::NotCommitted | CommitStatus::Refundable => {
                match self.verify_init_auth(&persisted, &swap, now).await {
                    Ok(_) => {}
                    Err(Error::SignatureVerification(_)) => {
                        self.set_state(persisted, SwapState::Expired).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn reconcile_claim_committed(&self, persisted: PersistedSwap, now: u64) -> Result<()> {
        let swap = persisted.to_swap_record();
        let caller_is_offerer = swap.offerer == self.own_address;
        let status = self
            .contract
            .get_commit_status(&swap, caller_is_offerer, now, &self.config)
            .await?;

        match status {
            CommitStatus::Paid => {
                self.set_state(persisted, SwapState::ClaimClaimed).await?;
            }
            CommitStatus::NotCommitted | CommitStatus::Expired => {
                self.set_state(persisted, SwapState::Failed).await?;
            }
            CommitStatus::Committed | CommitStatus::Refundable => {}
        }
        Ok(())
    }

    /// Re-verify a stored init authorization is still acceptable against
    /// the contract's current commitment-slot nonce. Used by `PR_PAID`
    /// reconciliation when the commitment hasn't appeared on-chain yet.
    async fn verify_init_auth(&self, persisted: &PersistedSwap, swap: &SwapRecord, now: u64) -> Result<Address> {
        let prefix = persisted
            .prefix
            .as_deref()
            .ok_or_else(|| Error::SignatureVerification("missing authorization prefix".to_string()))?;
        if prefix != "initialize" {
            return Err(Error::SignatureVerification(format!(
                "expected authorization prefix \"initialize\", got {prefix:?}"
            )));
        }
        let timeout = persisted
            .timeout
            .ok_or_else(|| Error::SignatureVerification("missing authorization timeout".to_string()))?;
        let signature = parse_signature(
            persisted
                .signature
                .as_deref()
                .ok_or_else(|| Error::SignatureVerification("missing authorization signature".to_string()))?,
        )?;
        let auth = Authorization {
            kind: AuthKind::Initialize,
            timeout,
            signature,
        };
        let onchain = self.rpc.get_commitment(swap.payment_hash).await?;
        auth::verify(&auth, AuthKind::Initialize, swap, Some(onchain), now, &self.config)
    }

    /// Apply one decoded on-chain event under this swap's per-key lock.
    async fn process_event(&self, event: &SwapEvent, now: u64) -> Result<()> {
        let _ = now;
        let payment_hash = event.payment_hash();
        let lock = self.swap_lock(payment_hash);
        let _guard = lock.lock().await;
        let persisted = self.cache.lock().unwrap().get(&payment_hash).cloned();
        let Some(persisted) = persisted else {
            log::debug!("ignoring event for unknown swap {payment_hash:#x}");
            return Ok(());
        };

        match event {
            SwapEvent::Initialize { txo_hash, fetcher, .. } => {
                if persisted.state != SwapState::PrPaid {
                    return Ok(());
                }
                let fetched = fetcher.fetch().await?;
                let current = persisted.to_swap_record();
                if !swap_data_matches(&current, &fetched) {
                    log::warn!(
                        "Initialize event for {payment_hash:#x} carries swap data diverging from the persisted record (possible reorg); dropping"
                    );
                    return Ok(());
                }
                let mut updated = persisted;
                updated.swap.txo_hash = *txo_hash;
                self.set_state(updated, SwapState::ClaimCommitted).await?;
            }
            SwapEvent::Claim { .. } => {
                if matches!(persisted.state, SwapState::PrPaid | SwapState::ClaimCommitted) {
                    self.set_state(persisted, SwapState::ClaimClaimed).await?;
                }
            }
            SwapEvent::Refund { .. } => {
                if matches!(persisted.state, SwapState::PrPaid | SwapState::ClaimCommitted) {
                    self.set_state(persisted, SwapState::Failed).await?;
                }
            }
        }
        Ok(())
    }

    /// Submit the commit (`init`) transaction for a swap whose intermediary
    /// authorization has been obtained (`PR_PAID`), funded by `owner`.
    pub async fn commit(&self, payment_hash: B256, owner: Address, cancel: &CancellationToken) -> Result<Vec<TxReceipt>> {
        let lock = self.swap_lock(payment_hash);
        let _guard = lock.lock().await;
        let persisted = self
            .cache
            .lock()
            .unwrap()
            .get(&payment_hash)
            .cloned()
            .ok_or_else(|| Error::SwapDataVerification(format!("unknown swap {payment_hash:#x}")))?;
        if persisted.state != SwapState::PrPaid {
            return Err(Error::SwapDataVerification(format!(
                "swap {payment_hash:#x} is not ready to commit (state {:?})",
                persisted.state
            )));
        }

        let swap = persisted.to_swap_record();
        let timeout = persisted
            .timeout
            .ok_or_else(|| Error::SwapDataVerification("missing authorization timeout".to_string()))?;
        let signature = parse_signature(
            persisted
                .signature
                .as_deref()
                .ok_or_else(|| Error::SwapDataVerification("missing authorization signature".to_string()))?,
        )?;
        let auth = Authorization {
            kind: AuthKind::Initialize,
            timeout,
            signature,
        };

        let txs = self.contract.init_pay_in(&swap, &auth, swap.txo_hash, owner).await?;
        let receipts = self.contract.send_and_confirm(txs, true, cancel, false).await?;

        let mut updated = persisted;
        if let Some(last) = receipts.last() {
            updated.commit_tx_id = Some(format!("{:#x}", last.tx_hash));
        }
        self.set_state(updated, SwapState::ClaimCommitted).await?;
        Ok(receipts)
    }

    /// Claim a committed HTLC swap by revealing `secret`.
    pub async fn claim_with_secret(
        &self,
        payment_hash: B256,
        secret: [u8; 32],
        now: u64,
        cancel: &CancellationToken,
    ) -> Result<TxReceipt> {
        let lock = self.swap_lock(payment_hash);
        let _guard = lock.lock().await;
        let persisted = self
            .cache
            .lock()
            .unwrap()
            .get(&payment_hash)
            .cloned()
            .ok_or_else(|| Error::SwapDataVerification(format!("unknown swap {payment_hash:#x}")))?;

        let swap = persisted.to_swap_record();
        let tx = self
            .contract
            .claim_with_secret(&swap, &secret, now, Some(self.config.claim_grace_period))?;
        let receipts = self.contract.send_and_confirm(vec![tx], true, cancel, false).await?;
        let receipt = receipts
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("no receipt returned for claim".to_string()))?;

        let mut updated = persisted;
        updated.claim_tx_id = Some(format!("{:#x}", receipt.tx_hash));
        self.set_state(updated, SwapState::ClaimClaimed).await?;
        Ok(receipt)
    }

    /// Refund a committed, expired swap back to its offerer.
    pub async fn refund(&self, payment_hash: B256, now: u64, cancel: &CancellationToken) -> Result<TxReceipt> {
        let lock = self.swap_lock(payment_hash);
        let _guard = lock.lock().await;
        let persisted = self
            .cache
            .lock()
            .unwrap()
            .get(&payment_hash)
            .cloned()
            .ok_or_else(|| Error::SwapDataVerification(format!("unknown swap {payment_hash:#x}")))?;

        let swap = persisted.to_swap_record();
        let caller_is_offerer = swap.offerer == self.own_address;
        let status = self
            .contract
            .get_commit_status(&swap, caller_is_offerer, now, &self.config)
            .await?;
        if status != CommitStatus::Refundable {
            return Err(Error::SwapDataVerification(format!(
                "swap {payment_hash:#x} is not refundable (status {status:?})"
            )));
        }

        let tx = self.contract.refund(&swap);
        let receipts = self.contract.send_and_confirm(vec![tx], true, cancel, false).await?;
        let receipt = receipts
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("no receipt returned for refund".to_string()))?;

        let mut updated = persisted;
        updated.commit_tx_id = Some(format!("{:#x}", receipt.tx_hash));
        self.set_state(updated, SwapState::Failed).await?;
        Ok(receipt)
    }

    /// Poll `watcher` on `poll_interval` until the inbound payment reaches
    /// its target confirmations, reporting every intermediate update via
    /// `on_update`. Rejects on cancellation or if the swap reaches a
    /// terminal state while waiting.
    pub async fn wait_for_payment(
        &self,
        payment_hash: B256,
        watcher: &dyn PaymentWatcher,
        poll_interval: Duration,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(&PaymentProgress),
    ) -> Result<PaymentProgress> {
        loop {
            cancel.check()?;
            if let Some(persisted) = self.get(payment_hash) {
                if persisted.state.is_terminal() {
                    return Err(Error::SwapDataVerification(format!(
                        "swap {payment_hash:#x} reached terminal state {:?} while waiting for payment",
                        persisted.state
                    )));
                }
            }

            let progress = watcher.poll(payment_hash).await?;
            on_update(&progress);
            if progress.is_complete() {
                return Ok(progress);
            }
            cancel.check()?;
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl<S, R, I> EventListener for SwapEngine<S, R, I>
where
    S: Storage,
    R: SwapContractRpc + EvmRpc + Clone,
    I: IntermediaryApi,
{
    fn on_event<'a>(&'a self, event: &'a SwapEvent) -> RpcFuture<'a, ()> {
        Box::pin(async move {
            let queued = {
                let mut guard = self.queue.lock().unwrap();
                match guard.as_mut() {
                    Some(q) => {
                        q.push_back(event.clone());
                        true
                    }
                    None => false,
                }
            };
            if queued {
                return Ok(());
            }
            self.process_event(event, now_unix()).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::pack_data;
    use crate::rpc::{EvmLog, LogFilter};
    use crate::storage::memory::MemorySwapStorage;
    use crate::types::{FeeData, SwapDataFields, SwapKind};
    use crate::intermediary::{LightningReceiveOffer, PaymentAuthorization};
    use alloy_primitives::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_swap(expiry: u64, offerer: Address) -> SwapRecord {
        let fields = SwapDataFields {
            expiry,
            nonce: 1,
            confirmations: 1,
            kind: SwapKind::Htlc,
            pay_in: true,
            pay_out: true,
            index: 0,
        };
        SwapRecord {
            offerer,
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

    #[derive(Clone, Default)]
    struct FakeChainRpc {
        commitments: Arc<StdMutex<HashMap<B256, U256>>>,
    }

    impl SwapContractRpc for FakeChainRpc {
        fn get_commitment(&self, payment_hash: B256) -> RpcFuture<'_, U256> {
            let v = self.commitments.lock().unwrap().get(&payment_hash).copied().unwrap_or_default();
            Box::pin(async move { Ok(v) })
        }
        fn get_allowance(&self, _token: Address, _owner: Address, _spender: Address) -> RpcFuture<'_, U256> {
            Box::pin(async move { Ok(U256::ZERO) })
        }
    }

    impl EvmRpc for FakeChainRpc {
        fn get_block_number(&self) -> RpcFuture<'_, u64> {
            Box::pin(async move { Ok(1) })
        }
        fn get_logs(&self, _filter: LogFilter) -> RpcFuture<'_, Vec<EvmLog>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn get_transaction_receipt(&self, tx_hash: B256) -> RpcFuture<'_, Option<TxReceipt>> {
            Box::pin(async move {
                Ok(Some(TxReceipt {
                    tx_hash,
                    status: true,
                    block_number: 1,
                }))
            })
        }
        fn wait_for_transaction(&self, tx_hash: B256) -> RpcFuture<'_, TxReceipt> {
            Box::pin(async move {
                Ok(TxReceipt {
                    tx_hash,
                    status: true,
                    block_number: 1,
                })
            })
        }
        fn get_fee_data(&self) -> RpcFuture<'_, FeeData> {
            Box::pin(async move { Ok(FeeData::default()) })
        }
        fn get_gas_price(&self) -> RpcFuture<'_, U256> {
            Box::pin(async move { Ok(U256::from(1u64)) })
        }
        fn send_transaction(&self, _tx: crate::types::UnsignedTx) -> RpcFuture<'_, B256> {
            Box::pin(async move { Ok(B256::repeat_byte(0x11)) })
        }
    }

    struct FakeIntermediary;
    impl IntermediaryApi for FakeIntermediary {
        fn get_payment_authorization<'a>(
            &'a self,
            _base_url: &'a str,
            _pr: &'a str,
            _auth_token: &'a str,
            _offerer: Address,
            _base_fee: u64,
            _fee_ppm: u64,
        ) -> RpcFuture<'a, PaymentAuthorization> {
            Box::pin(async move {
                Ok(PaymentAuthorization {
                    is_paid: false,
                    data: None,
                    prefix: None,
                    timeout: None,
                    signature: None,
                    expiry: None,
                })
            })
        }
        fn receive_lightning<'a>(
            &'a self,
            _base_url: &'a str,
            _auth_token: &'a str,
            _amount_sats: u64,
            _token: Address,
            _offerer: Address,
            _description: &'a str,
        ) -> RpcFuture<'a, LightningReceiveOffer> {
            Box::pin(async move { Err(Error::Other("not needed in test".into())) })
        }
    }

    fn engine(
        chain: FakeChainRpc,
    ) -> SwapEngine<MemorySwapStorage, FakeChainRpc, FakeIntermediary> {
        SwapEngine::new(
            Arc::new(MemorySwapStorage::new()),
            chain,
            Address::repeat_byte(0x01),
            Arc::new(FakeIntermediary),
            Address::repeat_byte(0xAA),
            EngineConfig::default(),
        )
    }

    async fn seed(
        eng: &SwapEngine<MemorySwapStorage, FakeChainRpc, FakeIntermediary>,
        swap: &SwapRecord,
        state: SwapState,
    ) {
        let persisted = PersistedSwap::from_fields(
            swap,
            "https://intermediary.example".into(),
            "lnbc1...".into(),
            "token-abc".into(),
            5,
            1_000,
            10,
            1_000,
            swap.data_fields().unwrap().expiry,
            state,
        );
        eng.storage.save(persisted).await.unwrap();
    }

    struct CountingStateListener(Arc<AtomicUsize>);
    impl SwapStateListener for CountingStateListener {
        fn on_state_change(&self, _payment_hash: B256, _old_state: SwapState, _new_state: SwapState) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn startup_transitions_paid_pr_to_claim_committed_once() {
        let offerer = Address::repeat_byte(0xAA);
        let swap = sample_swap(2_000_000_000, offerer);
        let chain = FakeChainRpc::default();
        chain
            .commitments
            .lock()
            .unwrap()
            .insert(swap.payment_hash, U256::from_be_bytes(commitment::commit_hash(&swap).0));

        let eng = engine(chain);
        seed(&eng, &swap, SwapState::PrPaid).await;

        let count = Arc::new(AtomicUsize::new(0));
        eng.register_state_listener(Arc::new(CountingStateListener(count.clone())));

        eng.init(&CancellationToken::new()).await.unwrap();

        let persisted = eng.get(swap.payment_hash).unwrap();
        assert_eq!(persisted.state, SwapState::ClaimCommitted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn event_queued_during_startup_applies_after_poll_transition() {
        let offerer = Address::repeat_byte(0xAA);
        let swap = sample_swap(2_000_000_000, offerer);
        let chain = FakeChainRpc::default();
        chain
            .commitments
            .lock()
            .unwrap()
            .insert(swap.payment_hash, U256::from_be_bytes(commitment::commit_hash(&swap).0));

        let eng = engine(chain);
        seed(&eng, &swap, SwapState::PrPaid).await;

        // Simulate an event that arrives concurrently with startup: since
        // init() hasn't drained the queue yet, dispatch routes through it.
        let event = SwapEvent::Claim {
            payment_hash: swap.payment_hash,
            sequence: 1,
            secret: [0x42; 32],
        };
        {
            let mut guard = eng.queue.lock().unwrap();
            guard.as_mut().unwrap().push_back(event);
        }

        eng.init(&CancellationToken::new()).await.unwrap();

        let persisted = eng.get(swap.payment_hash).unwrap();
        assert_eq!(persisted.state, SwapState::ClaimClaimed);
    }

    #[tokio::test]
    async fn expired_before_payment_transitions_to_expired() {
        let offerer = Address::repeat_byte(0xAA);
        let swap = sample_swap(2_000_000_000, offerer);
        let eng = engine(FakeChainRpc::default());

        let persisted = PersistedSwap::from_fields(
            &swap,
            "https://intermediary.example".into(),
            "lnbc1...".into(),
            "token-abc".into(),
            5,
            1_000,
            10,
            1_000,
            100, // expiry already in the past relative to "now"
            SwapState::PrCreated,
        );
        eng.storage.save(persisted).await.unwrap();

        eng.init(&CancellationToken::new()).await.unwrap();
        let persisted = eng.get(swap.payment_hash).unwrap();
        assert_eq!(persisted.state, SwapState::Expired);
    }

    #[tokio::test]
    async fn refund_fails_when_not_refundable() {
        let offerer = Address::repeat_byte(0xAA);
        let swap = sample_swap(2_000_000_000, offerer);
        let eng = engine(FakeChainRpc::default());
        seed(&eng, &swap, SwapState::ClaimCommitted).await;
        eng.init(&CancellationToken::new()).await.unwrap();

        let err = eng.refund(swap.payment_hash, 1_700_000_000, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::SwapDataVerification(_)));
    }

    #[tokio::test]
    async fn wait_for_payment_resolves_on_target_confirmations() {
        struct StepWatcher(AtomicUsize);
        impl PaymentWatcher for StepWatcher {
            fn poll(&self, _payment_hash: B256) -> RpcFuture<'_, PaymentProgress> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    Ok(PaymentProgress {
                        tx_id: "abc".to_string(),
                        confirmations: n as u32,
                        target_confirmations: 2,
                    })
                })
            }
        }

        let eng = engine(FakeChainRpc::default());
        let watcher = StepWatcher(AtomicUsize::new(0));
        let mut updates = Vec::new();
        let result = eng
            .wait_for_payment(
                B256::repeat_byte(0xCC),
                &watcher,
                Duration::from_millis(1),
                &CancellationToken::new(),
                |p| updates.push(p.clone()),
            )
            .await
            .unwrap();

        assert_eq!(result.confirmations, 2);
        assert_eq!(updates.len(), 3);
    }

    #[tokio::test]
    async fn wait_for_payment_rejects_when_cancelled() {
        struct NeverWatcher;
        impl PaymentWatcher for NeverWatcher {
            fn poll(&self, _payment_hash: B256) -> RpcFuture<'_, PaymentProgress> {
                Box::pin(async move {
                    Ok(PaymentProgress {
                        tx_id: "abc".to_string(),
                        confirmations: 0,
                        target_confirmations: 1,
                    })
                })
            }
        }

        let eng = engine(FakeChainRpc::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = eng
            .wait_for_payment(B256::repeat_byte(0xCC), &NeverWatcher, Duration::from_millis(1), &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
