//! Swap Contract Client: reads a swap's on-chain commitment status and
//! builds the unsigned transactions for every escrow transition (`init`,
//! `claim_with_secret`, `claim_with_tx_data`, `refund`, `refund_with_auth`)
//! plus the ERC-20 helpers a pay-in/pay-out flow needs.

use alloy_primitives::{Address, B256, U256};

use crate::abi;
use crate::auth::{self, Authorization};
use crate::cancel::CancellationToken;
use crate::commitment;
use crate::config::{ContractConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::header::StoredHeader;
use crate::rpc::{EvmRpc, RelaySynchronizer, SwapContractRpc};
use crate::types::{CommitStatus, MerkleProof, SwapRecord, TxReceipt, UnsignedTx};

/// Max-uint allowance cached/submitted by pay-in flows so a swap only ever
/// needs one approval per token, mirroring how most escrow integrations
/// amortize ERC-20 approvals.
pub const MAX_ALLOWANCE: U256 = U256::MAX;

fn swap_words(swap: &SwapRecord) -> [[u8; 32]; 8] {
    [
        abi::encode_address(&swap.offerer),
        abi::encode_address(&swap.claimer),
        abi::encode_address(&swap.token),
        abi::encode_u256(swap.amount),
        abi::encode_bytes32(&swap.payment_hash.0),
        abi::encode_u256(swap.data),
        abi::encode_u256(swap.security_deposit),
        abi::encode_u256(swap.claimer_bounty),
    ]
}

fn commit_hash_as_u256(swap: &SwapRecord) -> U256 {
    U256::from_be_bytes(commitment::commit_hash(swap).0)
}

pub struct SwapContractClient<R> {
    rpc: R,
    contract_address: Address,
    config: ContractConfig,
}

impl<R> SwapContractClient<R>
where
    R: SwapContractRpc + EvmRpc,
{
    pub fn new(rpc: R, contract_address: Address, config: ContractConfig) -> Self {
        Self {
            rpc,
            contract_address,
            config,
        }
    }

    /// Derive a swap's commitment status from the on-chain commitment
    /// slot, the locally held expiry, and whether `caller` is the swap's
    /// offerer.
    pub async fn get_commit_status(
        &self,
        swap: &SwapRecord,
        caller_is_offerer: bool,
        now: u64,
        config: &EngineConfig,
    ) -> Result<CommitStatus> {
        let onchain = self.rpc.get_commitment(swap.payment_hash).await?;
        let fields = swap.data_fields()?;
        let expired = now
            > fields
                .expiry
                .saturating_sub(config.refund_grace_period);

        if onchain == commitment::COMMITMENT_PAID {
            return Ok(CommitStatus::Paid);
        }

        if onchain < commitment::COMMITMENT_STATUS_RANGE {
            return Ok(if expired && caller_is_offerer {
                CommitStatus::Expired
            } else {
                CommitStatus::NotCommitted
            });
        }

        if onchain == commit_hash_as_u256(swap) {
            Ok(if caller_is_offerer && expired {
                CommitStatus::Refundable
            } else {
                CommitStatus::Committed
            })
        } else {
            Ok(if caller_is_offerer && expired {
                CommitStatus::Expired
            } else {
                CommitStatus::NotCommitted
            })
        }
    }

    fn selector(name: &str) -> [u8; 4] {
        abi::function_selector(name)
    }

    /// Build the `initialize` calldata shared by [`Self::init`] and
    /// [`Self::init_pay_in`]: the swap tuple, the init authorization's
    /// signature struct, and the chain-settlement txo commitment (zero for
    /// HTLC swaps).
    fn init_calldata(swap: &SwapRecord, auth: &Authorization, txo_hash: Option<B256>) -> Vec<u8> {
        let mut words = Vec::with_capacity(12);
        words.extend(swap_words(swap));
        words.extend(auth::encode_signature_struct(auth));
        words.push(abi::encode_bytes32(&txo_hash.unwrap_or_default().0));
        abi::encode_call(Self::selector("initialize(bytes32[12])"), &words)
    }

    /// Prepare `init`, charged to the claimer/relayer who pays gas without
    /// attaching value (the offerer has already paid in out of band).
    pub fn init(
        &self,
        swap: &SwapRecord,
        auth: &Authorization,
        txo_hash: Option<B256>,
    ) -> UnsignedTx {
        UnsignedTx {
            to: self.contract_address,
            data: Self::init_calldata(swap, auth, txo_hash),
            value: U256::ZERO,
            gas_limit: self.config.gas_init,
        }
    }

    /// Prepare `init_pay_in`, where the offerer funds the escrow in the
    /// same call. Native-currency swaps attach `amount` as the transaction
    /// value; token swaps prepend a max-allowance approval if the current
    /// allowance is insufficient.
    pub async fn init_pay_in(
        &self,
        swap: &SwapRecord,
        auth: &Authorization,
        txo_hash: Option<B256>,
        owner: Address,
    ) -> Result<Vec<UnsignedTx>> {
        let mut txs = Vec::with_capacity(2);
        let data = Self::init_calldata(swap, auth, txo_hash);

        if swap.is_native() {
            txs.push(UnsignedTx {
                to: self.contract_address,
                data,
                value: swap.amount,
                gas_limit: self.config.gas_init + self.config.gas_init_pay_in_pre,
            });
            return Ok(txs);
        }

        let allowance = self
            .rpc
            .get_allowance(swap.token, owner, self.contract_address)
            .await?;
        if allowance < swap.amount {
            txs.push(self.approve(swap.token, self.contract_address, MAX_ALLOWANCE));
        }
        txs.push(UnsignedTx {
            to: self.contract_address,
            data,
            value: U256::ZERO,
            gas_limit: self.config.gas_init + self.config.gas_init_pay_in_pre,
        });
        Ok(txs)
    }

    /// Prepare `claim_with_secret`. `preflight` (when set) rejects the
    /// build locally if less than `claim_grace_period` remains before the
    /// swap's expiry, sparing the caller a guaranteed-to-revert submission.
    pub fn claim_with_secret(
        &self,
        swap: &SwapRecord,
        secret: &[u8; 32],
        now: u64,
        claim_grace_period: Option<u64>,
    ) -> Result<UnsignedTx> {
        if let Some(grace) = claim_grace_period {
            let fields = swap.data_fields()?;
            if fields.expiry < now || fields.expiry - now < grace {
                return Err(Error::SwapDataVerification(
                    "not enough time left to claim".to_string(),
                ));
            }
        }

        let mut words = Vec::with_capacity(9);
        words.extend(swap_words(swap));
        words.push(abi::encode_bytes32(secret));

        Ok(UnsignedTx {
            to: self.contract_address,
            data: abi::encode_call(Self::selector("claimWithSecret(bytes32[9])"), &words),
            value: U256::ZERO,
            gas_limit: self.config.gas_claim_with_secret,
        })
    }

    /// Prepare an SPV claim: `{blockheight, txPos, merkleProof,
    /// committedHeader}` plus the raw Bitcoin transaction bytes. If the
    /// relay hasn't reached `merkle_proof.block_height +
    /// confirmations - 1`, a `synchronizer` is invoked to catch it up first
    /// and its transactions are returned ahead of the claim transaction.
    pub async fn claim_with_tx_data(
        &self,
        swap: &SwapRecord,
        tx_bytes: &[u8],
        vout: u32,
        merkle_proof: &MerkleProof,
        committed_header: Option<&StoredHeader>,
        relay_height: u32,
        synchronizer: Option<&dyn RelaySynchronizer>,
    ) -> Result<(Vec<UnsignedTx>, UnsignedTx)> {
        let fields = swap.data_fields()?;
        let required_height = merkle_proof
            .block_height
            .saturating_add(fields.confirmations as u32)
            .saturating_sub(1);

        let mut pre_txs = Vec::new();
        if relay_height < required_height {
            let synchronizer = synchronizer.ok_or(Error::NotSynchronized {
                needed: required_height,
                have: relay_height,
            })?;
            let (txs, _computed) = synchronizer.sync_to_latest().await?;
            pre_txs = txs;
        }

        let committed_header = committed_header.ok_or_else(|| {
            Error::InvalidArgument("committed header required to assemble SPV claim".into())
        })?;

        let mut data = abi::encode_call(
            Self::selector("claimWithTxData(bytes32[8],uint32,uint32,bytes,bytes32[],bytes)"),
            &{
                let mut words = Vec::with_capacity(10);
                words.extend(swap_words(swap));
                words.push(abi::encode_u256(U256::from(merkle_proof.block_height)));
                words.push(abi::encode_u256(U256::from(vout)));
                words
            },
        );
        data.extend_from_slice(&abi::encode_bytes_tail(&committed_header.serialize()));
        data.extend_from_slice(&abi::encode_bytes32_array_tail(&merkle_proof.merkle));
        data.extend_from_slice(&abi::encode_bytes_tail(tx_bytes));

        let claim_tx = UnsignedTx {
            to: self.contract_address,
            data,
            value: U256::ZERO,
            gas_limit: self.config.gas_claim_with_tx_data_base
                + self.config.gas_claim_with_tx_data_per_byte * tx_bytes.len() as u64,
        };
        Ok((pre_txs, claim_tx))
    }

    /// Prepare `refund`: requires the caller to be the offerer of an
    /// already-expired, non-refunded commitment; the contract itself
    /// enforces that precondition on submission.
    pub fn refund(&self, swap: &SwapRecord) -> UnsignedTx {
        UnsignedTx {
            to: self.contract_address,
            data: abi::encode_call(Self::selector("refund(bytes32[8])"), &swap_words(swap)),
            value: U256::ZERO,
            gas_limit: self.config.gas_refund,
        }
    }

    /// Prepare `refund_with_auth`, for a cooperative refund authorized by
    /// the claimer before expiry.
    pub fn refund_with_auth(&self, swap: &SwapRecord, auth: &Authorization) -> UnsignedTx {
        let mut words = Vec::with_capacity(11);
        words.extend(swap_words(swap));
        words.extend(auth::encode_signature_struct(auth));

        UnsignedTx {
            to: self.contract_address,
            data: abi::encode_call(Self::selector("refundWithAuth(bytes32[11])"), &words),
            value: U256::ZERO,
            gas_limit: self.config.gas_refund_with_auth,
        }
    }

    /// ERC-20 `deposit(address,uint256)`-style helper into the escrow's
    /// float, for market-making intermediaries that pre-fund liquidity.
    pub fn deposit(&self, token: Address, amount: U256) -> UnsignedTx {
        UnsignedTx {
            to: self.contract_address,
            data: abi::encode_call(
                Self::selector("deposit(address,uint256)"),
                &[abi::encode_address(&token), abi::encode_u256(amount)],
            ),
            value: U256::ZERO,
            gas_limit: self.config.gas_deposit,
        }
    }

    pub fn withdraw(&self, token: Address, amount: U256) -> UnsignedTx {
        UnsignedTx {
            to: self.contract_address,
            data: abi::encode_call(
                Self::selector("withdraw(address,uint256)"),
                &[abi::encode_address(&token), abi::encode_u256(amount)],
            ),
            value: U256::ZERO,
            gas_limit: self.config.gas_withdraw,
        }
    }

    pub fn transfer(&self, token: Address, to: Address, amount: U256) -> UnsignedTx {
        UnsignedTx {
            to: token,
            data: abi::encode_call(
                Self::selector("transfer(address,uint256)"),
                &[abi::encode_address(&to), abi::encode_u256(amount)],
            ),
            value: U256::ZERO,
            gas_limit: self.config.gas_transfer,
        }
    }

    pub fn approve(&self, token: Address, spender: Address, amount: U256) -> UnsignedTx {
        UnsignedTx {
            to: token,
            data: abi::encode_call(
                Self::selector("approve(address,uint256)"),
                &[abi::encode_address(&spender), abi::encode_u256(amount)],
            ),
            value: U256::ZERO,
            gas_limit: self.config.gas_approve,
        }
    }

    /// Publish a batch of prepared transactions. `parallel=false` waits for
    /// each receipt before submitting the next and aborts on the first
    /// revert; `parallel=true` submits every transaction before awaiting
    /// any of their receipts, still reported back in submission order.
    pub async fn send_and_confirm(
        &self,
        txs: Vec<UnsignedTx>,
        wait: bool,
        cancel: &CancellationToken,
        parallel: bool,
    ) -> Result<Vec<TxReceipt>> {
        if parallel {
            let mut hashes = Vec::with_capacity(txs.len());
            for tx in txs {
                cancel.check()?;
                hashes.push(self.rpc.send_transaction(tx).await?);
            }
            let mut receipts = Vec::with_capacity(hashes.len());
            for hash in hashes {
                cancel.check()?;
                receipts.push(self.await_receipt(hash, wait).await?);
            }
            Ok(receipts)
        } else {
            let mut receipts = Vec::with_capacity(txs.len());
            for tx in txs {
                cancel.check()?;
                let hash = self.rpc.send_transaction(tx).await?;
                let receipt = self.await_receipt(hash, wait).await?;
                if !receipt.status {
                    return Err(Error::TxReverted(format!("{:#x}", receipt.tx_hash)));
                }
                receipts.push(receipt);
            }
            Ok(receipts)
        }
    }

    async fn await_receipt(&self, hash: B256, wait: bool) -> Result<TxReceipt> {
        if wait {
            self.rpc.wait_for_transaction(hash).await
        } else {
            self.rpc
                .get_transaction_receipt(hash)
                .await?
                .ok_or_else(|| Error::Other(format!("no receipt yet for {hash:#x}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::pack_data;
    use crate::rpc::RpcFuture;
    use crate::types::{FeeData, SwapDataFields, SwapKind};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRpc {
        commitments: Mutex<HashMap<B256, U256>>,
        allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
        sent: Mutex<Vec<UnsignedTx>>,
        receipt_status: bool,
    }

    impl SwapContractRpc for FakeRpc {
        fn get_commitment(&self, payment_hash: B256) -> RpcFuture<'_, U256> {
            let v = self
                .commitments
                .lock()
                .unwrap()
                .get(&payment_hash)
                .copied()
                .unwrap_or_default();
            Box::pin(async move { Ok(v) })
        }
        fn get_allowance(&self, token: Address, owner: Address, spender: Address) -> RpcFuture<'_, U256> {
            let v = self
                .allowances
                .lock()
                .unwrap()
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or_default();
            Box::pin(async move { Ok(v) })
        }
    }

    impl EvmRpc for FakeRpc {
        fn get_block_number(&self) -> RpcFuture<'_, u64> {
            Box::pin(async move { Ok(1) })
        }
        fn get_logs(&self, _filter: crate::rpc::LogFilter) -> RpcFuture<'_, Vec<crate::rpc::EvmLog>> {
            Box::pin(async move { Ok(vec![]) })
        }
        fn get_transaction_receipt(&self, tx_hash: B256) -> RpcFuture<'_, Option<TxReceipt>> {
            let status = self.receipt_status;
            Box::pin(async move {
                Ok(Some(TxReceipt {
                    tx_hash,
                    status,
                    block_number: 1,
                }))
            })
        }
        fn wait_for_transaction(&self, tx_hash: B256) -> RpcFuture<'_, TxReceipt> {
            let status = self.receipt_status;
            Box::pin(async move {
                Ok(TxReceipt {
                    tx_hash,
                    status,
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
        fn send_transaction(&self, tx: UnsignedTx) -> RpcFuture<'_, B256> {
            self.sent.lock().unwrap().push(tx);
            Box::pin(async move { Ok(B256::repeat_byte(0x11)) })
        }
    }

    fn sample_swap(expiry: u64) -> SwapRecord {
        let fields = SwapDataFields {
            expiry,
            nonce: 1,
            confirmations: 2,
            kind: SwapKind::Htlc,
            pay_in: true,
            pay_out: true,
            index: 0,
        };
        SwapRecord {
            offerer: Address::repeat_byte(0xAA),
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

    fn fake_rpc(receipt_status: bool) -> FakeRpc {
        FakeRpc {
            commitments: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            receipt_status,
        }
    }

    #[tokio::test]
    async fn commit_status_paid() {
        let swap = sample_swap(2_000_000_000);
        let rpc = fake_rpc(true);
        rpc.commitments
            .lock()
            .unwrap()
            .insert(swap.payment_hash, commitment::COMMITMENT_PAID);
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());

        let status = client
            .get_commit_status(&swap, true, 1_700_000_000, &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(status, CommitStatus::Paid);
    }

    #[tokio::test]
    async fn commit_status_refundable_when_offerer_and_expired() {
        let swap = sample_swap(1_000);
        let rpc = fake_rpc(true);
        rpc.commitments
            .lock()
            .unwrap()
            .insert(swap.payment_hash, commit_hash_as_u256(&swap));
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());

        let status = client
            .get_commit_status(&swap, true, 2_000_000, &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(status, CommitStatus::Refundable);
    }

    #[tokio::test]
    async fn commit_status_committed_when_not_expired() {
        let swap = sample_swap(2_000_000_000);
        let rpc = fake_rpc(true);
        rpc.commitments
            .lock()
            .unwrap()
            .insert(swap.payment_hash, commit_hash_as_u256(&swap));
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());

        let status = client
            .get_commit_status(&swap, true, 1_700_000_000, &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(status, CommitStatus::Committed);
    }

    #[tokio::test]
    async fn init_pay_in_prepends_approval_when_allowance_insufficient() {
        let mut swap = sample_swap(2_000_000_000);
        swap.token = Address::repeat_byte(0x77);
        let rpc = fake_rpc(true);
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());
        let signer = crate::wallet::LocalSigner::new(
            bitcoin::secp256k1::SecretKey::from_slice(&[5u8; 32]).unwrap(),
        );
        let auth = Authorization::create(
            crate::auth::AuthKind::Initialize,
            &swap,
            2_500_000_000,
            &signer,
        )
        .unwrap();

        let txs = client
            .init_pay_in(&swap, &auth, None, Address::repeat_byte(0x99))
            .await
            .unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].to, swap.token);
    }

    #[tokio::test]
    async fn claim_with_secret_rejects_when_too_close_to_expiry() {
        let swap = sample_swap(1_000_300);
        let rpc = fake_rpc(true);
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());

        let err = client
            .claim_with_secret(&swap, &[0u8; 32], 1_000_000, Some(600))
            .unwrap_err();
        assert!(matches!(err, Error::SwapDataVerification(_)));
    }

    #[tokio::test]
    async fn send_and_confirm_aborts_on_revert_sequentially() {
        let rpc = fake_rpc(false);
        let client = SwapContractClient::new(rpc, Address::repeat_byte(1), ContractConfig::default());
        let tx = UnsignedTx {
            to: Address::repeat_byte(2),
            data: vec![],
            value: U256::ZERO,
            gas_limit: 21_000,
        };
        let cancel = CancellationToken::new();
        let err = client
            .send_and_confirm(vec![tx.clone(), tx], true, &cancel, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TxReverted(_)));
        assert_eq!(client.rpc.sent.lock().unwrap().len(), 1);
    }
}
