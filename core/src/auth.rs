//! Construction and verification of the time-bounded authorization
//! signatures that gate the `init`, `claim_with_secret`/`claim_with_tx_data`
//! (claim-init), and `refund_with_auth` transitions.

use alloy_primitives::{Address, B256, U256};

use crate::abi;
use crate::commitment;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::types::SwapRecord;
use crate::wallet::{RecoverableSignature, Signer};

/// Which transition an authorization message is scoped to. The literal
/// prefix is part of the signed message and must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Initialize,
    ClaimInitialize,
    Refund,
    /// Raw-data signing (no commit-hash/timeout envelope), used for
    /// collaborator-facing proofs that don't gate an on-chain transition.
    Data,
}

impl AuthKind {
    /// The literal prefix byte string signed as part of the message.
    pub fn prefix(self) -> &'static [u8] {
        match self {
            AuthKind::Initialize => b"initialize",
            AuthKind::ClaimInitialize => b"claim_initialize",
            AuthKind::Refund => b"refund",
            AuthKind::Data => b"data",
        }
    }
}

/// A signed, time-bounded authorization for one of a swap's transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub kind: AuthKind,
    /// Unix timestamp after which the authorization is no longer valid.
    pub timeout: u64,
    pub signature: RecoverableSignature,
}

impl Authorization {
    /// `keccak256(abi.encodePacked(bytes(prefix), bytes32(commit_hash),
    /// uint64(timeout)))` — the message the signer signs (inside its own
    /// personal-message envelope).
    pub fn digest(kind: AuthKind, commit_hash: B256, timeout: u64) -> B256 {
        let mut packed = Vec::with_capacity(kind.prefix().len() + 32 + 8);
        packed.extend_from_slice(kind.prefix());
        packed.extend_from_slice(commit_hash.as_slice());
        packed.extend_from_slice(&timeout.to_be_bytes());
        alloy_primitives::keccak256(&packed)
    }

    /// Build and sign an authorization over `swap`'s commitment hash.
    pub fn create(
        kind: AuthKind,
        swap: &SwapRecord,
        timeout: u64,
        signer: &impl Signer,
    ) -> Result<Self> {
        let digest = Self::digest(kind, commitment::commit_hash(swap), timeout);
        let signature = signer.sign_personal_message(digest)?;
        Ok(Self {
            kind,
            timeout,
            signature,
        })
    }

    /// Pack `(timeout, v)` into the single `u256` the on-chain submission
    /// format expects: `timeout << 8 | v`.
    pub fn packed_timeout_and_v(&self) -> U256 {
        (U256::from(self.timeout) << 8) | U256::from(self.signature.v as u64)
    }

    /// Recover the address that produced `signature` over `digest`.
    pub fn recover(&self, digest: B256) -> Result<Address> {
        self.signature.recover(digest)
    }

    /// Whether `now` (unix seconds) is past the point where clients should
    /// stop offering this authorization in the UI — `auth_grace_period`
    /// before hard expiry.
    pub fn is_soft_expired(&self, now_ms: u128, auth_grace_period: u64) -> bool {
        now_ms > (self.timeout.saturating_sub(auth_grace_period) as u128) * 1000
    }

    /// Whether `now` is past the point where the authorization is rejected
    /// outright on submission.
    pub fn is_expired(&self, now_ms: u128, auth_grace_period: u64) -> bool {
        now_ms > (self.timeout + auth_grace_period) as u128 * 1000
    }
}

/// Verify all preconditions for `auth` against `swap`, where
/// `onchain_index` is the contract's current commitment-slot nonce/status
/// value (only required for `Initialize`/`ClaimInitialize`). Returns the
/// recovered signer address on success.
///
/// The first violated rule is reported; later rules are not evaluated.
pub fn verify(
    auth: &Authorization,
    expected_kind: AuthKind,
    swap: &SwapRecord,
    onchain_index: Option<U256>,
    now: u64,
    config: &EngineConfig,
) -> Result<Address> {
    if auth.kind != expected_kind {
        return Err(Error::SignatureVerification(format!(
            "expected authorization prefix {:?}, got {:?}",
            expected_kind.prefix(),
            auth.kind.prefix()
        )));
    }

    if auth.timeout < now || auth.timeout - now < config.auth_grace_period {
        return Err(Error::SignatureVerification(
            "Authorization expired".to_string(),
        ));
    }

    if matches!(expected_kind, AuthKind::Initialize) {
        let fields = swap.data_fields()?;
        let required = config.auth_grace_period + config.claim_grace_period;
        if fields.expiry < now || fields.expiry - now < required {
            return Err(Error::SignatureVerification(
                "Swap expiry too close to authorization deadline".to_string(),
            ));
        }
    }

    if matches!(expected_kind, AuthKind::Initialize | AuthKind::ClaimInitialize) {
        let fields = swap.data_fields()?;
        let onchain_index = onchain_index.ok_or_else(|| {
            Error::InvalidArgument("on-chain commitment index required for this check".into())
        })?;
        if onchain_index != U256::from(fields.index) {
            return Err(Error::SignatureVerification("Invalid nonce".to_string()));
        }
    }

    let digest = Authorization::digest(auth.kind, commitment::commit_hash(swap), auth.timeout);
    let recovered = auth.recover(digest)?;

    let expected_signer = match expected_kind {
        AuthKind::Initialize | AuthKind::Refund | AuthKind::Data => swap.offerer,
        AuthKind::ClaimInitialize => swap.claimer,
    };
    if recovered != expected_signer {
        return Err(Error::SignatureVerification(format!(
            "recovered signer {recovered} does not match expected {expected_signer}"
        )));
    }

    Ok(recovered)
}

/// ABI-encode the `(timeout<<8|v, r, s)` authorization triple as the
/// contract's signature struct, for embedding in an `init`/`refund_with_auth`
/// call's calldata tail.
pub fn encode_signature_struct(auth: &Authorization) -> [[u8; 32]; 3] {
    [
        abi::encode_u256(auth.packed_timeout_and_v()),
        abi::encode_bytes32(&auth.signature.r),
        abi::encode_bytes32(&auth.signature.s),
    ]
}
