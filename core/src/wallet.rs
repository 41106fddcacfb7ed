//! The signer capability this crate authorizes transitions with.
//!
//! Source systems in this space tend to duck-type a signer via an `any`-typed
//! hook object (`type === 'crosslightning-evm-signer'`) and feature-test by
//! string tag. We want callers to feature-test by capability instead, so the
//! required methods are a normal trait and the optional hooks are default
//! (no-op) trait methods a signer can override.

use alloy_primitives::{Address, B256};
use bitcoin::secp256k1::{self, Message, Secp256k1, SecretKey, ecdsa::RecoveryId};

use crate::error::{Error, Result};

/// An ECDSA signature over a 32-byte digest, recoverable back to the
/// signer's address — the `(r, s, v)` triple the escrow contract expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id, `27` or `28` in the Ethereum convention.
    pub v: u8,
}

impl RecoverableSignature {
    /// Recover the signer's address that produced this signature over
    /// `digest`, inside the same personal-message envelope
    /// [`Signer::sign_personal_message`] applies before signing.
    pub fn recover(&self, digest: B256) -> Result<Address> {
        let secp = Secp256k1::verification_only();
        let enveloped = personal_message_hash(digest);
        let message = Message::from_digest(enveloped.0);
        let recovery_id = RecoveryId::from_i32((self.v as i32) - 27)
            .map_err(|e| Error::SignatureVerification(format!("invalid recovery id: {e}")))?;

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let sig = secp256k1::ecdsa::RecoverableSignature::from_compact(&compact, recovery_id)
            .map_err(|e| Error::SignatureVerification(format!("malformed signature: {e}")))?;

        let pubkey = secp
            .recover_ecdsa(&message, &sig)
            .map_err(|e| Error::SignatureVerification(format!("recovery failed: {e}")))?;

        Ok(public_key_to_address(&pubkey))
    }
}

/// Derive the Ethereum-style address (last 20 bytes of `keccak256` of the
/// uncompressed public key, sans its leading `0x04` tag) from a public key.
fn public_key_to_address(pubkey: &secp256k1::PublicKey) -> Address {
    let uncompressed = pubkey.serialize_uncompressed();
    let digest = alloy_primitives::keccak256(&uncompressed[1..]);
    Address::from_slice(&digest[12..32])
}

/// The "Ethereum Signed Message" personal-message envelope: a fixed prefix
/// naming the payload length, hashed again with the caller's digest.
fn personal_message_hash(digest: B256) -> B256 {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", digest.len());
    let mut buf = Vec::with_capacity(prefix.len() + digest.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(digest.as_slice());
    alloy_primitives::keccak256(&buf)
}

/// Capability a caller needs to authorize a swap transition: produce the
/// address a commitment is bound to, and sign over a digest using the
/// personal-message envelope the contract verifies against.
///
/// The two hooks below are optional: most signers (e.g. [`LocalSigner`])
/// have no notion of transaction replacement or a mempool, so they default
/// to no-ops. A signer backed by a wallet extension or hardware device can
/// override them; callers feature-test for the behavior they need rather
/// than matching on a signer "type" string.
pub trait Signer: Send + Sync {
    /// The address this signer's signatures recover to.
    fn address(&self) -> Address;

    /// Sign `digest` inside the standard personal-message envelope.
    fn sign_personal_message(&self, digest: B256) -> Result<RecoverableSignature>;

    /// Called before a caller would replace a pending transaction (e.g. to
    /// bump gas). Default: no-op, since most signers don't track pending
    /// transactions themselves.
    fn on_before_tx_replace(&self, _old_tx_hash: B256) -> Result<()> {
        Ok(())
    }

    /// Whether this signer considers `tx_hash` still pending. Default:
    /// `false` (unknown), leaving the decision to the caller's own RPC view.
    fn is_tx_pending(&self, _tx_hash: B256) -> bool {
        false
    }
}

/// Reference [`Signer`] wrapping a raw secp256k1 key, for tests and for
/// callers holding a hot key directly rather than delegating to an
/// external wallet.
pub struct LocalSigner {
    secret_key: SecretKey,
    address: Address,
}

impl LocalSigner {
    /// Construct a signer from a raw secret key.
    pub fn new(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            address: public_key_to_address(&pubkey),
        }
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_personal_message(&self, digest: B256) -> Result<RecoverableSignature> {
        let secp = Secp256k1::signing_only();
        let enveloped = personal_message_hash(digest);
        let message = Message::from_digest(enveloped.0);
        let sig = secp.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            v: (recovery_id.to_i32() + 27) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_digest_recovers_to_signer_address() {
        let signer = LocalSigner::new(SecretKey::from_slice(&[42u8; 32]).unwrap());
        let digest = B256::repeat_byte(0x5A);

        let sig = signer.sign_personal_message(digest).unwrap();
        let recovered = sig.recover(digest).unwrap();

        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn different_digests_yield_different_signatures() {
        let signer = LocalSigner::new(SecretKey::from_slice(&[1u8; 32]).unwrap());
        let sig_a = signer
            .sign_personal_message(B256::repeat_byte(0x01))
            .unwrap();
        let sig_b = signer
            .sign_personal_message(B256::repeat_byte(0x02))
            .unwrap();
        assert_ne!(sig_a.r, sig_b.r);
    }
}
