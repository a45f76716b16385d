//! Ed25519 signing/verification and the SHA-256 derivations used for
//! identity and card identifiers.
//!
//! Every "sign this request" operation in the protocol signs the encoded
//! bytes of a structured body *excluding* the signature field itself; the
//! verifier re-serializes the same subtree and compares against the
//! supplied signature. Callers are expected to build the to-be-signed
//! bytes with [`message`](crate::message) encoders before calling
//! [`sign`]/[`verify`].

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed public key")]
    InvalidPublicKey,
    #[error("malformed signature")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// 32-byte Ed25519 public key, also the preimage of an [`IdentityId`].
pub type PublicKeyBytes = [u8; 32];

/// 64-byte Ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// SHA-256(PublicKey) — the primary key of an Identity row.
pub fn identity_id(public_key: &PublicKeyBytes) -> [u8; 32] {
    Sha256::digest(public_key).into()
}

/// SHA-256 of a relationship card with its `CardId` field zeroed, used to
/// derive and verify `CardId`.
pub fn card_id(card_bytes_with_zeroed_id: &[u8]) -> [u8; 32] {
    Sha256::digest(card_bytes_with_zeroed_id).into()
}

/// Sign `body` with `signing_key`, returning the raw 64-byte signature.
pub fn sign(signing_key: &SigningKey, body: &[u8]) -> SignatureBytes {
    signing_key.sign(body).to_bytes()
}

/// Verify that `signature` over `body` was produced by the holder of
/// `public_key`.
pub fn verify(
    public_key: &PublicKeyBytes,
    body: &[u8],
    signature: &SignatureBytes,
) -> Result<(), Error> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| Error::InvalidPublicKey)?;
    let signature = DalekSignature::from_bytes(signature);

    verifying_key
        .verify(body, &signature)
        .map_err(|_| Error::VerificationFailed)
}

/// Generate a cryptographically secure 32-byte authentication challenge.
pub fn random_challenge() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a cryptographically secure 16-byte relay token.
pub fn random_relay_token() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn sign_then_verify_round_trips() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();
        let body = b"the body of a request, signature field zeroed";

        let signature = sign(&signing_key, body);
        assert!(verify(&public_key, body, &signature).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();

        let signature = sign(&signing_key, b"original body");
        assert!(verify(&public_key, b"tampered body", &signature).is_err());
    }

    #[test]
    fn identity_id_is_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();

        assert_eq!(identity_id(&public_key), identity_id(&public_key));
    }

    #[test]
    fn challenges_are_not_constant() {
        assert_ne!(random_challenge(), random_challenge());
    }
}
