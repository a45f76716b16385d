//! Relationship card verification.
//!
//! A [`RelatedIdentityCard`] is signed twice. The issuer
//! (`peer_identity_id`/`peer_public_key`) signs `card_id` itself,
//! attesting to this exact card; the recipient — the identity the card
//! ends up attached to, whose public key is not carried in the card —
//! signs `application_id`, attesting that it accepted the link under
//! that application. `card_id` is the SHA-256 of the card's signed
//! subtree (`card_bytes`, everything but `card_id` and both
//! signatures), so it is fully determined by the rest of the card and
//! cannot be forged independently of the issuer signature.

use codec::message::{CardId, PublicKey, RelatedIdentityCard};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CardError {
    #[error("card_id does not match the derivation of its signed fields")]
    IdMismatch,
    #[error("issuer_signature does not verify against peer_public_key")]
    BadIssuerSignature,
    #[error("recipient_signature does not verify against the hosting identity's public key")]
    BadRecipientSignature,
}

/// Verify both signatures on `card`. `recipient_public_key` is the
/// public key of the identity the card is being attached to — it is
/// looked up from the store, never read off the card itself.
pub fn verify_card(card: &RelatedIdentityCard, recipient_public_key: &PublicKey) -> Result<(), CardError> {
    let card_bytes = card.card_bytes();
    let expected_id = derive_card_id(card);
    if expected_id.0 != card.card_id.0 {
        return Err(CardError::IdMismatch);
    }

    codec::crypto::verify(&card.peer_public_key.0, &card.card_id.0, &card.issuer_signature.0)
        .map_err(|_| CardError::BadIssuerSignature)?;

    codec::crypto::verify(&recipient_public_key.0, &card.application_id, &card.recipient_signature.0)
        .map_err(|_| CardError::BadRecipientSignature)
}

pub fn derive_card_id(card: &RelatedIdentityCard) -> CardId {
    CardId(codec::crypto::card_id(&card.card_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::message::{IdentityId, Signature};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    /// Builds a card issued by `issuer_key` and accepted by
    /// `recipient_key`, both correctly signed.
    fn signed_card(application_id: Vec<u8>, issuer_key: &SigningKey, recipient_key: &SigningKey) -> RelatedIdentityCard {
        let peer_public_key = PublicKey(issuer_key.verifying_key().to_bytes());
        let peer_identity_id = IdentityId::from_public_key(&peer_public_key);

        let mut card = RelatedIdentityCard {
            application_id: application_id.clone(),
            peer_identity_id,
            peer_public_key,
            card_id: CardId([0u8; 32]),
            card_type: "friend".into(),
            valid_from: 0,
            valid_to: u64::MAX,
            issuer_signature: Signature([0u8; 64]),
            recipient_signature: Signature([0u8; 64]),
        };
        card.card_id = derive_card_id(&card);
        card.issuer_signature = Signature(codec::crypto::sign(issuer_key, &card.card_id.0));
        card.recipient_signature = Signature(codec::crypto::sign(recipient_key, &application_id));
        card
    }

    #[test]
    fn verifies_a_correctly_signed_card() {
        let issuer_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let recipient_public_key = PublicKey(recipient_key.verifying_key().to_bytes());
        let card = signed_card(b"org.example.chat".to_vec(), &issuer_key, &recipient_key);

        assert!(verify_card(&card, &recipient_public_key).is_ok());
    }

    #[test]
    fn rejects_a_tampered_application_id() {
        let issuer_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let recipient_public_key = PublicKey(recipient_key.verifying_key().to_bytes());
        let mut card = signed_card(b"org.example.chat".to_vec(), &issuer_key, &recipient_key);
        card.application_id = b"org.example.evil".to_vec();

        assert_eq!(verify_card(&card, &recipient_public_key), Err(CardError::IdMismatch));
    }

    #[test]
    fn rejects_a_forged_issuer_signature_with_correct_id() {
        let issuer_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let recipient_public_key = PublicKey(recipient_key.verifying_key().to_bytes());
        let mut card = signed_card(b"org.example.chat".to_vec(), &issuer_key, &recipient_key);

        let forger = SigningKey::generate(&mut OsRng);
        card.issuer_signature = Signature(codec::crypto::sign(&forger, &card.card_id.0));

        assert_eq!(verify_card(&card, &recipient_public_key), Err(CardError::BadIssuerSignature));
    }

    #[test]
    fn rejects_a_recipient_signature_from_the_wrong_identity() {
        let issuer_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let someone_else = SigningKey::generate(&mut OsRng);
        let wrong_recipient_public_key = PublicKey(someone_else.verifying_key().to_bytes());
        let card = signed_card(b"org.example.chat".to_vec(), &issuer_key, &recipient_key);

        assert_eq!(verify_card(&card, &wrong_recipient_public_key), Err(CardError::BadRecipientSignature));
    }
}
