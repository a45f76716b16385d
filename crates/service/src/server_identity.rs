//! This node's own signing identity, distinct from any identity it hosts.
//!
//! Returned to a peer as `server_public_key` during `StartConversation` so
//! it can tell which node it actually negotiated with, rather than being
//! handed back its own key by a server that never bothered to keep one.

use std::fs;
use std::path::Path;

use codec::message::PublicKey;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("private key file at {0} is not a 32-byte seed")]
    BadSeedLength(String),
    #[error("could not read or write node keypair: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ServerIdentity {
    signing_key: SigningKey,
}

impl ServerIdentity {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// An in-memory keypair for nodes that don't configure a persisted
    /// one. Changes every process restart.
    pub fn ephemeral() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    /// Load the keypair at `private_key_path`, generating and persisting
    /// a fresh one (to both paths) if the private key file doesn't exist
    /// yet.
    pub fn load_or_generate(private_key_path: &Path, public_key_path: &Path) -> Result<Self, KeyError> {
        if let Ok(bytes) = fs::read(private_key_path) {
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| KeyError::BadSeedLength(private_key_path.display().to_string()))?;
            return Ok(Self { signing_key: SigningKey::from_bytes(&seed) });
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        if let Some(parent) = private_key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(private_key_path, signing_key.to_bytes())?;
        fs::write(public_key_path, signing_key.verifying_key().to_bytes())?;
        Ok(Self { signing_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_a_keypair_on_first_load() {
        let dir = std::env::temp_dir().join(format!("identity-node-keytest-{}", rand::random::<u64>()));
        let private_path = dir.join("node.key");
        let public_path = dir.join("node.pub");

        let first = ServerIdentity::load_or_generate(&private_path, &public_path).unwrap();
        let second = ServerIdentity::load_or_generate(&private_path, &public_path).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ephemeral_identities_differ() {
        let a = ServerIdentity::ephemeral();
        let b = ServerIdentity::ephemeral();
        assert_ne!(a.public_key(), b.public_key());
    }
}
