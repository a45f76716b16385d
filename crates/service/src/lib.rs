//! Protocol engine for the identity-node server.
//!
//! This crate owns everything that is true regardless of which socket a
//! byte arrived on: the profile store, the relay manager, the client
//! registry, and the dispatcher that turns a decoded [`codec::message::Request`]
//! into a [`codec::message::Response`]. The binary crate supplies the
//! transport (TCP/TLS accept loops) and wires connections to a shared
//! [`Service`].

pub mod directory;
pub mod error;
pub mod relay;
pub mod routing;
pub mod server_identity;
pub mod session;
pub mod store;

use std::path::PathBuf;

use relay::RelayManager;
use server_identity::ServerIdentity;
use session::registry::ClientRegistry;
use store::{ProfileStore, StoreConfig};

/// Construction-time options for a [`Service`].
pub struct ServiceOptions {
    pub max_hosted_identities: usize,
    pub images_dir: PathBuf,
    /// Paths to this node's own persisted keypair. `None` falls back to
    /// an ephemeral keypair generated for this process only.
    pub node_keys: Option<(PathBuf, PathBuf)>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self { max_hosted_identities: 10_000, images_dir: PathBuf::from("./images"), node_keys: None }
    }
}

/// Shared state behind every connection this node accepts. Cloning a
/// connection's handle to this out to its own task is cheap: every field
/// is already internally synchronized.
pub struct Service {
    pub store: ProfileStore,
    pub registry: ClientRegistry,
    pub relays: RelayManager,
    pub identity: ServerIdentity,
}

impl Service {
    pub fn new(options: ServiceOptions) -> Self {
        let identity = match &options.node_keys {
            Some((private_key_path, public_key_path)) => {
                match ServerIdentity::load_or_generate(private_key_path, public_key_path) {
                    Ok(identity) => identity,
                    Err(err) => {
                        log::error!("could not load node keypair ({err}); falling back to an ephemeral one");
                        ServerIdentity::ephemeral()
                    }
                }
            }
            None => ServerIdentity::ephemeral(),
        };

        Self {
            store: ProfileStore::new(StoreConfig {
                max_hosted_identities: options.max_hosted_identities,
                images_dir: options.images_dir,
            }),
            registry: ClientRegistry::new(),
            relays: RelayManager::new(),
            identity,
        }
    }

    /// Run one pass of periodic maintenance: purge cancellation
    /// tombstones past their grace period and expire stale relays,
    /// answering any caller left waiting on a callee that never
    /// responded. Called by the binary crate's sweeper loop on an
    /// interval.
    pub fn sweep(&self) -> usize {
        let purged = self.store.purge_expired_identities();
        let (expired_relays, timed_out_callers) = self.relays.sweep_expired();
        for (outbox, msg_id) in timed_out_callers {
            let response = codec::message::Response::error(
                msg_id,
                codec::message::Kind::CallIdentityAppService,
                codec::message::StatusCode::NotAvailable,
            );
            let _ = outbox.send(session::registry::Outbound::Reply(response));
        }
        purged + expired_relays
    }
}
