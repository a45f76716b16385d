//! Lifecycle logging hooks, called from the server accept loop and from
//! the dispatcher's edges. Kept as its own module, the way the teacher
//! separates "what happened" logging from the protocol engine itself,
//! rather than scattering `log::info!` calls through `service`.

use std::net::SocketAddr;

use codec::message::IdentityId;

#[derive(Clone, Default)]
pub struct Observer;

impl Observer {
    pub fn connection_accepted(&self, peer: SocketAddr, interface: SocketAddr) {
        log::info!("connection accepted: peer={peer}, interface={interface}");
    }

    pub fn connection_closed(&self, peer: SocketAddr, reason: &str) {
        log::info!("connection closed: peer={peer}, reason={reason}");
    }

    pub fn hosting_registered(&self, id: IdentityId) {
        log::info!("hosting registered: id={}", hex(&id.0));
    }

    pub fn hosting_canceled(&self, id: IdentityId) {
        log::info!("hosting canceled: id={}", hex(&id.0));
    }

    pub fn protocol_violation(&self, peer: SocketAddr, detail: &str) {
        log::warn!("protocol violation: peer={peer}, detail={detail}");
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
