//! Outbound client for the neighborhood directory oracle.
//!
//! This node is not authoritative over any identity but the ones it
//! hosts; everything else it knows about a neighbor comes from here. The
//! directory interface is a persistent outbound connection, framed with
//! the same [`codec`] wire format (tag + length-prefixed body) as the
//! client-facing listener, but carrying its own small closed set of
//! messages rather than the client protocol's `RequestBody`/`ResponseBody`
//! — the directory and a profile client are different peers speaking
//! different vocabularies over the same framing.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use codec::message::values::{read_array, read_string, read_u16, read_u32, write_string};
use codec::message::{GpsLocation, IdentityId};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::store::NeighborIdentity;
use crate::Service;

/// Delay between reconnect attempts after the directory connection
/// drops or fails to establish.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const SERVER_ID_MAX: usize = 64;
const NAME_MAX: usize = 64;
const EXTRA_MAX: usize = 1024;
const MAX_NEIGHBORHOOD_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
struct NeighborIdentitySnapshot {
    id: IdentityId,
    name: String,
    extra_data: String,
    location: GpsLocation,
}

#[derive(Debug, Clone, PartialEq)]
struct NodeInfo {
    server_id: String,
    identities: Vec<NeighborIdentitySnapshot>,
}

/// The closed set of requests/notifications this node and the directory
/// exchange, per the neighborhood oracle's minimal protocol.
#[derive(Debug, Clone, PartialEq)]
enum DirectoryMessage {
    RegisterService { server_id: String, port: u16 },
    DeregisterService,
    GetNeighborNodesByDistance { keep_alive: bool },
    NeighborhoodChanged { added: Vec<NodeInfo>, removed: Vec<String> },
}

impl DirectoryMessage {
    fn tag(&self) -> u8 {
        match self {
            Self::RegisterService { .. } => 1,
            Self::DeregisterService => 2,
            Self::GetNeighborNodesByDistance { .. } => 3,
            Self::NeighborhoodChanged { .. } => 4,
        }
    }

    fn encode(&self) -> BytesMut {
        let mut out = BytesMut::new();
        out.put_u8(self.tag());
        match self {
            Self::RegisterService { server_id, port } => {
                write_string(&mut out, server_id);
                out.put_u16_le(*port);
            }
            Self::DeregisterService => {}
            Self::GetNeighborNodesByDistance { keep_alive } => {
                out.put_u8(u8::from(*keep_alive));
            }
            Self::NeighborhoodChanged { added, removed } => {
                out.put_u32_le(added.len() as u32);
                for node in added {
                    encode_node_info(&mut out, node);
                }
                out.put_u32_le(removed.len() as u32);
                for server_id in removed {
                    write_string(&mut out, server_id);
                }
            }
        }
        out
    }

    fn decode(body: &[u8]) -> codec::Result<Self> {
        let mut buf = body;
        if buf.is_empty() {
            return Err(codec::Error::UnexpectedEof);
        }
        let tag = buf.get_u8();
        match tag {
            1 => {
                let server_id = read_string(&mut buf, SERVER_ID_MAX)?;
                let port = read_u16(&mut buf)?;
                Ok(Self::RegisterService { server_id, port })
            }
            2 => Ok(Self::DeregisterService),
            3 => {
                let keep_alive = buf.first().copied().ok_or(codec::Error::UnexpectedEof)? != 0;
                Ok(Self::GetNeighborNodesByDistance { keep_alive })
            }
            4 => {
                let added_len = read_u32(&mut buf)? as usize;
                if added_len > MAX_NEIGHBORHOOD_SIZE {
                    return Err(codec::Error::ProtocolViolation("neighborhood update too large"));
                }
                let mut added = Vec::with_capacity(added_len);
                for _ in 0..added_len {
                    added.push(decode_node_info(&mut buf)?);
                }
                let removed_len = read_u32(&mut buf)? as usize;
                if removed_len > MAX_NEIGHBORHOOD_SIZE {
                    return Err(codec::Error::ProtocolViolation("neighborhood update too large"));
                }
                let mut removed = Vec::with_capacity(removed_len);
                for _ in 0..removed_len {
                    removed.push(read_string(&mut buf, SERVER_ID_MAX)?);
                }
                Ok(Self::NeighborhoodChanged { added, removed })
            }
            _other => Err(codec::Error::ProtocolViolation("unknown directory message tag")),
        }
    }
}

fn encode_node_info(out: &mut BytesMut, node: &NodeInfo) {
    write_string(out, &node.server_id);
    out.put_u32_le(node.identities.len() as u32);
    for identity in &node.identities {
        out.extend_from_slice(&identity.id.0);
        write_string(out, &identity.name);
        write_string(out, &identity.extra_data);
        out.put_i32_le(identity.location.lat_micro);
        out.put_i32_le(identity.location.lon_micro);
    }
}

fn decode_node_info(buf: &mut &[u8]) -> codec::Result<NodeInfo> {
    let server_id = read_string(buf, SERVER_ID_MAX)?;
    let count = read_u32(buf)? as usize;
    if count > MAX_NEIGHBORHOOD_SIZE {
        return Err(codec::Error::ProtocolViolation("node identity snapshot too large"));
    }
    let mut identities = Vec::with_capacity(count);
    for _ in 0..count {
        let id = IdentityId(read_array::<32>(buf)?);
        let name = read_string(buf, NAME_MAX)?;
        let extra_data = read_string(buf, EXTRA_MAX)?;
        if buf.len() < 8 {
            return Err(codec::Error::UnexpectedEof);
        }
        let lat_micro = buf.get_i32_le();
        let lon_micro = buf.get_i32_le();
        identities.push(NeighborIdentitySnapshot { id, name, extra_data, location: GpsLocation { lat_micro, lon_micro } });
    }
    Ok(NodeInfo { server_id, identities })
}

/// Identity this node registers itself under with the directory, plus the
/// port it wants advertised to other nodes as a neighbor.
#[derive(Debug, Clone)]
pub struct DirectoryIdentity {
    pub server_id: String,
    pub advertise_port: u16,
}

/// Run the directory client forever, reconnecting after any I/O error.
/// Intended to be spawned once as its own background task; returns only
/// if `shutdown` fires.
pub async fn run(
    service: Arc<Service>,
    directory_addr: String,
    identity: DirectoryIdentity,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match TcpStream::connect(&directory_addr).await {
            Ok(stream) => {
                info!("connected to directory oracle at {directory_addr}");
                if let Err(err) = session(&service, stream, &identity, &mut shutdown).await {
                    warn!("directory session ended: {err}");
                }
            }
            Err(err) => {
                warn!("failed to connect to directory oracle at {directory_addr}: {err}");
            }
        }

        if *shutdown.borrow() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn session(
    service: &Arc<Service>,
    mut stream: TcpStream,
    identity: &DirectoryIdentity,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    write_directory_message(
        &mut stream,
        &DirectoryMessage::RegisterService { server_id: identity.server_id.clone(), port: identity.advertise_port },
    )
    .await?;
    write_directory_message(&mut stream, &DirectoryMessage::GetNeighborNodesByDistance { keep_alive: true }).await?;

    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut socket_buf = [0u8; 4096];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    write_directory_message(&mut stream, &DirectoryMessage::DeregisterService).await.ok();
                    return Ok(());
                }
            }
            n = stream.read(&mut socket_buf) => {
                let n = n?;
                if n == 0 {
                    return Ok(());
                }
                read_buf.extend_from_slice(&socket_buf[..n]);
                while let Some(body) = codec::try_decode_frame(&mut read_buf)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
                {
                    match DirectoryMessage::decode(&body) {
                        Ok(message) => handle_message(service, message),
                        Err(err) => debug!("dropping malformed directory push: {err}"),
                    }
                }
            }
        }
    }
}

fn handle_message(service: &Arc<Service>, message: DirectoryMessage) {
    let DirectoryMessage::NeighborhoodChanged { added, removed } = message else {
        return;
    };
    for node in added {
        for identity in node.identities {
            apply_neighbor_update(service, identity.id, identity.name, identity.extra_data, identity.location, node.server_id.clone());
        }
    }
    for server_id in removed {
        service.store.remove_neighbors_by_home_node(&server_id);
    }
}

/// Upsert a mirror update for `id`, as received from the directory.
pub fn apply_neighbor_update(service: &Service, id: IdentityId, name: String, extra_data: String, location: GpsLocation, home_node: String) {
    service.store.upsert_neighbor(NeighborIdentity { id, name, extra_data, location, home_node });
}

pub fn remove_neighbor(service: &Service, id: &IdentityId) {
    service.store.remove_neighbor(id);
}

async fn write_directory_message(stream: &mut TcpStream, message: &DirectoryMessage) -> std::io::Result<()> {
    let frame = codec::encode_frame(&message.encode()).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_service_round_trips() {
        let message = DirectoryMessage::RegisterService { server_id: "node-a".into(), port: 9944 };
        let encoded = message.encode();
        assert_eq!(DirectoryMessage::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn neighborhood_changed_round_trips_with_identity_snapshots() {
        let message = DirectoryMessage::NeighborhoodChanged {
            added: vec![NodeInfo {
                server_id: "node-b".into(),
                identities: vec![NeighborIdentitySnapshot {
                    id: IdentityId([7u8; 32]),
                    name: "Alice".into(),
                    extra_data: "likes:tea".into(),
                    location: GpsLocation::from_degrees(51.5, -0.1),
                }],
            }],
            removed: vec!["node-c".into()],
        };
        let encoded = message.encode();
        assert_eq!(DirectoryMessage::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(DirectoryMessage::decode(&[99]).is_err());
    }
}
