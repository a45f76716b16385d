//! Accept loops and per-connection read/write plumbing shared by the
//! plaintext TCP and TLS listeners.

pub mod tcp;
pub mod tls;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use bytes::BytesMut;
use codec::message::{Kind, Message, Request, RequestBody};
use service::session::registry::Outbound;
use service::Service;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::{Config, Interface};
use crate::observer::Observer;
use crate::shutdown::Signal;
use crate::statistics::Statistics;

/// Shared handles every accept loop and connection task needs.
#[derive(Clone)]
pub struct Context {
    pub service: Arc<Service>,
    pub observer: Observer,
    pub statistics: Statistics,
    pub shutdown: Signal,
    next_connection_id: Arc<AtomicU64>,
}

impl Context {
    pub fn new(service: Arc<Service>, observer: Observer, statistics: Statistics, shutdown: Signal) -> Self {
        Self { service, observer, statistics, shutdown, next_connection_id: Arc::new(AtomicU64::new(1)) }
    }

    fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Bind every configured interface and spawn its accept loop. Returns
/// once all listeners are bound; the accept loops themselves run for
/// the lifetime of the process.
pub async fn start(config: &Config, ctx: &Context) -> Result<()> {
    for interface in &config.server.interfaces {
        let roles = interface.roles()?;
        match interface {
            Interface::Tcp { listen, .. } => tcp::spawn(*listen, roles, ctx.clone()).await?,
            Interface::Tls { listen, ssl, .. } => tls::spawn(*listen, ssl.clone(), roles, ctx.clone()).await?,
        }
    }
    Ok(())
}

/// Drive one accepted connection until it closes: decode frames, run
/// them through the dispatcher, and forward whatever the dispatcher (or
/// a node-initiated push from another connection) produces back to the
/// peer.
pub(crate) async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    interface: SocketAddr,
    roles: Vec<service::session::Role>,
    mut ctx: Context,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.observer.connection_accepted(peer, interface);
    ctx.statistics.connection_opened();

    let connection_id = ctx.next_connection_id();
    let mut session = service::session::Session::with_roles(roles);
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Outbound>();
    let mut next_msg_id: u32 = 1;

    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut socket_buf = [0u8; 4096];
    let mut close_reason = "peer closed connection";

    'connection: loop {
        tokio::select! {
            biased;

            n = stream.read(&mut socket_buf) => {
                let n = match n {
                    Ok(n) => n,
                    Err(err) => {
                        close_reason = "read error";
                        log::debug!("connection read error from {peer}: {err}");
                        break 'connection;
                    }
                };
                if n == 0 {
                    break 'connection;
                }
                read_buf.extend_from_slice(&socket_buf[..n]);

                loop {
                    let body = match codec::try_decode_frame(&mut read_buf) {
                        Ok(Some(body)) => body,
                        Ok(None) => break,
                        Err(err) => {
                            ctx.observer.protocol_violation(peer, &err.to_string());
                            let _ = write_fatal_violation(&mut stream).await;
                            close_reason = "framing error";
                            break 'connection;
                        }
                    };
                    ctx.statistics.frame_received();

                    match Message::decode(&body) {
                        Ok(Message::Request(request)) => {
                            match handle_incoming_request(
                                &ctx,
                                &mut stream,
                                &mut session,
                                connection_id,
                                &outbox_tx,
                                request,
                            ).await {
                                Ok(RequestOutcome::Continue) => {}
                                Ok(RequestOutcome::Close(reason)) => {
                                    close_reason = reason;
                                    break 'connection;
                                }
                                Err(err) => {
                                    close_reason = "write error";
                                    log::debug!("failed writing response to {peer}: {err}");
                                    break 'connection;
                                }
                            }
                        }
                        Ok(Message::Response(response)) => {
                            handle_incoming_response(&ctx, &mut session, response);
                        }
                        Err(err) => {
                            ctx.observer.protocol_violation(peer, &err.to_string());
                            let _ = write_fatal_violation(&mut stream).await;
                            close_reason = "malformed message";
                            break 'connection;
                        }
                    }
                }
            }

            Some(outbound) = outbox_rx.recv() => {
                let body = match outbound {
                    Outbound::Push(body) => body,
                    Outbound::Reply(response) => {
                        if write_message(&mut stream, &Message::Response(response)).await.is_err() {
                            close_reason = "write error";
                            break 'connection;
                        }
                        ctx.statistics.frame_sent();
                        continue 'connection;
                    }
                    Outbound::Displaced => {
                        close_reason = "displaced by a newer check-in";
                        break 'connection;
                    }
                };

                let kind = body.kind();
                let token = relay_token_of(&body);
                let msg_id = next_msg_id;
                next_msg_id = next_msg_id.wrapping_add(1).max(1);
                session.unfinished_requests.insert(msg_id, kind, token);

                let message = Message::Request(Request::Conversation(codec::message::ConversationRequest {
                    msg_id,
                    signature: None,
                    body,
                }));
                if write_message(&mut stream, &message).await.is_err() {
                    close_reason = "write error";
                    break 'connection;
                }
                ctx.statistics.frame_sent();
            }

            _ = ctx.shutdown.triggered() => {
                close_reason = "graceful shutdown";
                break 'connection;
            }

            _ = tokio::time::sleep_until(session.keep_alive_deadline.into()) => {
                if Instant::now() >= session.keep_alive_deadline {
                    close_reason = "keep-alive timeout";
                    break 'connection;
                }
            }
        }
    }

    if let Some(id) = session.peer_identity_id {
        ctx.service.registry.check_out(&id, connection_id);
    }
    ctx.observer.connection_closed(peer, close_reason);
    ctx.statistics.connection_closed();
}

fn relay_token_of(body: &RequestBody) -> Option<[u8; 16]> {
    match body {
        RequestBody::IncomingCallNotification { callee_token, .. } => Some(*callee_token),
        RequestBody::AppServiceReceiveMessageNotification { token, .. } => Some(*token),
        _ => None,
    }
}

/// What the caller should do after a request has been dispatched and its
/// response (if any) written back to the peer.
enum RequestOutcome {
    Continue,
    /// The response was written, but the request it answers means this
    /// connection must not be kept open (e.g. a relay call against an
    /// invalid/expired token). Carries the reason for `close_reason`.
    Close(&'static str),
}

async fn handle_incoming_request<S>(
    ctx: &Context,
    stream: &mut S,
    session: &mut service::session::Session,
    connection_id: u64,
    outbox_tx: &mpsc::UnboundedSender<Outbound>,
    request: Request,
) -> std::io::Result<RequestOutcome>
where
    S: AsyncWrite + Unpin,
{
    let Some(response) =
        service::routing::dispatch(&ctx.service, session, connection_id, outbox_tx, request).await
    else {
        // Deferred: a `CallIdentityAppService` waiting on the callee.
        // The eventual answer arrives via `handle_incoming_response` or
        // the relay sweeper, each pushing through `outbox_tx` instead.
        return Ok(RequestOutcome::Continue);
    };

    if response.status.is_ok() {
        if let (Kind::HostingRegister | Kind::CheckIn, Some(id)) = (response.kind, session.peer_identity_id) {
            if let Some(displaced) = ctx.service.registry.check_in(id, connection_id, outbox_tx.clone()) {
                let _ = displaced.send(Outbound::Displaced);
            }
            ctx.observer.hosting_registered(id);
        }
        if let (Kind::CancelHosting, Some(id)) = (response.kind, session.peer_identity_id) {
            ctx.service.registry.check_out(&id, connection_id);
            ctx.observer.hosting_canceled(id);
        }
    }

    // An app-service relay call against a token that no longer resolves
    // to an open relay (expired, already consumed, never existed) gets
    // its error reply, then the connection is closed outright rather
    // than left open to retry tokens.
    let must_close = response.kind == Kind::ApplicationServiceSendMessage
        && response.status == codec::message::StatusCode::NotAvailable;

    write_message(stream, &Message::Response(response)).await?;
    ctx.statistics.frame_sent();

    if must_close {
        return Ok(RequestOutcome::Close("invalid relay token"));
    }
    Ok(RequestOutcome::Continue)
}

fn handle_incoming_response(ctx: &Context, session: &mut service::session::Session, response: codec::message::Response) {
    let Some((kind, token)) = session.unfinished_requests.take(response.msg_id) else {
        return;
    };
    if kind != response.kind {
        return;
    }
    if kind == Kind::IncomingCallNotification {
        if let Some(token) = token {
            if response.status.is_ok() {
                if let Some((caller_outbox, caller_msg_id, caller_token)) = ctx.service.relays.accept(&token) {
                    let reply = codec::message::Response::ok(
                        caller_msg_id,
                        Kind::CallIdentityAppService,
                        codec::message::ResponseBody::CallAccepted { caller_token },
                    );
                    let _ = caller_outbox.send(Outbound::Reply(reply));
                }
            } else if let Some((caller_outbox, caller_msg_id)) = ctx.service.relays.reject(&token) {
                let reply = codec::message::Response::error(
                    caller_msg_id,
                    Kind::CallIdentityAppService,
                    codec::message::StatusCode::Rejected,
                );
                let _ = caller_outbox.send(Outbound::Reply(reply));
            }
        }
    }
}

async fn write_message<S>(stream: &mut S, message: &Message) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = codec::encode_frame(&message.encode()).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&frame).await
}

/// A framing-level violation (oversized body, bad tag) has no
/// well-formed request to answer; the best this node can do is tell the
/// peer why the connection is about to close.
async fn write_fatal_violation<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = codec::message::Response::error(
        codec::PROTOCOL_VIOLATION_MSG_ID,
        Kind::Ping,
        codec::message::StatusCode::ProtocolViolation,
    );
    write_message(stream, &Message::Response(response)).await
}
