use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use service::session::Role;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use crate::config::Ssl;

use super::Context;

/// Bind a TLS interface and spawn its accept loop. Returns once the
/// socket is bound and the certificate chain/key have loaded; the accept
/// loop itself runs for the lifetime of the process.
pub async fn spawn(listen: SocketAddr, ssl: Ssl, roles: Vec<Role>, ctx: Context) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;
    let acceptor = TlsAcceptor::from(Arc::new(load_server_config(&ssl)?));

    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown.clone();
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    log::info!("tls listener stopping: interface={local_addr}");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!("tls accept failed: interface={local_addr}, err={err}");
                        continue;
                    }
                },
            };

            if let Err(err) = socket.set_nodelay(true) {
                log::warn!("tls set_nodelay failed: peer={peer}, err={err}");
            }

            let acceptor = acceptor.clone();
            let ctx = ctx.clone();
            let roles = roles.clone();
            tokio::spawn(async move {
                let socket = match acceptor.accept(socket).await {
                    Ok(socket) => socket,
                    Err(err) => {
                        log::warn!("tls handshake failed: peer={peer}, err={err}");
                        return;
                    }
                };
                super::handle_connection(socket, peer, local_addr, roles, ctx).await;
            });
        }
    });

    log::info!("identity node listening: listen={listen}, transport=tls");
    Ok(())
}

fn load_server_config(ssl: &Ssl) -> Result<ServerConfig> {
    let certificate_chain = rustls_pemfile::certs(&mut BufReader::new(
        File::open(&ssl.certificate_chain)
            .with_context(|| format!("opening certificate chain {}", ssl.certificate_chain))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .with_context(|| format!("parsing certificate chain {}", ssl.certificate_chain))?;

    let private_key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(&ssl.private_key).with_context(|| format!("opening private key {}", ssl.private_key))?,
    ))
    .with_context(|| format!("parsing private key {}", ssl.private_key))?
    .ok_or_else(|| anyhow!("no private key found in {}", ssl.private_key))?;

    Ok(ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certificate_chain, private_key)?)
}
