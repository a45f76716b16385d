use std::net::SocketAddr;

use anyhow::Result;
use service::session::Role;
use tokio::net::TcpListener;

use super::Context;

/// Bind a plaintext interface and spawn its accept loop. Returns once the
/// socket is bound; the accept loop itself runs for the lifetime of the
/// process.
pub async fn spawn(listen: SocketAddr, roles: Vec<Role>, ctx: Context) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;

    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown.clone();
        // Accept connections until the listener itself errors out, or
        // the process is asked to shut down; one failed accept is not
        // reason enough to stop serving the others.
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    log::info!("tcp listener stopping: interface={local_addr}");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!("tcp accept failed: interface={local_addr}, err={err}");
                        continue;
                    }
                },
            };

            if let Err(err) = socket.set_nodelay(true) {
                log::warn!("tcp set_nodelay failed: peer={peer}, err={err}");
            }

            let ctx = ctx.clone();
            let roles = roles.clone();
            tokio::spawn(async move {
                super::handle_connection(socket, peer, local_addr, roles, ctx).await;
            });
        }
    });

    log::info!("identity node listening: listen={listen}, transport=tcp");
    Ok(())
}
