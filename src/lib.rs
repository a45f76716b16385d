pub mod config;
pub mod observer;
pub mod server;
pub mod shutdown;
pub mod statistics;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use service::{Service, ServiceOptions};
use tokio::io::{AsyncBufReadExt, BufReader};

use self::config::Config;
use self::observer::Observer;
use self::server::Context;
use self::statistics::Statistics;

/// How long `startup` waits for in-flight connections to finish on their
/// own once shutdown has been triggered before giving up on them.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// In order to let integration tests drive the node without spawning the
/// binary, a function stands in for `main` that starts everything and
/// runs until a newline on stdin (or stdin closing) asks it to stop.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let node_keys = config.identity.keys.as_ref().map(|keys| {
        (std::path::PathBuf::from(&keys.private_key_path), std::path::PathBuf::from(&keys.public_key_path))
    });
    let service = Arc::new(Service::new(ServiceOptions {
        max_hosted_identities: config.server.max_hosted_identities,
        images_dir: config.server.images_dir.clone().into(),
        node_keys,
    }));

    let statistics = Statistics::default();
    let (shutdown_controller, shutdown_signal) = shutdown::channel();
    let ctx = Context::new(service.clone(), Observer::default(), statistics.clone(), shutdown_signal);

    server::start(&config, &ctx).await?;
    sweeper::spawn(service.clone());

    // Kept alive for the lifetime of the process: dropping it would close
    // the watch channel and signal the directory client to shut down.
    let _directory_shutdown = if let Some(directory) = &config.directory {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let address = directory.address.clone();
        let identity = service::directory::DirectoryIdentity {
            server_id: directory.server_id.clone(),
            advertise_port: directory.advertise_port,
        };
        tokio::spawn(service::directory::run(service, address, identity, shutdown_rx));
        Some(shutdown_tx)
    } else {
        None
    };

    wait_for_shutdown_line().await;
    log::info!("shutdown requested, closing listeners");
    shutdown_controller.trigger();

    wait_for_connections_to_drain(&statistics).await;
    Ok(())
}

/// Blocks until a line (or EOF) arrives on stdin. A piped-closed stdin
/// (e.g. under a process supervisor with no controlling terminal) counts
/// as an immediate shutdown request rather than hanging forever.
async fn wait_for_shutdown_line() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let _ = lines.next_line().await;
}

/// Give in-flight connections [`SHUTDOWN_GRACE_PERIOD`] to notice the
/// shutdown signal and close on their own; past that, stop waiting and
/// let the process exit out from under them.
async fn wait_for_connections_to_drain(statistics: &Statistics) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    while statistics.snapshot().connections_active > 0 && tokio::time::Instant::now() < deadline {
        interval.tick().await;
    }
    let remaining = statistics.snapshot().connections_active;
    if remaining > 0 {
        log::warn!("shutting down with {remaining} connection(s) still active past the grace period");
    }
}
