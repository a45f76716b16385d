//! Periodic housekeeping that the protocol itself never triggers: expiring
//! relays nobody answered or forgot about.

use std::sync::Arc;
use std::time::Duration;

use service::Service;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn the background sweep loop. Runs for the lifetime of the process.
pub fn spawn(service: Arc<Service>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let expired = service.sweep();
            if expired > 0 {
                log::debug!("swept {expired} expired relay(s)");
            }
        }
    });
}
