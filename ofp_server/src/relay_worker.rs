use std::time::Duration;

use log::*;
use ofp_engine::{OrderFlowApi, SqliteDatabase};
use tokio::{sync::watch, task::JoinHandle};

/// Starts the outbox relay worker. It polls the outbox table on `poll_interval` and drives every due record to a
/// terminal state. Runs until the shutdown signal fires.
pub fn start_outbox_relay(
    api: OrderFlowApi<SqliteDatabase>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(poll_interval);
        info!("📤️ Outbox relay started, polling every {poll_interval:?}");
        loop {
            tokio::select! {
                _ = timer.tick() => {},
                _ = shutdown.changed() => {
                    info!("📤️ Outbox relay shutting down");
                    return;
                },
            }
            match api.run_relay_cycle().await {
                Ok(stats) if stats.scanned == 0 => trace!("📤️ Relay cycle: nothing due"),
                Ok(stats) => info!("📤️ Relay cycle: {stats}"),
                Err(e) => error!("📤️ Relay cycle failed: {e}"),
            }
        }
    })
}
