//! Periodic session sweeps
//!
//! Both sweeps work on a snapshot of the registry; a session that vanishes
//! between the snapshot and the check is simply skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use parley_common::transport::ShutdownSignal;

use crate::registry::Registry;
use crate::session::SessionState;

/// Send the heartbeat sentinel to sessions we have not written to for an interval
pub(crate) async fn heartbeat_sweep(registry: Arc<Registry>, interval: Duration, mut shutdown: ShutdownSignal) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for session in registry.sessions() {
                    if session.send_idle() >= interval && session.send_heartbeat().is_err() {
                        debug!(session = %session.id(), "Heartbeat skipped, session closing");
                    }
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}

/// Close and remove every session silent for longer than `timeout`.
///
/// Returns how many sessions were removed.
pub fn sweep_timeouts(registry: &Registry, timeout: Duration) -> usize {
    let mut removed = 0;
    for session in registry.sessions() {
        let age = session.heartbeat_age();
        if age <= timeout {
            continue;
        }
        // Another sweep or the connection task may have removed it already
        if registry.unregister(&session.id()).is_some() {
            info!(
                session = %session.id(),
                peer = %session.peer(),
                silent_ms = age.as_millis() as u64,
                "Session timed out"
            );
            session.set_state(SessionState::Disconnected);
            session.close();
            registry.record_timeout();
            removed += 1;
        }
    }
    removed
}

pub(crate) async fn timeout_sweep(
    registry: Arc<Registry>,
    timeout: Duration,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sweep_timeouts(&registry, timeout);
                if removed > 0 {
                    debug!(removed, remaining = registry.len(), "Timeout sweep finished");
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}
