//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Ping cadence and patience.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatPolicy {
    /// Time between liveness checks (and transport pings).
    pub interval: Duration,
    /// Silence tolerated before the connection is considered dead.
    pub timeout: Duration,
}

impl HeartbeatPolicy {
    /// Consecutive silent intervals that count as a timeout (at least 1).
    pub fn max_missed(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        u32::try_from(self.timeout.as_millis() / interval)
            .unwrap_or(u32::MAX)
            .max(1)
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stayed silent for `missed` consecutive intervals.
    TimedOut {
        /// Silent intervals observed.
        missed: u32,
    },
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection's liveness.
///
/// Every `policy.interval` the alive flag is checked and reset. Once
/// [`HeartbeatPolicy::max_missed`] consecutive checks find it unset, the
/// connection is declared dead.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    policy: HeartbeatPolicy,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = time::interval_at(time::Instant::now() + policy.interval, policy.interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_missed = policy.max_missed();
    let mut missed = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticks.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut { missed };
                    }
                }
            }
        }
    }
}
