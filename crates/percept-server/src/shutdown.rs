//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use percept_session::StopReason;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Coordinates graceful shutdown of the listener and every open session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator allowing `timeout` for sessions and tasks to finish.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown: the listener stops accepting and upgrades are refused.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Perform a graceful shutdown.
    ///
    /// 1. Cancel the shutdown token
    /// 2. Stop every session with [`StopReason::ServerShutdown`]
    /// 3. Wait for `handles`; whatever is left after the timeout is aborted
    pub async fn graceful_shutdown(&self, sessions: &SessionRegistry, handles: Vec<JoinHandle<()>>) {
        self.shutdown();
        info!(
            sessions = sessions.len(),
            task_count = handles.len(),
            timeout_secs = self.timeout.as_secs(),
            "draining"
        );

        if tokio::time::timeout(self.timeout, sessions.stop_all(StopReason::ServerShutdown))
            .await
            .is_err()
        {
            warn!(remaining = sessions.len(), "sessions did not close within {:?}", self.timeout);
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("shutdown timed out after {:?}, aborting remaining tasks", self.timeout);
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
