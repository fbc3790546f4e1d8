//! Forwards leaderboard updates from the bus to every connected client

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::warn;

use crate::hub::Hub;
use crate::protocol::{Envelope, LeaderboardUpdatePayload, TYPE_LEADERBOARD_UPDATE};
use crate::store::MatchStateStore;

/// Subscribes to the update channel and fans out via the hub
pub struct LeaderboardBroadcaster {
    updates: Receiver<LeaderboardUpdatePayload>,
    hub: Arc<Hub>,
}

impl LeaderboardBroadcaster {
    /// Subscribes on construction so no update published afterwards is
    /// missed, regardless of when the task gets scheduled.
    pub fn new(store: &MatchStateStore, hub: Arc<Hub>) -> Self {
        Self {
            updates: store.subscribe_updates(),
            hub,
        }
    }

    /// Blocks until the bus closes; spawned as a background task and
    /// aborted on shutdown.
    pub async fn run(mut self) {
        loop {
            match self.updates.recv().await {
                Ok(update) => {
                    let env = match Envelope::new(TYPE_LEADERBOARD_UPDATE, &update) {
                        Ok(env) => env,
                        Err(e) => {
                            warn!(error = %e, "failed to encode leaderboard update");
                            continue;
                        }
                    };
                    if let Err(e) = self.hub.broadcast_all(env).await {
                        warn!(error = %e, "failed to broadcast leaderboard update");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "leaderboard broadcaster lagged, updates dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
