//! Periodic persistence of leaderboard tops
//!
//! Every interval the worker reads the top N for each window and writes
//! an immutable snapshot row, hashed over its payload, through the
//! repository. Snapshots serve reads when the in-memory aggregate is
//! empty or unreachable.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::current_timestamp;
use crate::error::Result;
use crate::leaderboard::{default_windows, LeaderboardService};
use crate::storage::{LeaderboardSnapshot, SnapshotRepository};

pub struct SnapshotWorker {
    leaderboard: Arc<LeaderboardService>,
    repo: Arc<dyn SnapshotRepository>,
    interval: Duration,
    top_n: usize,
}

impl SnapshotWorker {
    pub fn new(
        leaderboard: Arc<LeaderboardService>,
        repo: Arc<dyn SnapshotRepository>,
        interval: Duration,
        top_n: usize,
    ) -> Self {
        Self {
            leaderboard,
            repo,
            interval: if interval.is_zero() {
                Duration::from_secs(300)
            } else {
                interval
            },
            top_n: if top_n == 0 { 50 } else { top_n },
        }
    }

    /// Blocks forever; spawned as a background task and aborted on
    /// shutdown. Runs one pass immediately.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One snapshot pass over every window
    pub async fn tick(&self) {
        for window in default_windows() {
            if let Err(e) = self.snapshot_window(window).await {
                warn!(window, error = %e, "snapshot failed");
            }
        }
    }

    async fn snapshot_window(&self, window: &str) -> Result<()> {
        let entries = self.leaderboard.top(window, self.top_n).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_value(&entries)?;
        let data = serde_json::to_vec(&entries)?;
        let source_hash = hex::encode(Sha256::digest(&data));

        self.repo
            .insert_snapshot(LeaderboardSnapshot {
                time_window: window.to_string(),
                generated_at: current_timestamp(),
                entries: payload,
                source_hash,
            })
            .await?;

        info!(window, entries = entries.len(), "leaderboard snapshot persisted");
        Ok(())
    }
}
