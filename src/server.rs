//! Application wiring and lifecycle
//!
//! Every component is constructed with its dependencies here; there are
//! no process-wide singletons. Background workers (leaderboard
//! broadcaster, snapshot worker, store sweeper) run as tasks owned by
//! the app and are cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::HmacTokenVerifier;
use crate::config::Config;
use crate::engine::handler::MatchHandler;
use crate::engine::MatchService;
use crate::error::Result;
use crate::http::{router, AppState};
use crate::hub::Hub;
use crate::leaderboard::broadcaster::LeaderboardBroadcaster;
use crate::leaderboard::snapshot::SnapshotWorker;
use crate::leaderboard::LeaderboardService;
use crate::queue::MatchmakingQueue;
use crate::questions::ai::{AiClient, QuestionGenerator};
use crate::questions::assembler::PackAssembler;
use crate::rooms::RoomManager;
use crate::scoring::{ScoringConfig, ScoringEngine};
use crate::storage::{
    MatchRepository, MemoryMatchRepository, MemoryQuestionRepository, MemorySnapshotRepository,
    QuestionRepository, SnapshotRepository,
};
use crate::store::MatchStateStore;

/// Expired ephemeral records are dropped on this cadence
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// External storage handed to the app at construction
pub struct Repositories {
    pub matches: Arc<dyn MatchRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
}

impl Repositories {
    /// In-memory storage, for development and tests
    pub fn in_memory() -> Self {
        Self {
            matches: Arc::new(MemoryMatchRepository::new()),
            questions: Arc::new(MemoryQuestionRepository::new()),
            snapshots: Arc::new(MemorySnapshotRepository::new()),
        }
    }
}

/// The assembled application
pub struct App {
    config: Config,
    state: AppState,
    store: Arc<MatchStateStore>,
    leaderboard: Arc<LeaderboardService>,
    snapshots: Arc<dyn SnapshotRepository>,
}

impl App {
    pub fn new(config: Config, repos: Repositories) -> Result<Self> {
        let store = Arc::new(MatchStateStore::new());
        let hub = Arc::new(Hub::new());
        let queue = Arc::new(MatchmakingQueue::new(Duration::from_secs(
            config.runtime.bot_wait_seconds,
        )));
        let rooms = Arc::new(RoomManager::new());
        let leaderboard = Arc::new(LeaderboardService::new(
            Arc::clone(&store),
            config.leaderboard.top_n,
        ));

        let generator: Option<Arc<dyn QuestionGenerator>> = if config.ai.generator_url.is_empty() {
            None
        } else {
            Some(Arc::new(AiClient::new(&config.ai)?))
        };
        let assembler = Arc::new(PackAssembler::new(
            Arc::clone(&repos.questions),
            generator,
            Arc::clone(&store),
            config.security.question_hmac_secret.as_bytes(),
        ));

        let service = Arc::new(MatchService::new(
            Arc::clone(&repos.matches),
            assembler,
            Arc::clone(&store),
            Arc::clone(&leaderboard),
            ScoringEngine::new(ScoringConfig::default()),
            config.runtime.clone(),
        ));

        let handler = Arc::new(MatchHandler::new(
            service,
            Arc::clone(&hub),
            queue,
            Arc::clone(&rooms),
            config.runtime.clone(),
        ));

        let verifier = Arc::new(HmacTokenVerifier::new(
            config.security.token_secret.as_bytes(),
        ));

        let state = AppState {
            handler,
            hub,
            rooms,
            leaderboard: Arc::clone(&leaderboard),
            verifier,
            default_countdown_seconds: config.runtime.start_countdown_seconds,
        };

        Ok(Self {
            config,
            state,
            store,
            leaderboard,
            snapshots: repos.snapshots,
        })
    }

    /// Serve until SIGINT/SIGTERM, then drain within the configured
    /// shutdown timeout.
    pub async fn run(self) -> Result<()> {
        let workers = self.spawn_workers();

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "listening");

        let app = router(self.state.clone());
        let shutdown_timeout = self.config.shutdown_timeout;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!(timeout_secs = shutdown_timeout.as_secs(), "shutting down workers");
        for worker in workers {
            worker.abort();
        }
        Ok(())
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let mut workers = Vec::new();

        let broadcaster =
            LeaderboardBroadcaster::new(&self.store, Arc::clone(&self.state.hub));
        workers.push(tokio::spawn(broadcaster.run()));

        let snapshot = SnapshotWorker::new(
            Arc::clone(&self.leaderboard),
            Arc::clone(&self.snapshots),
            self.config.leaderboard.snapshot_interval,
            self.config.leaderboard.snapshot_top_n,
        );
        workers.push(tokio::spawn(snapshot.run()));

        let store = Arc::clone(&self.store);
        workers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        }));

        workers
    }

    /// Router state, exposed so tests can drive the surface directly
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_wires_with_memory_repositories() {
        let app = App::new(Config::default(), Repositories::in_memory()).unwrap();
        assert_eq!(app.state().default_countdown_seconds, 5);
        assert_eq!(app.state().hub.connected_count().await, 0);
    }
}
