pub mod cli;
pub mod config;
pub mod gate;
pub mod identity;
pub mod ipc;
pub mod settings;
pub mod storage;
pub mod visits;

// Re-export auth so main.rs can use dealerd::auth directly.
pub use ipc::auth;

use std::sync::Arc;

use config::DaemonConfig;
use ipc::event::EventBroadcaster;
use storage::Storage;
use visits::VisitLog;

/// Shared application state passed to every RPC handler and background task.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    pub broadcaster: Arc<EventBroadcaster>,
    /// The owning service for the shot log — all quota reads and writes go
    /// through it.
    pub visits: Arc<VisitLog>,
    pub started_at: std::time::Instant,
    /// Stable identity surfaced in daemon.status responses and log lines.
    pub daemon_id: String,
    /// Local WebSocket auth token.  Every new connection must send a
    /// `daemon.auth` RPC with this token before any other method call.
    /// Empty string means auth is disabled (not recommended).
    pub auth_token: String,
}

/// Fully wired context for inline tests: temp-dir storage, seeded defaults,
/// auth disabled.
#[cfg(test)]
pub(crate) async fn test_context(data_dir: &std::path::Path) -> AppContext {
    let config = Arc::new(DaemonConfig::new(
        Some(0),
        Some(data_dir.to_path_buf()),
        None,
        None,
    ));
    let storage = Arc::new(Storage::new(data_dir).await.unwrap());
    settings::seed(&storage, &config.quota).await.unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let visits = Arc::new(VisitLog::new(storage.clone(), broadcaster.as_ref().clone()));
    AppContext {
        config,
        storage,
        broadcaster,
        visits,
        started_at: std::time::Instant::now(),
        daemon_id: "test".into(),
        auth_token: String::new(),
    }
}
