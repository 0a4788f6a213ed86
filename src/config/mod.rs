use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4380;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── QuotaConfig ──────────────────────────────────────────────────────────────

/// First-run quota seeds (`[quota]` in config.toml).
///
/// These values are written into the settings store only for keys that do not
/// exist yet. Once seeded, the persisted settings win — editing this section
/// later has no effect on an already-initialized data dir.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Shots available per rolling window (default: 3).
    pub max_shots: u32,
    /// Minutes of access granted per shot (default: 6).
    pub shot_minutes: u64,
    /// Rolling window over which shots replenish, in hours (default: 24).
    pub window_hours: u64,
    /// Comma-separated hostname patterns to gate from the start.
    /// Empty (the default) means nothing is gated until configured.
    pub tracked_hostnames: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_shots: 3,
            shot_minutes: 6,
            window_hours: 24,
            tracked_hostnames: String::new(),
        }
    }
}

impl QuotaConfig {
    pub fn shot_duration_ms(&self) -> i64 {
        self.shot_minutes as i64 * 60 * 1000
    }

    pub fn window_ms(&self) -> i64 {
        self.window_hours as i64 * 60 * 60 * 1000
    }
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// WebSocket server port (default: 4380).
    port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,dealerd=trace" (default: "info").
    log: Option<String>,
    /// Bind address for the WebSocket server (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// First-run quota seeds (`[quota]`).
    quota: Option<QuotaConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Bind address for the WebSocket server (DEALERD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Log output format: "pretty" (default) | "json" (structured for Loki/Elasticsearch).
    pub log_format: String,
    /// First-run quota seeds — ignored once the settings store is populated.
    pub quota: QuotaConfig,
    /// Observability: slow query threshold.
    pub observability: ObservabilityConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("DEALERD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("DEALERD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let quota = toml.quota.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            log_format,
            quota,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/dealerd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("dealerd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/dealerd or ~/.local/share/dealerd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("dealerd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("dealerd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\dealerd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("dealerd");
        }
    }
    // Fallback
    PathBuf::from(".dealerd")
}
