use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use dealerd::cli::client::{read_auth_token, DaemonClient};
use dealerd::{
    auth,
    config::DaemonConfig,
    gate, identity,
    ipc::event::EventBroadcaster,
    settings,
    storage::Storage,
    visits::VisitLog,
    AppContext,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "dealerd",
    about = "Dopamine Dealer daemon — rations your visits to distracting sites",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON-RPC WebSocket server port
    #[arg(long, env = "DEALERD_PORT")]
    port: Option<u16>,

    /// Data directory for config, auth token, and SQLite database
    #[arg(long, env = "DEALERD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DEALERD_LOG")]
    log: Option<String>,

    /// Bind address for the WebSocket server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "DEALERD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "DEALERD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    ///
    /// Runs dealerd in the foreground: serves the extension's WebSocket RPC,
    /// pushes gate updates once per second while a shot is live, and prunes
    /// the shot log hourly. When invoked with no subcommand, this is the default.
    ///
    /// Examples:
    ///   dealerd serve
    ///   dealerd
    Serve,
    /// Show daemon status (running, version, shots used).
    ///
    /// Connects to the running daemon and prints a summary line.
    /// Exits 0 if healthy, 1 if stopped or unresponsive.
    ///
    /// Examples:
    ///   dealerd status
    ///   dealerd status --json
    Status {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
    /// Inspect or change quota settings on the running daemon.
    ///
    /// Numeric values go through the same coercion the extension options page
    /// uses: leading digits are kept ("5x" becomes 5) and values with no
    /// leading digits leave the stored setting unchanged.
    ///
    /// Examples:
    ///   dealerd settings show
    ///   dealerd settings hostnames "reddit.com, news.ycombinator.com"
    ///   dealerd settings max-shots 5
    ///   dealerd settings shot-minutes 10
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
    /// Inspect or reset the shot log on the running daemon.
    ///
    /// Examples:
    ///   dealerd shots list
    ///   dealerd shots reset --yes
    Shots {
        #[command(subcommand)]
        cmd: ShotsCmd,
    },
    /// Manage the daemon auth token.
    ///
    /// Examples:
    ///   dealerd token show
    Token {
        #[command(subcommand)]
        cmd: TokenCmd,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    /// Print the current quota settings.
    ///
    /// Examples:
    ///   dealerd settings show
    ///   dealerd settings show --json
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the tracked hostname list.
    ///
    /// Takes a comma-separated list of patterns. A pattern matches the exact
    /// hostname and any subdomain of it ("reddit.com" also gates
    /// "old.reddit.com"). Pass an empty string to stop tracking everything.
    ///
    /// Examples:
    ///   dealerd settings hostnames "reddit.com, twitter.com"
    ///   dealerd settings hostnames ""
    Hostnames {
        /// Comma-separated hostname patterns
        value: String,
    },
    /// Set how many shots the window allows.
    ///
    /// Examples:
    ///   dealerd settings max-shots 5
    MaxShots {
        /// New limit (leading digits are used; garbage leaves it unchanged)
        value: String,
    },
    /// Set how long one shot lasts, in minutes.
    ///
    /// Examples:
    ///   dealerd settings shot-minutes 10
    ShotMinutes {
        /// New duration in minutes (leading digits are used; garbage leaves it unchanged)
        value: String,
    },
}

#[derive(Subcommand)]
enum ShotsCmd {
    /// List the shots currently counted against the quota.
    ///
    /// Examples:
    ///   dealerd shots list
    ///   dealerd shots list --json
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every logged shot, restoring the full quota.
    ///
    /// Examples:
    ///   dealerd shots reset
    ///   dealerd shots reset --yes
    Reset {
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum TokenCmd {
    /// Print the daemon auth token to stdout.
    ///
    /// The token is stored at {data_dir}/auth_token. Paste it into the
    /// extension's connection settings, or use it from scripts.
    ///
    /// Examples:
    ///   dealerd token show
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("DEALERD_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Status { json }) => {
            let config =
                DaemonConfig::new(args.port, args.data_dir, Some("error".to_string()), None);
            let exit_code = run_status(&config, json).await;
            std::process::exit(exit_code);
        }
        Some(Command::Settings { cmd }) => {
            let config =
                DaemonConfig::new(args.port, args.data_dir, Some("error".to_string()), None);
            run_settings(&config, cmd).await?;
        }
        Some(Command::Shots { cmd }) => {
            let config =
                DaemonConfig::new(args.port, args.data_dir, Some("error".to_string()), None);
            run_shots(&config, cmd).await?;
        }
        Some(Command::Token { cmd }) => {
            let config =
                DaemonConfig::new(args.port, args.data_dir, Some("error".to_string()), None);
            match cmd {
                TokenCmd::Show => run_token_show(&config)?,
            }
        }
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("dealerd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

// ── dealerd serve ─────────────────────────────────────────────────────────────

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    // Warn when a non-default port is used — the extension connects to 4380
    // unless its endpoint setting is changed to match.
    if let Some(p) = port {
        if p != 4380 {
            eprintln!(
                "warning: non-default port {p}. \
                \n  The extension must be pointed at the same port."
            );
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "dealerd starting");

    let config = Arc::new(DaemonConfig::new(port, data_dir, log, bind_address));
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        "config loaded"
    );

    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?,
    );

    // First-run quota defaults. Only missing keys are written, so user edits
    // survive restarts and upgrades.
    let seeded = settings::seed(&storage, &config.quota).await?;
    if seeded > 0 {
        info!(count = seeded, "seeded default settings");
    }

    let daemon_id = match identity::get_or_create(&storage).await {
        Ok(id) => id,
        Err(e) => {
            warn!("failed to get daemon_id: {e:#}; proceeding without identity");
            String::new()
        }
    };

    let auth_token = match auth::get_or_create_token(&config.data_dir) {
        Ok(t) => {
            info!("auth token ready");
            t
        }
        Err(e) => {
            // Auth token is required — running without it leaves the daemon fully open.
            // This is a startup configuration error, not a recoverable condition.
            eprintln!("FATAL: failed to generate auth token: {e:#}");
            std::process::exit(1);
        }
    };

    let broadcaster = Arc::new(EventBroadcaster::new());
    let visits = Arc::new(VisitLog::new(storage.clone(), (*broadcaster).clone()));

    // Startup snapshot of the quota state this daemon wakes up with.
    {
        let snapshot = visits.settings().await?;
        let used = storage.count_shots().await?;
        info!(
            used,
            max_shots = snapshot.max_shots,
            shot_duration_ms = snapshot.shot_duration_ms,
            window_ms = snapshot.window_ms,
            tracked = %snapshot.tracked_hostnames,
            "quota state loaded"
        );
    }

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        storage: storage.clone(),
        broadcaster: broadcaster.clone(),
        visits: visits.clone(),
        started_at: std::time::Instant::now(),
        daemon_id,
        auth_token,
    });

    // Countdown ticker — pushes gate.tick / gate.changed to subscribed clients
    // once per second while any shot is live, so the extension never polls.
    gate::ticker::spawn(storage.clone(), (*broadcaster).clone());

    // ── Shot-log pruning + vacuum (hourly) ───────────────────────────────────
    // Navigation events prune on the hot path; this loop catches logs that go
    // stale while no tracked tab is open.
    {
        let visits = visits.clone();
        let storage = storage.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            interval.tick().await;
            let mut consecutive_prune_failures: u32 = 0;
            loop {
                interval.tick().await;
                match visits.prune(chrono::Utc::now()).await {
                    Ok(n) if n > 0 => {
                        consecutive_prune_failures = 0;
                        info!(pruned = n, "pruned expired shots");
                    }
                    Ok(_) => {
                        consecutive_prune_failures = 0;
                    }
                    Err(e) => {
                        consecutive_prune_failures += 1;
                        if consecutive_prune_failures >= 3 {
                            warn!(
                                err = %e,
                                failures = consecutive_prune_failures,
                                "shot pruning failing repeatedly"
                            );
                        } else {
                            warn!(err = %e, "shot pruning failed");
                        }
                    }
                }
                if let Err(e) = storage.vacuum().await {
                    warn!(err = %e, "sqlite vacuum failed");
                }
            }
        });
    }

    dealerd::ipc::run(ctx).await
}

// ── dealerd status ────────────────────────────────────────────────────────────

async fn run_status(config: &DaemonConfig, json: bool) -> i32 {
    let token = match read_auth_token(&config.data_dir) {
        Ok(t) => t,
        Err(_) => {
            if json {
                println!(r#"{{"status":"not_installed"}}"#);
            } else {
                println!("dealerd: not installed (run `dealerd serve` once)");
            }
            return 1;
        }
    };

    let client = DaemonClient::new(config.port, token);
    match client.call_once("daemon.status", serde_json::json!({})).await {
        Ok(result) => {
            let version = result["version"].as_str().unwrap_or("?");
            let used = result["shotsUsed"].as_u64().unwrap_or(0);
            let max = result["maxShots"].as_u64().unwrap_or(0);
            let uptime_secs = result["uptime"].as_u64().unwrap_or(0);
            let uptime_str = format_uptime(uptime_secs);

            if json {
                println!("{}", serde_json::to_string(&result).unwrap_or_default());
            } else {
                println!(
                    "dealerd {version} — Running ({used}/{max} shots used, uptime {uptime_str})"
                );
            }
            0
        }
        Err(_) => {
            if json {
                println!(r#"{{"status":"not_running"}}"#);
            } else {
                println!("dealerd: not running");
            }
            1
        }
    }
}

/// Format uptime seconds as "2h 14m" or "45m 3s".
fn format_uptime(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

// ── dealerd settings ──────────────────────────────────────────────────────────

async fn run_settings(config: &DaemonConfig, cmd: SettingsCmd) -> Result<()> {
    let token = read_auth_token(&config.data_dir)?;
    let client = DaemonClient::new(config.port, token);

    match cmd {
        SettingsCmd::Show { json } => {
            let result = client
                .call_once("settings.get", serde_json::json!({}))
                .await?;
            print_settings(&result["settings"], json);
        }
        SettingsCmd::Hostnames { value } => {
            let result = client
                .call_once(
                    "settings.setHostnames",
                    serde_json::json!({ "hostnames": value }),
                )
                .await?;
            print_settings(&result["settings"], false);
        }
        SettingsCmd::MaxShots { value } => {
            let result = client
                .call_once(
                    "settings.setMaxShots",
                    serde_json::json!({ "value": value }),
                )
                .await?;
            if !result["applied"].as_bool().unwrap_or(false) {
                eprintln!("value '{value}' was ignored — it has no leading digits");
            }
            print_settings(&result["settings"], false);
        }
        SettingsCmd::ShotMinutes { value } => {
            let result = client
                .call_once(
                    "settings.setShotDuration",
                    serde_json::json!({ "value": value }),
                )
                .await?;
            if !result["applied"].as_bool().unwrap_or(false) {
                eprintln!("value '{value}' was ignored — it has no leading digits");
            }
            print_settings(&result["settings"], false);
        }
    }
    Ok(())
}

fn print_settings(settings: &serde_json::Value, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(settings).unwrap_or_default()
        );
        return;
    }
    let hostnames = settings["trackedHostnames"].as_str().unwrap_or("");
    let max_shots = settings["maxShots"].as_i64().unwrap_or(0);
    let shot_ms = settings["shotDurationMs"].as_i64().unwrap_or(0);
    let window_ms = settings["windowMs"].as_i64().unwrap_or(0);
    println!(
        "tracked hostnames: {}",
        if hostnames.is_empty() { "(none)" } else { hostnames }
    );
    println!("max shots:         {max_shots}");
    println!("shot duration:     {} min", shot_ms / 60_000);
    println!("window:            {} h", window_ms / 3_600_000);
}

// ── dealerd shots ─────────────────────────────────────────────────────────────

async fn run_shots(config: &DaemonConfig, cmd: ShotsCmd) -> Result<()> {
    let token = read_auth_token(&config.data_dir)?;
    let client = DaemonClient::new(config.port, token);

    match cmd {
        ShotsCmd::List { json } => {
            let result = client
                .call_once("shots.list", serde_json::json!({}))
                .await?;
            if json {
                println!("{}", serde_json::to_string(&result).unwrap_or_default());
                return Ok(());
            }
            let used = result["used"].as_u64().unwrap_or(0);
            let max = result["maxShots"].as_u64().unwrap_or(0);
            println!("{used}/{max} shots used");
            let empty = vec![];
            let shots = result["shots"].as_array().unwrap_or(&empty);
            let now = chrono::Utc::now().timestamp_millis();
            for shot in shots {
                let hostname = shot["hostname"].as_str().unwrap_or("?");
                let ts = shot["timestamp"].as_i64().unwrap_or(0);
                let age_min = (now - ts).max(0) / 60_000;
                println!("  {hostname}  ({age_min} min ago)");
            }
        }
        ShotsCmd::Reset { yes } => {
            if !yes {
                eprint!("Delete every logged shot and restore the full quota? [y/N] ");
                use std::io::BufRead;
                let mut line = String::new();
                std::io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .context("failed to read stdin")?;
                if !line.trim().eq_ignore_ascii_case("y") {
                    println!("aborted");
                    return Ok(());
                }
            }
            let result = client
                .call_once("shots.reset", serde_json::json!({}))
                .await?;
            let cleared = result["cleared"].as_u64().unwrap_or(0);
            println!("cleared {cleared} shots");
        }
    }
    Ok(())
}

// ── dealerd token show ────────────────────────────────────────────────────────

fn run_token_show(config: &DaemonConfig) -> Result<()> {
    let token_path = config.data_dir.join("auth_token");
    match std::fs::read_to_string(&token_path) {
        Ok(token) => {
            println!("{}", token.trim());
            Ok(())
        }
        Err(_) => {
            eprintln!("error: auth token not found at {}", token_path.display());
            eprintln!("       Start the daemon first: dealerd serve");
            std::process::exit(1);
        }
    }
}
