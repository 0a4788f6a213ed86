use anyhow::{Context as _, Result};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// One consumed shot. `timestamp` is milliseconds since the Unix epoch —
/// the same unit clients use on the wire.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotRow {
    pub id: i64,
    pub hostname: String,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it are
    /// logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("dealerd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write `value` under `key` only when the key does not exist yet.
    /// Returns `true` when the seed was written. Existing values — including
    /// ones a user has since edited — are never touched.
    pub async fn seed_setting(&self, key: &str, value: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Shot log ───────────────────────────────────────────────────────────

    /// All logged shots in insertion order (oldest first).
    pub async fn list_shots(&self) -> Result<Vec<ShotRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT id, hostname, timestamp FROM shots ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }

    pub async fn count_shots(&self) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM shots")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// Atomically record a shot, but only while the log holds fewer than
    /// `max_shots` rows. Returns `true` when the row was inserted, `false`
    /// when the quota was already spent.
    ///
    /// The guard counts every row in the log, not just rows for this
    /// hostname — the quota is shared across all tracked sites. Guarding and
    /// inserting in one statement closes the TOCTOU window between two
    /// concurrent consume calls.
    pub async fn record_shot_below_limit(
        &self,
        hostname: &str,
        timestamp_ms: i64,
        max_shots: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO shots (hostname, timestamp)
             SELECT ?, ? WHERE (SELECT COUNT(*) FROM shots) < ?",
        )
        .bind(hostname)
        .bind(timestamp_ms)
        .bind(max_shots as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Maintenance ────────────────────────────────────────────────────────

    /// Delete every shot at or before `cutoff_ms` and return the count.
    /// A row survives only while `timestamp > cutoff_ms`.
    pub async fn prune_shots_before(&self, cutoff_ms: i64) -> Result<u64> {
        with_timeout(async {
            let n = sqlx::query("DELETE FROM shots WHERE timestamp <= ?")
                .bind(cutoff_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();
            Ok(n)
        })
        .await
    }

    /// Delete the whole shot log and return the count. Backs `shots.reset`.
    pub async fn clear_shots(&self) -> Result<u64> {
        let n = sqlx::query("DELETE FROM shots")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n)
    }

    /// Run SQLite VACUUM to reclaim disk space after pruning.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
