//! Typed view over the persisted settings store.
//!
//! All quota settings live in the SQLite `settings` table as strings. This
//! module owns the key names, the first-run seeding, and the tolerant parsing
//! that turns stored strings back into numbers. A missing or garbled value
//! never fails a read — it falls back to the built-in default so the gate
//! keeps working.

use crate::config::QuotaConfig;
use crate::storage::Storage;
use anyhow::Result;
use serde::Serialize;
use tracing::debug;

/// Storage key names. These are the wire-visible names clients already use,
/// so they stay camelCase rather than snake_case.
pub mod keys {
    /// Rolling window over which shots replenish, milliseconds.
    pub const WINDOW: &str = "duration";
    /// Shots available per rolling window.
    pub const MAX_SHOTS: &str = "maxShots";
    /// Access granted per shot, milliseconds.
    pub const SHOT_DURATION: &str = "shotDuration";
    /// Comma-separated hostname patterns under the gate.
    pub const TRACKED_HOSTNAMES: &str = "trackedHostnames";
}

pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_MAX_SHOTS: u32 = 3;
pub const DEFAULT_SHOT_DURATION_MS: i64 = 6 * 60 * 1000;

/// Snapshot of the quota settings at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Raw comma-separated pattern list exactly as the user entered it.
    pub tracked_hostnames: String,
    pub max_shots: u32,
    /// Milliseconds of access granted per shot.
    pub shot_duration_ms: i64,
    /// Milliseconds over which the shot log replenishes.
    pub window_ms: i64,
}

/// Load the current settings, falling back to the default for any key that
/// is missing or does not parse.
pub async fn load(storage: &Storage) -> Result<Settings> {
    let tracked_hostnames = storage
        .get_setting(keys::TRACKED_HOSTNAMES)
        .await?
        .unwrap_or_default();
    let max_shots = read_number(storage, keys::MAX_SHOTS)
        .await?
        .unwrap_or(DEFAULT_MAX_SHOTS as i64) as u32;
    let shot_duration_ms = read_number(storage, keys::SHOT_DURATION)
        .await?
        .unwrap_or(DEFAULT_SHOT_DURATION_MS);
    let window_ms = read_number(storage, keys::WINDOW)
        .await?
        .unwrap_or(DEFAULT_WINDOW_MS);
    Ok(Settings {
        tracked_hostnames,
        max_shots,
        shot_duration_ms,
        window_ms,
    })
}

async fn read_number(storage: &Storage, key: &str) -> Result<Option<i64>> {
    let Some(raw) = storage.get_setting(key).await? else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 0 => Ok(Some(n)),
        _ => {
            debug!(key, value = %raw, "unparseable stored setting — using default");
            Ok(None)
        }
    }
}

/// Seed any missing settings keys from the `[quota]` config section.
/// Existing keys are left untouched. Returns how many keys were written.
pub async fn seed(storage: &Storage, quota: &QuotaConfig) -> Result<u64> {
    let seeds: [(&str, String); 4] = [
        (keys::WINDOW, quota.window_ms().to_string()),
        (keys::MAX_SHOTS, quota.max_shots.to_string()),
        (keys::SHOT_DURATION, quota.shot_duration_ms().to_string()),
        (keys::TRACKED_HOSTNAMES, quota.tracked_hostnames.clone()),
    ];
    let mut written = 0;
    for (key, value) in seeds {
        if storage.seed_setting(key, &value).await? {
            debug!(key, value = %value, "seeded default setting");
            written += 1;
        }
    }
    Ok(written)
}

/// Parse the leading decimal digits of a user-supplied numeric field.
/// Leading whitespace is skipped and anything after the digits is dropped,
/// so `"2.5"` coerces to 2 while `"abc"` and `"-3"` are rejected.
pub fn parse_leading_u32(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Replace the tracked hostname list with the raw text as entered.
pub async fn set_tracked_hostnames(storage: &Storage, raw: &str) -> Result<()> {
    storage.set_setting(keys::TRACKED_HOSTNAMES, raw).await
}

/// Apply a max-shots edit. Non-numeric input is silently ignored and the
/// stored value stands. Returns the applied value when the edit took.
pub async fn apply_max_shots(storage: &Storage, raw: &str) -> Result<Option<u32>> {
    let Some(n) = parse_leading_u32(raw) else {
        debug!(raw, "ignoring non-numeric maxShots edit");
        return Ok(None);
    };
    storage.set_setting(keys::MAX_SHOTS, &n.to_string()).await?;
    Ok(Some(n))
}

/// Apply a shot-duration edit given in minutes. Stored as milliseconds.
/// Non-numeric input is silently ignored.
pub async fn apply_shot_minutes(storage: &Storage, raw: &str) -> Result<Option<i64>> {
    let Some(minutes) = parse_leading_u32(raw) else {
        debug!(raw, "ignoring non-numeric shotDuration edit");
        return Ok(None);
    };
    let ms = minutes as i64 * 60 * 1000;
    storage
        .set_setting(keys::SHOT_DURATION, &ms.to_string())
        .await?;
    Ok(Some(ms))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
