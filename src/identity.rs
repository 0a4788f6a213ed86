//! Stable daemon identity.
//!
//! `daemon_id` is a SHA-256 fingerprint of a random seed generated on first
//! start and cached in the settings table, so it survives restarts. It only
//! surfaces in `daemon.status` responses and log lines.

use crate::storage::Storage;
use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

const SETTING_KEY: &str = "daemonId";

/// Load the persisted daemon id, creating one on first start.
pub async fn get_or_create(storage: &Storage) -> Result<String> {
    if let Some(id) = storage.get_setting(SETTING_KEY).await? {
        return Ok(id);
    }

    let seed = Uuid::new_v4();
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let id = digest[..16].to_string();

    storage.set_setting(SETTING_KEY, &id).await?;
    info!(daemon_id = %id, "generated new daemon id");
    Ok(id)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
