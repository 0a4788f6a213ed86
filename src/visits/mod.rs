//! The owning service for the shot log.
//!
//! Every read and write of the log flows through [`VisitLog`], so each
//! mutation is a single SQLite statement and every observer hears about it on
//! the event bus. Clients never touch storage directly.

use crate::gate::{self, GateState};
use crate::ipc::event::EventBroadcaster;
use crate::settings::{self, Settings};
use crate::storage::{ShotRow, Storage};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Why a consume call was refused.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("shot quota exhausted: {used}/{max} shots used")]
    QuotaExhausted { used: u64, max: u32 },
}

pub struct VisitLog {
    storage: Arc<Storage>,
    broadcaster: EventBroadcaster,
}

impl VisitLog {
    pub fn new(storage: Arc<Storage>, broadcaster: EventBroadcaster) -> Self {
        Self {
            storage,
            broadcaster,
        }
    }

    /// Current settings snapshot.
    pub async fn settings(&self) -> Result<Settings> {
        settings::load(&self.storage).await
    }

    /// The full shot log, oldest first.
    pub async fn shots(&self) -> Result<Vec<ShotRow>> {
        self.storage.list_shots().await
    }

    /// Handle a browser navigation event. Only fully loaded pages with a URL
    /// prune the log; any other event is ignored. Returns how many expired
    /// shots were dropped.
    pub async fn handle_navigation(
        &self,
        status: &str,
        url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if status != "complete" {
            return Ok(0);
        }
        let Some(raw_url) = url else {
            return Ok(0);
        };
        match Url::parse(raw_url) {
            Ok(parsed) => {
                debug!(
                    hostname = parsed.host_str().unwrap_or("-"),
                    "navigation complete — pruning expired shots"
                );
            }
            Err(e) => {
                debug!(url = raw_url, err = %e, "ignoring navigation with unparseable url");
                return Ok(0);
            }
        }
        self.prune(now).await
    }

    /// Drop every shot that has aged out of the rolling window. The window
    /// length is re-read from settings on each call, so an edit takes effect
    /// on the next prune.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let s = settings::load(&self.storage).await?;
        let cutoff = now.timestamp_millis() - s.window_ms;
        let pruned = self.storage.prune_shots_before(cutoff).await?;
        if pruned > 0 {
            let used = self.storage.count_shots().await?;
            info!(pruned, used, "expired shots pruned");
            self.broadcaster.shots_changed(used, s.max_shots);
        }
        Ok(pruned)
    }

    /// Spend one shot on `hostname`, returning the timer state the page
    /// shows next. Refuses with [`ConsumeError::QuotaExhausted`] when the
    /// log already holds `maxShots` rows — the guard counts shots on every
    /// hostname, not just this one.
    pub async fn consume(&self, hostname: &str, now: DateTime<Utc>) -> Result<GateState> {
        let s = settings::load(&self.storage).await?;
        let inserted = self
            .storage
            .record_shot_below_limit(hostname, now.timestamp_millis(), s.max_shots)
            .await?;
        let used = self.storage.count_shots().await?;
        if !inserted {
            debug!(hostname, used, max = s.max_shots, "consume refused — quota exhausted");
            return Err(ConsumeError::QuotaExhausted {
                used,
                max: s.max_shots,
            }
            .into());
        }

        info!(hostname, used, max = s.max_shots, "shot consumed");
        // The new shot starts now; report the timer without re-reading the row.
        let state = GateState::Timer {
            remaining_ms: s.shot_duration_ms,
            remaining: gate::format_countdown(s.shot_duration_ms),
            shots_used: used,
            max_shots: s.max_shots,
        };
        self.broadcaster.shots_changed(used, s.max_shots);
        self.broadcaster.gate_changed(hostname, &state);
        Ok(state)
    }

    /// Evaluate the gate for one hostname right now.
    pub async fn gate_state(&self, hostname: &str, now: DateTime<Utc>) -> Result<GateState> {
        let s = settings::load(&self.storage).await?;
        let shots = self.storage.list_shots().await?;
        Ok(gate::evaluate(hostname, &s, &shots, now.timestamp_millis()))
    }

    /// Clear the whole log, refunding every shot. Returns the cleared count.
    pub async fn reset(&self) -> Result<u64> {
        let s = settings::load(&self.storage).await?;
        let cleared = self.storage.clear_shots().await?;
        if cleared > 0 {
            info!(cleared, "shot log reset");
            self.broadcaster.shots_changed(0, s.max_shots);
        }
        Ok(cleared)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
