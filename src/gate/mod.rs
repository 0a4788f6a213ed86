//! Access gate evaluation.
//!
//! Given a settings snapshot and the shot log, decide what a tracked page
//! should show: nothing (untracked), the shot prompt, or the countdown for a
//! running shot. Evaluation is pure — callers pass `now` explicitly, so the
//! same inputs always produce the same state.

pub mod hostnames;
pub mod ticker;

use crate::settings::Settings;
use crate::storage::ShotRow;
use serde::Serialize;

/// What the gate shows for one hostname at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GateState {
    /// Hostname is not tracked — no overlay at all.
    Hidden,
    /// Tracked with no running shot: offer to spend one.
    #[serde(rename_all = "camelCase")]
    Prompt {
        shots_used: u64,
        max_shots: u32,
        can_consume: bool,
        /// Whole minutes a shot grants, for display.
        shot_minutes: i64,
    },
    /// A shot is running for this hostname.
    #[serde(rename_all = "camelCase")]
    Timer {
        remaining_ms: i64,
        /// `MM:SS` rendering of `remaining_ms`.
        remaining: String,
        shots_used: u64,
        max_shots: u32,
    },
}

/// Evaluate the gate for `hostname` against one consistent snapshot.
pub fn evaluate(
    hostname: &str,
    settings: &Settings,
    shots: &[ShotRow],
    now_ms: i64,
) -> GateState {
    if !hostnames::is_tracked(hostname, &settings.tracked_hostnames) {
        return GateState::Hidden;
    }

    let shots_used = shots.len() as u64;
    let max_shots = settings.max_shots;

    if let Some(shot) = latest_active_shot(shots, hostname, settings.shot_duration_ms, now_ms) {
        let remaining_ms = settings.shot_duration_ms - (now_ms - shot.timestamp);
        return GateState::Timer {
            remaining_ms,
            remaining: format_countdown(remaining_ms),
            shots_used,
            max_shots,
        };
    }

    GateState::Prompt {
        shots_used,
        max_shots,
        can_consume: shots_used < max_shots as u64,
        shot_minutes: settings.shot_duration_ms / 1000 / 60,
    }
}

/// The most recent shot for `hostname` still inside its duration window.
/// Hostname comparison is exact — a shot fired on `example.com` does not
/// cover `news.example.com`.
pub fn latest_active_shot<'a>(
    shots: &'a [ShotRow],
    hostname: &str,
    shot_duration_ms: i64,
    now_ms: i64,
) -> Option<&'a ShotRow> {
    shots
        .iter()
        .rev()
        .find(|s| s.hostname == hostname && now_ms - s.timestamp < shot_duration_ms)
}

/// Render milliseconds as `MM:SS`. Minutes wrap at 60, so a 90-minute
/// remainder renders as `30:00`. Seconds floor; negative input clamps to
/// `00:00`.
pub fn format_countdown(remaining_ms: i64) -> String {
    let total_secs = remaining_ms.max(0) / 1000;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("{minutes:02}:{seconds:02}")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
