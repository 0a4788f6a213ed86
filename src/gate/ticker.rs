//! One-second countdown pusher.
//!
//! While any shot is running, emits `gate.tick` once a second for each
//! hostname with an active shot, and a `gate.changed` transition the moment a
//! shot runs out. Clients just render what arrives — nobody polls.

use crate::gate;
use crate::ipc::event::EventBroadcaster;
use crate::settings;
use crate::storage::Storage;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the 1 Hz countdown loop.
pub fn spawn(storage: Arc<Storage>, broadcaster: EventBroadcaster) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut active: HashSet<String> = HashSet::new();
        loop {
            interval.tick().await;
            let now_ms = Utc::now().timestamp_millis();
            if let Err(e) = tick_once(&storage, &broadcaster, &mut active, now_ms).await {
                warn!(err = %e, "countdown tick failed");
            }
        }
    });
}

/// One pass of the countdown loop.
///
/// `previously_active` carries the hostnames that were counting down on the
/// last pass, so expiry transitions fire exactly once.
async fn tick_once(
    storage: &Storage,
    broadcaster: &EventBroadcaster,
    previously_active: &mut HashSet<String>,
    now_ms: i64,
) -> anyhow::Result<()> {
    // Idle fast path: nothing logged and nothing was counting down.
    if previously_active.is_empty() && storage.count_shots().await? == 0 {
        return Ok(());
    }

    let s = settings::load(storage).await?;
    let shots = storage.list_shots().await?;

    // Newest-first so the dedupe keeps the latest shot per hostname.
    let mut active = HashSet::new();
    for shot in shots.iter().rev() {
        if now_ms - shot.timestamp < s.shot_duration_ms && active.insert(shot.hostname.clone()) {
            let remaining_ms = s.shot_duration_ms - (now_ms - shot.timestamp);
            broadcaster.gate_tick(
                &shot.hostname,
                remaining_ms,
                &gate::format_countdown(remaining_ms),
            );
        }
    }

    // Shots that ran out since the last pass flip their page back to the prompt.
    for hostname in previously_active.iter() {
        if !active.contains(hostname) {
            let state = gate::evaluate(hostname, &s, &shots, now_ms);
            broadcaster.gate_changed(hostname, &state);
        }
    }

    *previously_active = active;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaConfig;
    use crate::gate::GateState;

    const MINUTE: i64 = 60 * 1000;

    async fn open() -> (tempfile::TempDir, Arc<Storage>, EventBroadcaster) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        settings::seed(&storage, &QuotaConfig::default())
            .await
            .unwrap();
        (dir, storage, EventBroadcaster::new())
    }

    #[tokio::test]
    async fn idle_tick_stays_silent() {
        let (_dir, storage, broadcaster) = open().await;
        let mut rx = broadcaster.subscribe();
        let mut active = HashSet::new();

        tick_once(&storage, &broadcaster, &mut active, 1_000_000)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn running_shot_ticks_every_pass() {
        let (_dir, storage, broadcaster) = open().await;
        storage
            .record_shot_below_limit("example.com", 0, 10)
            .await
            .unwrap();
        let mut rx = broadcaster.subscribe();
        let mut active = HashSet::new();

        // Ten seconds into a six-minute shot.
        tick_once(&storage, &broadcaster, &mut active, 10_000)
            .await
            .unwrap();

        let v: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(v["method"], "gate.tick");
        assert_eq!(v["params"]["hostname"], "example.com");
        assert_eq!(v["params"]["remainingMs"], 6 * MINUTE - 10_000);
        assert_eq!(v["params"]["remaining"], "05:50");
        assert!(active.contains("example.com"));
    }

    #[tokio::test]
    async fn expiry_flips_back_to_prompt_once() {
        let (_dir, storage, broadcaster) = open().await;
        settings::set_tracked_hostnames(&storage, "example.com")
            .await
            .unwrap();
        storage
            .record_shot_below_limit("example.com", 0, 10)
            .await
            .unwrap();
        let mut rx = broadcaster.subscribe();
        let mut active = HashSet::new();

        tick_once(&storage, &broadcaster, &mut active, 1000)
            .await
            .unwrap();
        let _tick = rx.recv().await.unwrap();

        // Past the six-minute mark: one transition, then silence.
        tick_once(&storage, &broadcaster, &mut active, 7 * MINUTE)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(v["method"], "gate.changed");
        assert_eq!(v["params"]["state"]["kind"], "prompt");
        assert!(active.is_empty());

        tick_once(&storage, &broadcaster, &mut active, 7 * MINUTE + 1000)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn latest_shot_per_hostname_drives_the_tick() {
        let (_dir, storage, broadcaster) = open().await;
        storage
            .record_shot_below_limit("example.com", 0, 10)
            .await
            .unwrap();
        storage
            .record_shot_below_limit("example.com", 2 * MINUTE, 10)
            .await
            .unwrap();
        let mut rx = broadcaster.subscribe();
        let mut active = HashSet::new();

        tick_once(&storage, &broadcaster, &mut active, 3 * MINUTE)
            .await
            .unwrap();

        let v: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(v["params"]["remainingMs"], 5 * MINUTE);
        // Only one tick for the hostname, not one per shot.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prompt_state_after_expiry_reports_quota() {
        // The transition state carries the spent-quota view the page needs.
        let s = crate::settings::Settings {
            tracked_hostnames: "example.com".into(),
            max_shots: 3,
            shot_duration_ms: 6 * MINUTE,
            window_ms: 24 * 60 * MINUTE,
        };
        let shots = [crate::storage::ShotRow {
            id: 1,
            hostname: "example.com".into(),
            timestamp: 0,
        }];
        match gate::evaluate("example.com", &s, &shots, 10 * MINUTE) {
            GateState::Prompt {
                shots_used,
                can_consume,
                ..
            } => {
                assert_eq!(shots_used, 1);
                assert!(can_consume);
            }
            other => panic!("expected prompt, got {other:?}"),
        }
    }
}
