use crate::gate::GateState;
use crate::settings::Settings;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcasts JSON-RPC notification strings to all connected WebSocket clients.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send a JSON-RPC notification to all connected clients.
    pub fn broadcast(&self, method: &str, params: Value) {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        // Ignore errors — no subscribers is fine
        let _ = self
            .tx
            .send(serde_json::to_string(&notification).unwrap_or_default());
    }

    /// Subscribe to all broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    // ─── Typed emitters ─────────────────────────────────────────────────────

    /// Settings were edited. Carries the full new snapshot.
    pub fn settings_changed(&self, settings: &Settings) {
        self.broadcast("settings.changed", serde_json::json!({ "settings": settings }));
    }

    /// The shot log changed (consume, prune, or reset).
    pub fn shots_changed(&self, used: u64, max_shots: u32) {
        self.broadcast(
            "shots.changed",
            serde_json::json!({ "used": used, "maxShots": max_shots }),
        );
    }

    /// The gate for one hostname moved to a new state.
    pub fn gate_changed(&self, hostname: &str, state: &GateState) {
        self.broadcast(
            "gate.changed",
            serde_json::json!({ "hostname": hostname, "state": state }),
        );
    }

    /// One-second countdown pulse for a hostname with a running shot.
    pub fn gate_tick(&self, hostname: &str, remaining_ms: i64, remaining: &str) {
        self.broadcast(
            "gate.tick",
            serde_json::json!({
                "hostname": hostname,
                "remainingMs": remaining_ms,
                "remaining": remaining,
            }),
        );
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
