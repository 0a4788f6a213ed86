use crate::AppContext;
use anyhow::Result;
use serde_json::{json, Value};

pub async fn ping(_params: Value, _ctx: &AppContext) -> Result<Value> {
    Ok(json!({ "pong": true }))
}

pub async fn status(_params: Value, ctx: &AppContext) -> Result<Value> {
    let settings = ctx.visits.settings().await?;
    let used = ctx.storage.count_shots().await?;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "daemonId": ctx.daemon_id,
        "uptime": ctx.started_at.elapsed().as_secs(),
        "shotsUsed": used,
        "maxShots": settings.max_shots,
        "trackedHostnames": settings.tracked_hostnames,
        "port": ctx.config.port
    }))
}
