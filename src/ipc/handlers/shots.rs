use crate::AppContext;
use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct ConsumeParams {
    hostname: String,
}

/// The raw shot log plus the quota view clients render.
pub async fn list(_params: Value, ctx: &AppContext) -> Result<Value> {
    let settings = ctx.visits.settings().await?;
    let shots = ctx.visits.shots().await?;
    Ok(json!({
        "used": shots.len(),
        "maxShots": settings.max_shots,
        "shots": shots
    }))
}

pub async fn consume(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: ConsumeParams = serde_json::from_value(params)?;
    let state = ctx.visits.consume(&p.hostname, Utc::now()).await?;
    Ok(json!({ "state": state }))
}

pub async fn reset(_params: Value, ctx: &AppContext) -> Result<Value> {
    let cleared = ctx.visits.reset().await?;
    Ok(json!({ "cleared": cleared }))
}
