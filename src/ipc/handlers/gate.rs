use crate::AppContext;
use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct StateParams {
    hostname: String,
}

/// What the overlay should show for `hostname` right now.
pub async fn state(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: StateParams = serde_json::from_value(params)?;
    let state = ctx.visits.gate_state(&p.hostname, Utc::now()).await?;
    Ok(json!({ "state": state }))
}
