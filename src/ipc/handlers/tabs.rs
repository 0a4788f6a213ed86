use crate::AppContext;
use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct NavigatedParams {
    status: String,
    url: Option<String>,
}

/// Browser navigation ping. Completed page loads prune expired shots; every
/// other status is acknowledged and ignored.
pub async fn navigated(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: NavigatedParams = serde_json::from_value(params)?;
    let pruned = ctx
        .visits
        .handle_navigation(&p.status, p.url.as_deref(), Utc::now())
        .await?;
    Ok(json!({ "pruned": pruned }))
}
