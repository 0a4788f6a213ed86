use crate::settings;
use crate::AppContext;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct SetHostnamesParams {
    hostnames: String,
}

/// Numeric edits arrive as the raw string the user typed.
#[derive(Deserialize)]
struct SetValueParams {
    value: String,
}

pub async fn get(_params: Value, ctx: &AppContext) -> Result<Value> {
    let snapshot = ctx.visits.settings().await?;
    Ok(json!({ "settings": snapshot }))
}

pub async fn set_hostnames(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: SetHostnamesParams = serde_json::from_value(params)?;
    settings::set_tracked_hostnames(&ctx.storage, &p.hostnames).await?;
    let snapshot = ctx.visits.settings().await?;
    ctx.broadcaster.settings_changed(&snapshot);
    Ok(json!({ "settings": snapshot }))
}

/// A value that does not parse is ignored: `applied` comes back false and
/// the stored setting stands.
pub async fn set_max_shots(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: SetValueParams = serde_json::from_value(params)?;
    let applied = settings::apply_max_shots(&ctx.storage, &p.value).await?;
    let snapshot = ctx.visits.settings().await?;
    if applied.is_some() {
        ctx.broadcaster.settings_changed(&snapshot);
    }
    Ok(json!({ "applied": applied.is_some(), "settings": snapshot }))
}

/// `value` is minutes; the stored setting is milliseconds.
pub async fn set_shot_duration(params: Value, ctx: &AppContext) -> Result<Value> {
    let p: SetValueParams = serde_json::from_value(params)?;
    let applied = settings::apply_shot_minutes(&ctx.storage, &p.value).await?;
    let snapshot = ctx.visits.settings().await?;
    if applied.is_some() {
        ctx.broadcaster.settings_changed(&snapshot);
    }
    Ok(json!({ "applied": applied.is_some(), "settings": snapshot }))
}
