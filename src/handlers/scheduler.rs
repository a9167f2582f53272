use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::core::scheduler::JobStats;
use crate::AppState;

fn job_json(stats: &JobStats) -> Value {
    let mut value = serde_json::to_value(stats).unwrap_or_else(|_| json!({}));
    value["state"] = json!(if stats.in_error_state() { "error" } else { "ok" });
    value
}

pub async fn scheduler_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.scheduler.read().await.clone();
    Json(json!({
        "auto_penalty": job_json(&status.auto_penalty),
        "auto_roll": job_json(&status.auto_roll),
        "auto_backup": job_json(&status.auto_backup),
    }))
}
