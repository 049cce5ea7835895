//! GET /health — store reachability and worker-lock freshness.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stores = &state.stores;
    let store_ok = stores.tenants.list_active().is_ok();
    let debounce_lock = stores
        .locks
        .remaining_secs(crate::workers::DEBOUNCE_LOCK_NAME)
        .ok()
        .flatten();
    let followup_lock = stores
        .locks
        .remaining_secs(charla_followup::worker::WORKER_LOCK_NAME)
        .ok()
        .flatten();

    Json(json!({
        "ok": store_ok,
        "store": if store_ok { "reachable" } else { "error" },
        "workers": {
            "debounce_lock_remaining_secs": debounce_lock,
            "followup_lock_remaining_secs": followup_lock,
        },
    }))
}
