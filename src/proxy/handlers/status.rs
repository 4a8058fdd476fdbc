// Status surface: JSON only, polled by an external dashboard
use crate::models::{ConfigSummary, ExchangeRecord, StateSnapshot};
use crate::proxy::server::AppState;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_STATE_RECENT: usize = 20;
const DEFAULT_EXCHANGES: usize = 50;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// `GET /api/state`: aggregate status, configuration summary and the
/// latest exchanges, most recent first
pub async fn handle_state(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<StateSnapshot> {
    let status = state.stats.snapshot();
    let mut recent = state.log.recent(query.limit.unwrap_or(DEFAULT_STATE_RECENT));
    recent.reverse();

    Json(StateSnapshot {
        status,
        config: ConfigSummary::from(state.config.as_ref()),
        recent,
    })
}

/// `GET /api/exchanges?limit=N`: the N most recent records, oldest first
pub async fn handle_exchanges(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<Arc<ExchangeRecord>>> {
    Json(state.log.recent(query.limit.unwrap_or(DEFAULT_EXCHANGES)))
}

/// Health check handler
pub async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
