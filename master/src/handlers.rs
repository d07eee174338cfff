use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use common::{CompletionRecord, ResultAck};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::state::ResultStore;

pub fn build_router(store: ResultStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/results", post(write_result))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Un worker entrega el resultado de su tarea
async fn write_result(
    State(store): State<ResultStore>,
    Json(record): Json<CompletionRecord>,
) -> Json<ResultAck> {
    debug!(
        "resultado recibido: {}[{}] desde {} => {}",
        record.batch_id, record.index, record.hostname, record.exit_code
    );
    store.write(record);
    Json(ResultAck { ok: true })
}
