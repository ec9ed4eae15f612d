//! Operator endpoints. Reachable only by users listed in `server.admin_users`.

use api_types::sync::{ItemSync, Recategorized, SyncAll};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{ServerError, items::map_counts, server::ServerState};

pub async fn sync_all(State(state): State<ServerState>) -> Result<Json<SyncAll>, ServerError> {
    let items = state
        .engine
        .sync_all()
        .await?
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(counts) => ItemSync {
                item_id: outcome.item_id,
                counts: Some(map_counts(counts)),
                error: None,
            },
            Err(err) => ItemSync {
                item_id: outcome.item_id,
                counts: None,
                error: Some(err.to_string()),
            },
        })
        .collect();

    Ok(Json(SyncAll { items }))
}

pub async fn recategorize(
    State(state): State<ServerState>,
) -> Result<Json<Recategorized>, ServerError> {
    let changed = state.engine.recategorize_all().await?;
    Ok(Json(Recategorized { changed }))
}

pub async fn clear_cache(
    State(state): State<ServerState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.engine.clear_cache(&domain)?;
    Ok(StatusCode::NO_CONTENT)
}
