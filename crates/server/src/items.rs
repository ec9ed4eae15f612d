//! Item endpoints: link sessions, linking, listing, unlinking and manual sync.

use api_types::{
    item::{ExchangeToken, ItemList, ItemView, LinkTokenView},
    sync::SyncCounts,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use engine::users;

use crate::{ServerError, server::ServerState};

pub(crate) fn map_item(item: engine::Item) -> ItemView {
    ItemView {
        id: item.id,
        external_item_id: item.external_item_id,
        institution_id: item.institution_id,
        institution_name: item.institution_name,
        synced: item.has_cursor,
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

pub(crate) fn map_counts(counts: engine::SyncCounts) -> SyncCounts {
    SyncCounts {
        added: counts.added,
        modified: counts.modified,
        removed: counts.removed,
    }
}

pub async fn link_token(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
) -> Result<(StatusCode, Json<LinkTokenView>), ServerError> {
    let token = state.engine.create_link_token(user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(LinkTokenView {
            link_token: token.link_token,
            expiration: token.expiration,
        }),
    ))
}

/// Links a new item and starts its initial sync in the background.
pub async fn exchange(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Json(payload): Json<ExchangeToken>,
) -> Result<(StatusCode, Json<ItemView>), ServerError> {
    let item = state
        .engine
        .link_item(user.id, &payload.public_token)
        .await?;
    // Detached; the outcome only shows up in the logs.
    let _ = state.engine.spawn_sync(item.id);

    Ok((StatusCode::CREATED, Json(map_item(item))))
}

pub async fn list(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
) -> Result<Json<ItemList>, ServerError> {
    let items = state
        .engine
        .list_items(user.id)
        .await?
        .into_iter()
        .map(map_item)
        .collect();

    Ok(Json(ItemList { items }))
}

pub async fn unlink(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(item_id): Path<i32>,
) -> Result<StatusCode, ServerError> {
    state.engine.unlink_item(user.id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sync(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(item_id): Path<i32>,
) -> Result<Json<SyncCounts>, ServerError> {
    let counts = state.engine.trigger_sync(user.id, item_id).await?;
    Ok(Json(map_counts(counts)))
}
