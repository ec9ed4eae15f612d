use api_types::account::{AccountList, AccountView};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use engine::users;

use crate::{ServerError, server::ServerState};

fn map_account(account: engine::Account) -> AccountView {
    AccountView {
        id: account.id,
        item_id: account.item_id,
        name: account.name,
        official_name: account.official_name,
        mask: account.mask,
        kind: account.kind,
        subtype: account.subtype,
        current_balance: account.current_balance,
        available_balance: account.available_balance,
    }
}

pub async fn list(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(item_id): Path<i32>,
) -> Result<Json<AccountList>, ServerError> {
    let accounts = state
        .engine
        .list_accounts(user.id, item_id)
        .await?
        .into_iter()
        .map(map_account)
        .collect();

    Ok(Json(AccountList { accounts }))
}
