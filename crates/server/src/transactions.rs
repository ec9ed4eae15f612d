//! Transaction endpoints.

use api_types::transaction::{TransactionList, TransactionUpdate, TransactionView};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use engine::{TransactionPatch, users};

use crate::{ServerError, server::ServerState};

fn map_transaction(txn: engine::Transaction) -> TransactionView {
    TransactionView {
        id: txn.id,
        account_id: txn.account_id,
        transaction_id: txn.external_transaction_id,
        amount: txn.amount,
        date: txn.date,
        name: txn.name,
        merchant_name: txn.merchant_name,
        primary_category: txn.primary_category,
        detailed_category: txn.detailed_category,
        payment_channel: txn.payment_channel,
        currency: txn.currency,
        pending: txn.pending,
        expense: txn.expense,
        income: txn.income,
    }
}

pub async fn list(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(account_id): Path<i32>,
) -> Result<Json<TransactionList>, ServerError> {
    let transactions = state
        .engine
        .list_transactions(user.id, account_id)
        .await?
        .into_iter()
        .map(map_transaction)
        .collect();

    Ok(Json(TransactionList { transactions }))
}

pub async fn update(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(id): Path<i32>,
    Json(payload): Json<TransactionUpdate>,
) -> Result<Json<TransactionView>, ServerError> {
    let patch = TransactionPatch {
        amount: payload.amount,
        date: payload.date,
        merchant_name: payload.merchant_name,
        primary_category: payload.primary_category,
        detailed_category: payload.detailed_category,
        payment_channel: payload.payment_channel,
    };
    let txn = state.engine.update_transaction(user.id, id, patch).await?;
    Ok(Json(map_transaction(txn)))
}

pub async fn delete(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ServerError> {
    state.engine.delete_transaction(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
