//! Categorization rule endpoints.

use api_types::rule::{CategoryChangeView, RuleList, RuleNew, RuleRun, RuleView};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use engine::{EngineError, RuleInput, RuleRunReport, condition, users};

use crate::{ServerError, server::ServerState};

fn map_rule(rule: engine::Rule) -> Result<RuleView, ServerError> {
    let conditions = serde_json::to_value(&rule.conditions).map_err(EngineError::from)?;
    Ok(RuleView {
        id: rule.id,
        name: rule.name,
        conditions,
        category: rule.category,
        created_at: rule.created_at,
        updated_at: rule.updated_at,
    })
}

/// Rule bodies go through the condition reader so nested trees are not cut
/// off by the default JSON depth limit of the `Json` extractor.
fn to_input(body: &Bytes) -> Result<RuleInput, ServerError> {
    let text = std::str::from_utf8(body)
        .map_err(|err| ServerError::Generic(format!("rule body is not UTF-8: {err}")))?;
    let payload: RuleNew = condition::from_json(text).map_err(EngineError::from)?;
    Ok(RuleInput {
        name: payload.name,
        conditions: payload.conditions.to_string(),
        category: payload.category,
    })
}

fn map_report(report: RuleRunReport) -> RuleRun {
    RuleRun {
        evaluated: report.evaluated,
        skipped_rules: report.skipped_rules,
        changes: report
            .changes
            .into_iter()
            .map(|change| CategoryChangeView {
                transaction_id: change.transaction_id,
                rule_id: change.rule_id,
                from: change.from,
                to: change.to,
            })
            .collect(),
    }
}

pub async fn list(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
) -> Result<Json<RuleList>, ServerError> {
    let rules = state
        .engine
        .list_rules(user.id)
        .await?
        .into_iter()
        .map(map_rule)
        .collect::<Result<_, _>>()?;

    Ok(Json(RuleList { rules }))
}

pub async fn create(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    body: Bytes,
) -> Result<(StatusCode, Json<RuleView>), ServerError> {
    let rule = state.engine.create_rule(user.id, to_input(&body)?).await?;
    Ok((StatusCode::CREATED, Json(map_rule(rule)?)))
}

pub async fn get(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(rule_id): Path<i32>,
) -> Result<Json<RuleView>, ServerError> {
    let rule = state.engine.rule(user.id, rule_id).await?;
    Ok(Json(map_rule(rule)?))
}

pub async fn update(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(rule_id): Path<i32>,
    body: Bytes,
) -> Result<Json<RuleView>, ServerError> {
    let rule = state
        .engine
        .update_rule(user.id, rule_id, to_input(&body)?)
        .await?;
    Ok(Json(map_rule(rule)?))
}

pub async fn delete(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    Path(rule_id): Path<i32>,
) -> Result<StatusCode, ServerError> {
    state.engine.delete_rule(user.id, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs every rule of the caller over their transactions.
pub async fn apply(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
) -> Result<Json<RuleRun>, ServerError> {
    let report = state.engine.apply_rules(user.id).await?;
    Ok(Json(map_report(report)))
}
