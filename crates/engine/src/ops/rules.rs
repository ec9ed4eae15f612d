//! Rule CRUD and rule application.
//!
//! Rules of a user are evaluated in creation order and the first matching
//! rule decides the category of a transaction.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveValue, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, TransactionTrait,
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::{
    CacheDomain, Condition, ResultEngine, Rule, TransactionSnapshot, accounts, classify, items,
    rules, transactions,
};

use super::{Engine, normalize_required_name, with_tx};

/// Fields a user provides when creating or replacing a rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleInput {
    pub name: String,
    /// Condition tree as a JSON document.
    pub conditions: String,
    pub category: String,
}

impl RuleInput {
    fn validate(&self) -> ResultEngine<(String, Condition, String)> {
        let name = normalize_required_name(&self.name, "rule name")?;
        let category = normalize_required_name(&self.category, "rule category")?;
        let condition = Condition::parse(&self.conditions)?;
        Ok((name, condition, category))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryChange {
    pub transaction_id: i32,
    pub rule_id: i32,
    pub from: Option<String>,
    pub to: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRunReport {
    /// Transactions looked at.
    pub evaluated: usize,
    /// Stored rules skipped because their condition does not parse.
    pub skipped_rules: Vec<i32>,
    pub changes: Vec<CategoryChange>,
}

impl Engine {
    pub async fn create_rule(&self, user_id: i32, input: RuleInput) -> ResultEngine<Rule> {
        let (name, condition, category) = input.validate()?;
        self.user(user_id).await?;

        let now = Utc::now();
        let model = rules::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            name: ActiveValue::Set(name),
            conditions: ActiveValue::Set(condition.to_document()?),
            category: ActiveValue::Set(category),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        }
        .insert(&self.database)
        .await?;
        tracing::info!(user_id, rule_id = model.id, "rule created");
        Rule::try_from(model)
    }

    pub async fn rule(&self, user_id: i32, rule_id: i32) -> ResultEngine<Rule> {
        let model = self.require_rule(&self.database, user_id, rule_id).await?;
        Rule::try_from(model)
    }

    /// Rules of `user_id` in evaluation order.
    pub async fn list_rules(&self, user_id: i32) -> ResultEngine<Vec<Rule>> {
        rules::Entity::find()
            .filter(rules::Column::UserId.eq(user_id))
            .order_by_asc(rules::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Rule::try_from)
            .collect()
    }

    /// Replaces name, condition and category of a rule. The evaluation
    /// order does not change.
    pub async fn update_rule(
        &self,
        user_id: i32,
        rule_id: i32,
        input: RuleInput,
    ) -> ResultEngine<Rule> {
        let (name, condition, category) = input.validate()?;
        let document = condition.to_document()?;
        let model = with_tx!(self, |db_tx| {
            let rule = self.require_rule(&db_tx, user_id, rule_id).await?;
            let mut model: rules::ActiveModel = rule.into();
            model.name = ActiveValue::Set(name);
            model.conditions = ActiveValue::Set(document);
            model.category = ActiveValue::Set(category);
            model.updated_at = ActiveValue::Set(Utc::now());
            Ok(model.update(&db_tx).await?)
        })?;
        tracing::info!(user_id, rule_id, "rule updated");
        Rule::try_from(model)
    }

    pub async fn delete_rule(&self, user_id: i32, rule_id: i32) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let rule = self.require_rule(&db_tx, user_id, rule_id).await?;
            rules::Entity::delete_by_id(rule.id).exec(&db_tx).await?;
            Ok(())
        })?;
        tracing::info!(user_id, rule_id, "rule deleted");
        Ok(())
    }

    /// Evaluates the rules of `user_id` against every transaction of the
    /// user and writes the category of the first matching rule.
    ///
    /// Running it twice in a row changes nothing the second time.
    pub async fn apply_rules(&self, user_id: i32) -> ResultEngine<RuleRunReport> {
        let report = with_tx!(self, |db_tx| {
            let mut report = RuleRunReport::default();

            let mut rules = Vec::new();
            for model in rules::Entity::find()
                .filter(rules::Column::UserId.eq(user_id))
                .order_by_asc(rules::Column::Id)
                .all(&db_tx)
                .await?
            {
                match Condition::parse(&model.conditions) {
                    Ok(condition) => rules.push((model.id, condition, model.category)),
                    Err(err) => {
                        tracing::warn!(user_id, rule_id = model.id, "skipping rule: {err}");
                        report.skipped_rules.push(model.id);
                    }
                }
            }
            if rules.is_empty() {
                return Ok(report);
            }

            let accounts: HashMap<i32, accounts::Model> = accounts::Entity::find()
                .join(JoinType::InnerJoin, accounts::Relation::Items.def())
                .filter(items::Column::UserId.eq(user_id))
                .all(&db_tx)
                .await?
                .into_iter()
                .map(|account| (account.id, account))
                .collect();

            let candidates = transactions::Entity::find()
                .filter(transactions::Column::AccountId.is_in(accounts.keys().copied()))
                .order_by_asc(transactions::Column::Id)
                .all(&db_tx)
                .await?;

            for transaction in candidates {
                let Some(account) = accounts.get(&transaction.account_id) else {
                    continue;
                };
                report.evaluated += 1;

                let snapshot = TransactionSnapshot {
                    name: &transaction.name,
                    merchant_name: transaction.merchant_name.as_deref(),
                    amount: transaction.amount,
                    account_name: &account.name,
                };
                let Some((rule_id, _, category)) = rules
                    .iter()
                    .find(|(_, condition, _)| condition.evaluate(&snapshot))
                else {
                    continue;
                };
                if transaction.primary_category.as_deref() == Some(category.as_str()) {
                    continue;
                }

                let change = CategoryChange {
                    transaction_id: transaction.id,
                    rule_id: *rule_id,
                    from: transaction.primary_category.clone(),
                    to: category.clone(),
                };
                let flags = classify(&account.kind, transaction.amount, category);
                let mut model: transactions::ActiveModel = transaction.into();
                model.primary_category = ActiveValue::Set(Some(category.clone()));
                model.set_classification(flags);
                model.updated_at = ActiveValue::Set(Utc::now());
                model.update(&db_tx).await?;

                report.changes.push(change);
            }

            Ok(report)
        })?;

        if !report.changes.is_empty() {
            self.cache.invalidate_all(CacheDomain::Transactions);
        }
        tracing::info!(
            user_id,
            evaluated = report.evaluated,
            changed = report.changes.len(),
            skipped = report.skipped_rules.len(),
            "rules applied"
        );
        Ok(report)
    }
}
