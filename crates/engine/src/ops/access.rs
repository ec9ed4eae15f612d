//! Ownership checks.
//!
//! Every lookup is scoped to the calling user. A row owned by somebody else
//! is reported exactly like a missing one.

use sea_orm::{ConnectionTrait, JoinType, QueryFilter, QuerySelect, RelationTrait, prelude::*};

use crate::{EngineError, ResultEngine, accounts, items, rules, transactions};

use super::Engine;

impl Engine {
    pub(super) async fn require_item<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
        item_id: i32,
    ) -> ResultEngine<items::Model> {
        items::Entity::find_by_id(item_id)
            .filter(items::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))
    }

    pub(super) async fn require_account<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
        account_id: i32,
    ) -> ResultEngine<accounts::Model> {
        accounts::Entity::find_by_id(account_id)
            .join(JoinType::InnerJoin, accounts::Relation::Items.def())
            .filter(items::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))
    }

    /// Returns the transaction together with its owning account.
    pub(super) async fn require_transaction<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
        transaction_id: i32,
    ) -> ResultEngine<(transactions::Model, accounts::Model)> {
        let not_found = || EngineError::KeyNotFound("transaction not exists".to_string());
        let (transaction, account) = transactions::Entity::find_by_id(transaction_id)
            .find_also_related(accounts::Entity)
            .one(db)
            .await?
            .ok_or_else(not_found)?;
        let account = account.ok_or_else(not_found)?;

        let owned = items::Entity::find_by_id(account.item_id)
            .filter(items::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .is_some();
        if !owned {
            return Err(not_found());
        }
        Ok((transaction, account))
    }

    pub(super) async fn require_rule<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
        rule_id: i32,
    ) -> ResultEngine<rules::Model> {
        rules::Entity::find_by_id(rule_id)
            .filter(rules::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("rule not exists".to_string()))
    }

    /// Ids of every account reachable from the items of `user_id`.
    pub(super) async fn account_ids_of_user<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
    ) -> ResultEngine<Vec<i32>> {
        let ids = accounts::Entity::find()
            .select_only()
            .column(accounts::Column::Id)
            .join(JoinType::InnerJoin, accounts::Relation::Items.def())
            .filter(items::Column::UserId.eq(user_id))
            .into_tuple::<i32>()
            .all(db)
            .await?;
        Ok(ids)
    }
}
