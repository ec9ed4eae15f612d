use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};

use crate::{
    CacheDomain, EngineError, RemovedTransaction, ResultEngine, Transaction, TransactionRecord,
    accounts, cache::keys, transactions,
};

use super::{Engine, normalize_optional_text, with_tx};

/// User edit of a transaction. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPatch {
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub merchant_name: Option<String>,
    pub primary_category: Option<String>,
    pub detailed_category: Option<String>,
    pub payment_channel: Option<String>,
}

impl TransactionPatch {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Rows touched while applying one delta.
#[derive(Debug, Default)]
pub(super) struct AppliedDelta {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

impl Engine {
    /// Transactions of one account of `user_id`, newest first.
    pub async fn list_transactions(
        &self,
        user_id: i32,
        account_id: i32,
    ) -> ResultEngine<Vec<Transaction>> {
        self.read_through(
            CacheDomain::Transactions,
            keys::transactions_for_user_account(user_id, account_id),
            || async {
                let account = self
                    .require_account(&self.database, user_id, account_id)
                    .await?;
                let models = transactions::Entity::find()
                    .filter(transactions::Column::AccountId.eq(account.id))
                    .order_by_desc(transactions::Column::Date)
                    .order_by_desc(transactions::Column::Id)
                    .all(&self.database)
                    .await?;
                Ok(models.into_iter().map(Transaction::from).collect())
            },
        )
        .await
    }

    /// Applies a user edit and re-derives the expense/income flags.
    pub async fn update_transaction(
        &self,
        user_id: i32,
        transaction_id: i32,
        patch: TransactionPatch,
    ) -> ResultEngine<Transaction> {
        if patch.is_empty() {
            return Err(EngineError::InvalidName(
                "transaction patch must change at least one field".to_string(),
            ));
        }
        if patch.amount.is_some_and(|amount| !amount.is_finite()) {
            return Err(EngineError::InvalidName(
                "amount must be a finite number".to_string(),
            ));
        }

        let (updated, account_id) = with_tx!(self, |db_tx| {
            let (transaction, account) = self
                .require_transaction(&db_tx, user_id, transaction_id)
                .await?;

            let mut edited = transaction;
            if let Some(amount) = patch.amount {
                edited.amount = amount;
            }
            if let Some(date) = patch.date {
                edited.date = date;
            }
            if let Some(merchant_name) = patch.merchant_name.as_deref() {
                edited.merchant_name = normalize_optional_text(Some(merchant_name));
            }
            if let Some(category) = patch.primary_category.as_deref() {
                edited.primary_category = normalize_optional_text(Some(category));
            }
            if let Some(category) = patch.detailed_category.as_deref() {
                edited.detailed_category = normalize_optional_text(Some(category));
            }
            if let Some(channel) = patch.payment_channel.as_deref() {
                edited.payment_channel = normalize_optional_text(Some(channel));
            }
            let flags = edited.classify_for(&account.kind);
            edited.expense = flags.expense;
            edited.income = flags.income;
            edited.updated_at = Utc::now();

            let updated = transactions::ActiveModel::from(edited)
                .reset_all()
                .update(&db_tx)
                .await?;
            Ok((updated, account.id))
        })?;

        self.invalidate_transaction_keys(user_id, account_id);
        tracing::info!(user_id, transaction_id, "transaction updated");
        Ok(updated.into())
    }

    pub async fn delete_transaction(&self, user_id: i32, transaction_id: i32) -> ResultEngine<()> {
        let account_id = with_tx!(self, |db_tx| {
            let (transaction, account) = self
                .require_transaction(&db_tx, user_id, transaction_id)
                .await?;
            transactions::Entity::delete_by_id(transaction.id)
                .exec(&db_tx)
                .await?;
            Ok(account.id)
        })?;

        self.invalidate_transaction_keys(user_id, account_id);
        tracing::info!(user_id, transaction_id, "transaction deleted");
        Ok(())
    }

    /// Re-runs the classifier over every stored transaction. Only rows whose
    /// flags change are written. Returns the number of written rows.
    pub async fn recategorize_all(&self) -> ResultEngine<usize> {
        let changed = with_tx!(self, |db_tx| {
            let rows = transactions::Entity::find()
                .find_also_related(accounts::Entity)
                .order_by_asc(transactions::Column::Id)
                .all(&db_tx)
                .await?;

            let mut changed = 0;
            for (transaction, account) in rows {
                let Some(account) = account else {
                    tracing::warn!(
                        transaction_id = transaction.id,
                        "transaction without account, skipping"
                    );
                    continue;
                };
                if Self::reclassify(&db_tx, transaction, &account.kind).await? {
                    changed += 1;
                }
            }
            Ok(changed)
        })?;

        if changed > 0 {
            self.cache.invalidate_all(CacheDomain::Transactions);
        }
        tracing::info!(changed, "transactions recategorized");
        Ok(changed)
    }

    /// Re-runs the classifier over one transaction of `user_id`. Returns
    /// whether its flags changed.
    pub async fn recategorize_transaction(
        &self,
        user_id: i32,
        transaction_id: i32,
    ) -> ResultEngine<bool> {
        let (changed, account_id) = with_tx!(self, |db_tx| {
            let (transaction, account) = self
                .require_transaction(&db_tx, user_id, transaction_id)
                .await?;
            let changed = Self::reclassify(&db_tx, transaction, &account.kind).await?;
            Ok((changed, account.id))
        })?;

        if changed {
            self.invalidate_transaction_keys(user_id, account_id);
        }
        Ok(changed)
    }

    async fn reclassify(
        db_tx: &DatabaseTransaction,
        transaction: transactions::Model,
        account_kind: &str,
    ) -> ResultEngine<bool> {
        let flags = transaction.classify_for(account_kind);
        if flags == transaction.classification() {
            return Ok(false);
        }
        let mut model: transactions::ActiveModel = transaction.into();
        model.set_classification(flags);
        model.updated_at = ActiveValue::Set(Utc::now());
        model.update(db_tx).await?;
        Ok(true)
    }

    /// Applies one buffered delta: adds, then modifications, then removals.
    ///
    /// `accounts` maps external account ids to the local accounts of the
    /// item; `user_accounts` scopes modifications and removals to the
    /// item's owner.
    pub(super) async fn apply_delta(
        &self,
        db_tx: &DatabaseTransaction,
        accounts: &HashMap<String, accounts::Model>,
        user_accounts: &[i32],
        added: &[TransactionRecord],
        modified: &[TransactionRecord],
        removed: &[RemovedTransaction],
    ) -> ResultEngine<AppliedDelta> {
        let now = Utc::now();
        let mut applied = AppliedDelta::default();

        for record in added {
            let account = Self::owning_account(accounts, record)?;
            let model =
                transactions::ActiveModel::from_record(account.id, &account.kind, record, now);
            applied.added += transactions::Entity::insert(model)
                .on_conflict(
                    OnConflict::column(transactions::Column::ExternalTransactionId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(db_tx)
                .await? as usize;
        }

        for record in modified {
            let account = Self::owning_account(accounts, record)?;
            let Some(existing) = transactions::Entity::find()
                .filter(transactions::Column::ExternalTransactionId.eq(record.transaction_id.as_str()))
                .filter(transactions::Column::AccountId.is_in(user_accounts.iter().copied()))
                .one(db_tx)
                .await?
            else {
                tracing::debug!(
                    external_transaction_id = %record.transaction_id,
                    "modified transaction not stored, skipping"
                );
                continue;
            };

            let mut model: transactions::ActiveModel = existing.into();
            model.apply_record(account.id, &account.kind, record, now);
            model.update(db_tx).await?;
            applied.modified += 1;
        }

        if !removed.is_empty() {
            let ids = removed.iter().map(|removed| removed.transaction_id.clone());
            let result = transactions::Entity::delete_many()
                .filter(transactions::Column::ExternalTransactionId.is_in(ids))
                .filter(transactions::Column::AccountId.is_in(user_accounts.iter().copied()))
                .exec(db_tx)
                .await?;
            applied.removed = result.rows_affected as usize;
        }

        Ok(applied)
    }

    fn owning_account<'a>(
        accounts: &'a HashMap<String, accounts::Model>,
        record: &TransactionRecord,
    ) -> ResultEngine<&'a accounts::Model> {
        accounts.get(&record.account_id).ok_or_else(|| {
            EngineError::KeyNotFound(format!("account {} not exists", record.account_id))
        })
    }

    pub(super) fn invalidate_transaction_keys(&self, user_id: i32, account_id: i32) {
        self.cache.invalidate(
            CacheDomain::Transactions,
            &keys::transactions_for_user_account(user_id, account_id),
        );
    }
}
