use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};

use crate::{
    Account, AccountSnapshot, CacheDomain, EngineError, ResultEngine, accounts, cache::keys, items,
};

use super::{Engine, with_tx};

impl Engine {
    /// Accounts of one item of `user_id`.
    pub async fn list_accounts(&self, user_id: i32, item_id: i32) -> ResultEngine<Vec<Account>> {
        self.read_through(
            CacheDomain::Accounts,
            keys::accounts_for_user_item(user_id, item_id),
            || async {
                let item = self.require_item(&self.database, user_id, item_id).await?;
                self.load_accounts(item.id).await
            },
        )
        .await
    }

    /// Accounts of one item, regardless of the owner.
    pub async fn accounts_of_item(&self, item_id: i32) -> ResultEngine<Vec<Account>> {
        self.read_through(
            CacheDomain::Accounts,
            keys::accounts_for_item(item_id),
            || self.load_accounts(item_id),
        )
        .await
    }

    async fn load_accounts(&self, item_id: i32) -> ResultEngine<Vec<Account>> {
        let models = accounts::Entity::find()
            .filter(accounts::Column::ItemId.eq(item_id))
            .order_by_asc(accounts::Column::Id)
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(Account::from).collect())
    }

    /// Pulls fresh balances for every account of `item_id` and writes the
    /// ones that changed. Returns how many accounts were updated.
    pub async fn refresh_balances(&self, item_id: i32) -> ResultEngine<usize> {
        let item = items::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;
        let snapshots = self.aggregator.accounts(&item.access_token).await?;
        self.apply_balances(&item, &snapshots).await
    }

    /// Writes the balances of `snapshots` that differ from the stored ones.
    pub(super) async fn apply_balances(
        &self,
        item: &items::Model,
        snapshots: &[AccountSnapshot],
    ) -> ResultEngine<usize> {
        let changed = with_tx!(self, |db_tx| {
            let stored = accounts::Entity::find()
                .filter(accounts::Column::ItemId.eq(item.id))
                .all(&db_tx)
                .await?;

            let mut changed = 0;
            for account in stored {
                let Some(snapshot) = snapshots
                    .iter()
                    .find(|snapshot| snapshot.account_id == account.external_account_id)
                else {
                    continue;
                };
                if !account.balances_differ(snapshot) {
                    continue;
                }

                let mut model: accounts::ActiveModel = account.into();
                model.current_balance = ActiveValue::Set(snapshot.balances.current);
                model.available_balance = ActiveValue::Set(snapshot.balances.available);
                model.update(&db_tx).await?;
                changed += 1;
            }
            Ok(changed)
        })?;

        if changed > 0 {
            self.invalidate_account_keys(item.user_id, item.id);
        }
        tracing::debug!(item_id = item.id, changed, "balances refreshed");
        Ok(changed)
    }

    /// Inserts the snapshots not stored yet for `item_id` and returns every
    /// account of the item.
    pub(super) async fn upsert_accounts<C: ConnectionTrait>(
        &self,
        db: &C,
        item_id: i32,
        snapshots: &[AccountSnapshot],
        now: DateTime<Utc>,
    ) -> ResultEngine<Vec<accounts::Model>> {
        for snapshot in snapshots {
            accounts::Entity::insert(accounts::ActiveModel::from_snapshot(item_id, snapshot, now))
                .on_conflict(
                    OnConflict::columns([
                        accounts::Column::ItemId,
                        accounts::Column::ExternalAccountId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(db)
                .await?;
        }

        Ok(accounts::Entity::find()
            .filter(accounts::Column::ItemId.eq(item_id))
            .order_by_asc(accounts::Column::Id)
            .all(db)
            .await?)
    }

    pub(super) fn invalidate_account_keys(&self, user_id: i32, item_id: i32) {
        self.cache.invalidate(
            CacheDomain::Accounts,
            &keys::accounts_for_user_item(user_id, item_id),
        );
        self.cache
            .invalidate(CacheDomain::Accounts, &keys::accounts_for_item(item_id));
    }
}
