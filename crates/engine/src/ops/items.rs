use chrono::Utc;
use sea_orm::{
    ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::OnConflict,
};

use crate::{
    CacheDomain, EngineError, Item, LinkToken, ResultEngine, accounts, cache::keys, items,
    transactions,
};

use super::{Engine, normalize_required_name, with_tx};

impl Engine {
    /// Starts a linking session for an existing user.
    pub async fn create_link_token(&self, user_id: i32) -> ResultEngine<LinkToken> {
        self.user(user_id).await?;
        let token = self.aggregator.create_link_token(user_id).await?;
        tracing::info!(user_id, "link token created");
        Ok(token)
    }

    /// Links a new item to `user_id` by exchanging a public link token.
    ///
    /// Linking the same external item twice is a no-op that returns the
    /// stored item. The accounts known upstream at link time are stored
    /// right away; the transaction history comes with the first sync.
    pub async fn link_item(&self, user_id: i32, public_token: &str) -> ResultEngine<Item> {
        let public_token = normalize_required_name(public_token, "public token")?;
        self.user(user_id).await?;

        let exchange = self.aggregator.exchange_public_token(&public_token).await?;
        let institution = match self.aggregator.item_institution(&exchange.access_token).await {
            Ok(institution) => institution,
            Err(err) => {
                tracing::warn!(
                    external_item_id = %exchange.item_id,
                    "institution lookup failed: {err}"
                );
                Default::default()
            }
        };
        let snapshots = match self.aggregator.accounts(&exchange.access_token).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!(
                    external_item_id = %exchange.item_id,
                    "account lookup failed, deferring to first sync: {err}"
                );
                Vec::new()
            }
        };

        let now = Utc::now();
        let item = with_tx!(self, |db_tx| {
            let model = items::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user_id),
                external_item_id: ActiveValue::Set(exchange.item_id.clone()),
                access_token: ActiveValue::Set(exchange.access_token.clone()),
                institution_id: ActiveValue::Set(institution.institution_id.clone()),
                institution_name: ActiveValue::Set(institution.institution_name.clone()),
                sync_cursor: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            };
            items::Entity::insert(model)
                .on_conflict(
                    OnConflict::column(items::Column::ExternalItemId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&db_tx)
                .await?;

            let item = items::Entity::find()
                .filter(items::Column::ExternalItemId.eq(exchange.item_id.as_str()))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;
            if item.user_id != user_id {
                return Err(EngineError::ExistingKey(exchange.item_id.clone()));
            }

            self.upsert_accounts(&db_tx, item.id, &snapshots, now).await?;
            Ok(item)
        })?;

        self.invalidate_item_keys(user_id, item.id);
        tracing::info!(
            user_id,
            item_id = item.id,
            external_item_id = %item.external_item_id,
            accounts = snapshots.len(),
            "item linked"
        );
        Ok(item.into())
    }

    /// Removes an item with its accounts and transactions.
    pub async fn unlink_item(&self, user_id: i32, item_id: i32) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let item = self.require_item(&db_tx, user_id, item_id).await?;
            let account_ids: Vec<i32> = accounts::Entity::find()
                .filter(accounts::Column::ItemId.eq(item.id))
                .all(&db_tx)
                .await?
                .into_iter()
                .map(|account| account.id)
                .collect();

            transactions::Entity::delete_many()
                .filter(transactions::Column::AccountId.is_in(account_ids))
                .exec(&db_tx)
                .await?;
            accounts::Entity::delete_many()
                .filter(accounts::Column::ItemId.eq(item.id))
                .exec(&db_tx)
                .await?;
            items::Entity::delete_by_id(item.id).exec(&db_tx).await?;
            Ok(())
        })?;

        self.invalidate_item_keys(user_id, item_id);
        self.cache.invalidate_all(CacheDomain::Transactions);
        tracing::info!(user_id, item_id, "item unlinked");
        Ok(())
    }

    /// Items of `user_id`, oldest first.
    pub async fn list_items(&self, user_id: i32) -> ResultEngine<Vec<Item>> {
        self.read_through(CacheDomain::Items, keys::items_for_user(user_id), || async {
            let models = items::Entity::find()
                .filter(items::Column::UserId.eq(user_id))
                .order_by_asc(items::Column::Id)
                .all(&self.database)
                .await?;
            Ok(models.into_iter().map(Item::from).collect())
        })
        .await
    }

    /// Every item of every user, oldest first.
    pub async fn list_all_items(&self) -> ResultEngine<Vec<Item>> {
        self.read_through(CacheDomain::Items, keys::all_items(), || async {
            let models = items::Entity::find()
                .order_by_asc(items::Column::Id)
                .all(&self.database)
                .await?;
            Ok(models.into_iter().map(Item::from).collect())
        })
        .await
    }

    pub async fn item(&self, user_id: i32, item_id: i32) -> ResultEngine<Item> {
        let model = self.require_item(&self.database, user_id, item_id).await?;
        Ok(model.into())
    }

    pub(super) async fn item_by_external_id(
        &self,
        external_item_id: &str,
    ) -> ResultEngine<items::Model> {
        items::Entity::find()
            .filter(items::Column::ExternalItemId.eq(external_item_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(external_item_id.to_string()))
    }

    pub(super) fn invalidate_item_keys(&self, user_id: i32, item_id: i32) {
        self.invalidate_items_lists(user_id);
        self.invalidate_account_keys(user_id, item_id);
    }

    /// Item listings carry the cursor state and `updated_at`, so anything
    /// that writes an item row drops them.
    pub(super) fn invalidate_items_lists(&self, user_id: i32) {
        self.cache
            .invalidate(CacheDomain::Items, &keys::items_for_user(user_id));
        self.cache.invalidate(CacheDomain::Items, &keys::all_items());
    }
}
