//! Reconciliation of local storage with the aggregator change feed.
//!
//! A run pages through the feed starting at the persisted cursor and buffers
//! every delta in memory. Nothing is written until the last page has been
//! fetched; the delta and the new cursor are then committed in a single
//! database transaction. A failed run leaves the item untouched and the next
//! run resumes from the same cursor.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sea_orm::{QueryFilter, QueryOrder, QuerySelect, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};

use crate::{
    AccountSnapshot, CacheDomain, EngineError, RemovedTransaction, ResultEngine,
    TransactionRecord, accounts, items,
};

use super::{Engine, with_tx};

const TRANSACTIONS_WEBHOOK: &str = "TRANSACTIONS";
const SYNC_WEBHOOK_CODES: [&str; 4] = [
    "SYNC_UPDATES_AVAILABLE",
    "INITIAL_UPDATE",
    "HISTORICAL_UPDATE",
    "DEFAULT_UPDATE",
];

/// Rows written by one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

#[derive(Debug)]
pub struct ItemSyncResult {
    pub item_id: i32,
    pub result: ResultEngine<SyncCounts>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event does not concern transactions.
    Ignored,
    /// The item has new transactions to pull.
    SyncRequested { item_id: i32 },
}

#[derive(Default)]
struct DeltaBuffer {
    added: Vec<TransactionRecord>,
    modified: Vec<TransactionRecord>,
    removed: Vec<RemovedTransaction>,
    pages: usize,
}

impl DeltaBuffer {
    fn referenced_accounts(&self) -> HashSet<&str> {
        self.added
            .iter()
            .chain(&self.modified)
            .map(|record| record.account_id.as_str())
            .collect()
    }
}

impl Engine {
    /// Synchronizes one item of `user_id`.
    pub async fn trigger_sync(&self, user_id: i32, item_id: i32) -> ResultEngine<SyncCounts> {
        let item = self.require_item(&self.database, user_id, item_id).await?;
        self.sync_item(item.id).await
    }

    /// Pulls every pending change of `item_id` and applies it.
    ///
    /// Rules of the owner and account balances are refreshed afterwards;
    /// their failures are logged and do not fail the run.
    pub async fn sync_item(&self, item_id: i32) -> ResultEngine<SyncCounts> {
        let item = items::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;
        let start_cursor = item.cursor().to_string();

        let mut buffer = DeltaBuffer::default();
        let mut cursor = start_cursor.clone();
        loop {
            let page = self
                .aggregator
                .sync_transactions(&item.access_token, &cursor)
                .await
                .inspect_err(|err| {
                    tracing::warn!(item_id, page = buffer.pages + 1, "sync page failed: {err}");
                })?;
            buffer.pages += 1;
            buffer.added.extend(page.added);
            buffer.modified.extend(page.modified);
            buffer.removed.extend(page.removed);
            cursor = page.next_cursor;
            if !page.has_more {
                break;
            }
        }

        let stored = accounts::Entity::find()
            .filter(accounts::Column::ItemId.eq(item.id))
            .all(&self.database)
            .await?;
        let missing: Vec<&str> = buffer
            .referenced_accounts()
            .into_iter()
            .filter(|external_id| {
                !stored
                    .iter()
                    .any(|account| account.external_account_id == *external_id)
            })
            .collect();
        let snapshots: Option<Vec<AccountSnapshot>> = if missing.is_empty() {
            None
        } else {
            tracing::debug!(item_id, missing = missing.len(), "fetching unknown accounts");
            Some(self.aggregator.accounts(&item.access_token).await?)
        };

        let now = Utc::now();
        let counts = with_tx!(self, |db_tx| {
            let local = match &snapshots {
                Some(snapshots) => self.upsert_accounts(&db_tx, item.id, snapshots, now).await?,
                None => stored,
            };
            let accounts: HashMap<String, accounts::Model> = local
                .into_iter()
                .map(|account| (account.external_account_id.clone(), account))
                .collect();
            if let Some(unknown) = buffer
                .referenced_accounts()
                .into_iter()
                .find(|external_id| !accounts.contains_key(*external_id))
            {
                return Err(EngineError::KeyNotFound(format!(
                    "account {unknown} not exists"
                )));
            }

            let user_accounts = self.account_ids_of_user(&db_tx, item.user_id).await?;
            let applied = self
                .apply_delta(
                    &db_tx,
                    &accounts,
                    &user_accounts,
                    &buffer.added,
                    &buffer.modified,
                    &buffer.removed,
                )
                .await?;

            let advanced = items::Entity::update_many()
                .col_expr(items::Column::SyncCursor, Expr::value(cursor.clone()))
                .col_expr(items::Column::UpdatedAt, Expr::value(now))
                .filter(items::Column::Id.eq(item.id))
                .filter(Expr::cust_with_values(
                    "COALESCE(sync_cursor, '') = ?",
                    [start_cursor.clone()],
                ))
                .exec(&db_tx)
                .await?;
            if advanced.rows_affected == 0 {
                tracing::warn!(item_id, "cursor moved by a concurrent run, rolling back");
                return Err(EngineError::SyncConflict(format!(
                    "item {item_id} cursor changed during sync"
                )));
            }

            Ok(SyncCounts {
                added: applied.added,
                modified: applied.modified,
                removed: applied.removed,
            })
        })?;

        self.cache.invalidate_all(CacheDomain::Transactions);
        if snapshots.is_some() {
            self.invalidate_item_keys(item.user_id, item.id);
        } else {
            self.invalidate_items_lists(item.user_id);
        }
        tracing::info!(
            item_id,
            pages = buffer.pages,
            added = counts.added,
            modified = counts.modified,
            removed = counts.removed,
            "item synced"
        );

        if let Err(err) = self.apply_rules(item.user_id).await {
            tracing::warn!(item_id, user_id = item.user_id, "post-sync rules failed: {err}");
        }
        let balances = match snapshots {
            Some(snapshots) => self.apply_balances(&item, &snapshots).await,
            None => self.refresh_balances(item.id).await,
        };
        if let Err(err) = balances {
            tracing::warn!(item_id, "post-sync balance refresh failed: {err}");
        }

        Ok(counts)
    }

    /// Synchronizes every item concurrently. One item failing does not
    /// affect the others.
    pub async fn sync_all(&self) -> ResultEngine<Vec<ItemSyncResult>> {
        let item_ids: Vec<i32> = items::Entity::find()
            .select_only()
            .column(items::Column::Id)
            .order_by_asc(items::Column::Id)
            .into_tuple()
            .all(&self.database)
            .await?;

        let mut tasks = JoinSet::new();
        for item_id in item_ids {
            let engine = self.clone();
            tasks.spawn(async move {
                let result = engine.sync_item(item_id).await;
                ItemSyncResult { item_id, result }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Err(err) = &outcome.result {
                        tracing::warn!(item_id = outcome.item_id, "sync failed: {err}");
                    }
                    results.push(outcome);
                }
                Err(err) => tracing::error!("sync task aborted: {err}"),
            }
        }
        results.sort_by_key(|outcome| outcome.item_id);

        let failed = results.iter().filter(|r| r.result.is_err()).count();
        tracing::info!(items = results.len(), failed, "sync of all items done");
        Ok(results)
    }

    /// Decides what an aggregator webhook asks for.
    ///
    /// Transaction update events resolve to the local item to sync; every
    /// other event is acknowledged and ignored.
    pub async fn handle_webhook(
        &self,
        webhook_type: &str,
        webhook_code: &str,
        external_item_id: &str,
    ) -> ResultEngine<WebhookOutcome> {
        if webhook_type != TRANSACTIONS_WEBHOOK || !SYNC_WEBHOOK_CODES.contains(&webhook_code) {
            tracing::debug!(webhook_type, webhook_code, "webhook ignored");
            return Ok(WebhookOutcome::Ignored);
        }

        let item = self.item_by_external_id(external_item_id).await?;
        tracing::info!(item_id = item.id, webhook_code, "webhook requested sync");
        Ok(WebhookOutcome::SyncRequested { item_id: item.id })
    }

    /// Runs [`Engine::sync_item`] in the background. A failure is logged.
    pub fn spawn_sync(&self, item_id: i32) -> JoinHandle<ResultEngine<SyncCounts>> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.sync_item(item_id).await.inspect_err(|err| {
                tracing::warn!(item_id, "background sync failed: {err}");
            })
        })
    }
}
