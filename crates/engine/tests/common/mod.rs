#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::Barrier;

use engine::{
    AccountSnapshot, Aggregator, AggregatorError, Balances, Engine, Institution, Item, LinkToken,
    PersonalFinanceCategory, RemovedTransaction, SyncPage, TokenExchange, TransactionRecord,
};
use migration::MigratorTrait;

/// Scripted aggregator: pages are keyed by `(access_token, cursor)`.
#[derive(Default)]
pub struct FakeAggregator {
    exchanges: Mutex<HashMap<String, TokenExchange>>,
    accounts: Mutex<HashMap<String, Vec<AccountSnapshot>>>,
    pages: Mutex<HashMap<(String, String), Option<SyncPage>>>,
    barrier: Mutex<Option<Arc<Barrier>>>,
    pub account_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
}

impl FakeAggregator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link(&self, public_token: &str, access_token: &str, item_id: &str) {
        self.exchanges.lock().unwrap().insert(
            public_token.to_string(),
            TokenExchange {
                access_token: access_token.to_string(),
                item_id: item_id.to_string(),
            },
        );
    }

    pub fn set_accounts(&self, access_token: &str, accounts: Vec<AccountSnapshot>) {
        self.accounts
            .lock()
            .unwrap()
            .insert(access_token.to_string(), accounts);
    }

    pub fn page(&self, access_token: &str, cursor: &str, page: SyncPage) {
        self.pages
            .lock()
            .unwrap()
            .insert((access_token.to_string(), cursor.to_string()), Some(page));
    }

    pub fn fail_page(&self, access_token: &str, cursor: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert((access_token.to_string(), cursor.to_string()), None);
    }

    /// Every sync call waits on `barrier` before answering.
    pub fn hold_sync_calls(&self, barrier: Arc<Barrier>) {
        *self.barrier.lock().unwrap() = Some(barrier);
    }

    pub fn account_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.account_calls.store(0, Ordering::SeqCst);
        self.sync_calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Aggregator for FakeAggregator {
    async fn create_link_token(&self, user_id: i32) -> Result<LinkToken, AggregatorError> {
        Ok(LinkToken {
            link_token: format!("link-sandbox-{user_id}"),
            expiration: None,
        })
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        self.exchanges
            .lock()
            .unwrap()
            .get(public_token)
            .cloned()
            .ok_or_else(|| AggregatorError::Api {
                status: 400,
                code: "INVALID_PUBLIC_TOKEN".to_string(),
                message: "unknown public token".to_string(),
            })
    }

    async fn item_institution(&self, _access_token: &str) -> Result<Institution, AggregatorError> {
        Ok(Institution {
            institution_id: Some("ins_1".to_string()),
            institution_name: Some("First Platypus Bank".to_string()),
        })
    }

    async fn accounts(&self, access_token: &str) -> Result<Vec<AccountSnapshot>, AggregatorError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .unwrap_or_default())
    }

    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: &str,
    ) -> Result<SyncPage, AggregatorError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let barrier = self.barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let scripted = self
            .pages
            .lock()
            .unwrap()
            .get(&(access_token.to_string(), cursor.to_string()))
            .cloned();
        match scripted {
            Some(Some(page)) => Ok(page),
            Some(None) => Err(AggregatorError::Unavailable(format!(
                "page after {cursor:?} failed"
            ))),
            None => Ok(SyncPage {
                next_cursor: cursor.to_string(),
                ..Default::default()
            }),
        }
    }
}

pub async fn engine_with_db(aggregator: Arc<FakeAggregator>) -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .aggregator(aggregator)
        .build()
        .await
        .unwrap();
    (engine, db)
}

pub async fn user(engine: &Engine, username: &str) -> i32 {
    engine.create_user(username, "password").await.unwrap().id
}

/// Links `external_item_id` to `user_id` with the given accounts.
pub async fn linked_item(
    engine: &Engine,
    aggregator: &FakeAggregator,
    user_id: i32,
    external_item_id: &str,
    accounts: Vec<AccountSnapshot>,
) -> Item {
    let public_token = format!("public-{external_item_id}");
    let access_token = access_token(external_item_id);
    aggregator.link(&public_token, &access_token, external_item_id);
    aggregator.set_accounts(&access_token, accounts);
    engine.link_item(user_id, &public_token).await.unwrap()
}

pub fn access_token(external_item_id: &str) -> String {
    format!("access-{external_item_id}")
}

pub fn account(account_id: &str, name: &str, kind: &str) -> AccountSnapshot {
    AccountSnapshot {
        account_id: account_id.to_string(),
        name: name.to_string(),
        official_name: None,
        mask: Some("0000".to_string()),
        kind: kind.to_string(),
        subtype: None,
        balances: Balances {
            current: Some(100.0),
            available: Some(90.0),
        },
    }
}

pub fn record(
    transaction_id: &str,
    account_id: &str,
    amount: f64,
    category: &str,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: transaction_id.to_string(),
        account_id: account_id.to_string(),
        amount,
        date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        name: format!("Purchase {transaction_id}"),
        merchant_name: None,
        personal_finance_category: Some(PersonalFinanceCategory {
            primary: category.to_string(),
            detailed: None,
        }),
        payment_channel: Some("online".to_string()),
        pending: false,
        iso_currency_code: Some("USD".to_string()),
    }
}

pub fn page(
    added: Vec<TransactionRecord>,
    modified: Vec<TransactionRecord>,
    removed: &[&str],
    next_cursor: &str,
    has_more: bool,
) -> SyncPage {
    SyncPage {
        added,
        modified,
        removed: removed
            .iter()
            .map(|id| RemovedTransaction {
                transaction_id: id.to_string(),
            })
            .collect(),
        next_cursor: next_cursor.to_string(),
        has_more,
    }
}
