//! Contract with the upstream account-aggregation service.
//!
//! The engine only ever talks to the aggregator through [`Aggregator`]; the
//! production implementation is [`crate::plaid::PlaidClient`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("aggregator unavailable: {0}")]
    Unavailable(String),
}

/// Short-lived token that opens the aggregator's account-linking widget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// Result of exchanging a public link token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub current: Option<f64>,
    pub available: Option<f64>,
}

/// Upstream view of one account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: Balances,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalFinanceCategory {
    pub primary: String,
    #[serde(default)]
    pub detailed: Option<String>,
}

/// Upstream view of one transaction, as found in `added` and `modified`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub account_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub name: String,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub personal_finance_category: Option<PersonalFinanceCategory>,
    #[serde(default)]
    pub payment_channel: Option<String>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
}

impl TransactionRecord {
    pub fn primary_category(&self) -> Option<&str> {
        self.personal_finance_category
            .as_ref()
            .map(|pfc| pfc.primary.as_str())
    }

    pub fn detailed_category(&self) -> Option<&str> {
        self.personal_finance_category
            .as_ref()
            .and_then(|pfc| pfc.detailed.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedTransaction {
    pub transaction_id: String,
}

/// One page of the three-way delta feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPage {
    #[serde(default)]
    pub added: Vec<TransactionRecord>,
    #[serde(default)]
    pub modified: Vec<TransactionRecord>,
    #[serde(default)]
    pub removed: Vec<RemovedTransaction>,
    pub next_cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Opens a linking session for `user_id`; the widget later hands back
    /// the public token consumed by [`Aggregator::exchange_public_token`].
    async fn create_link_token(&self, user_id: i32) -> Result<LinkToken, AggregatorError>;

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError>;

    async fn item_institution(&self, access_token: &str) -> Result<Institution, AggregatorError>;

    async fn accounts(&self, access_token: &str) -> Result<Vec<AccountSnapshot>, AggregatorError>;

    /// Fetches the page following `cursor`. An empty cursor asks for the
    /// full history.
    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: &str,
    ) -> Result<SyncPage, AggregatorError>;
}
