//! Request and response bodies of the HTTP API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod item {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct LinkTokenView {
        pub link_token: String,
        pub expiration: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExchangeToken {
        pub public_token: String,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct ItemView {
        pub id: i32,
        pub external_item_id: String,
        pub institution_id: Option<String>,
        pub institution_name: Option<String>,
        /// `false` until the first successful sync.
        pub synced: bool,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ItemList {
        pub items: Vec<ItemView>,
    }
}

pub mod account {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct AccountView {
        pub id: i32,
        pub item_id: i32,
        pub name: String,
        pub official_name: Option<String>,
        pub mask: Option<String>,
        #[serde(rename = "type")]
        pub kind: String,
        pub subtype: Option<String>,
        pub current_balance: Option<f64>,
        pub available_balance: Option<f64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AccountList {
        pub accounts: Vec<AccountView>,
    }
}

pub mod transaction {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct TransactionView {
        pub id: i32,
        pub account_id: i32,
        pub transaction_id: String,
        pub amount: f64,
        pub date: NaiveDate,
        pub name: String,
        pub merchant_name: Option<String>,
        pub primary_category: Option<String>,
        pub detailed_category: Option<String>,
        pub payment_channel: Option<String>,
        pub currency: Option<String>,
        pub pending: bool,
        pub expense: bool,
        pub income: bool,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TransactionList {
        pub transactions: Vec<TransactionView>,
    }

    /// Partial update. Missing fields are left untouched.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct TransactionUpdate {
        pub amount: Option<f64>,
        pub date: Option<NaiveDate>,
        pub merchant_name: Option<String>,
        pub primary_category: Option<String>,
        pub detailed_category: Option<String>,
        pub payment_channel: Option<String>,
    }
}

pub mod rule {
    use super::*;

    /// Body of rule creation and replacement.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct RuleNew {
        pub name: String,
        /// Condition tree, e.g.
        /// `{"field": "merchant_name", "op": "contains", "value": "coffee"}`.
        pub conditions: serde_json::Value,
        pub category: String,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct RuleView {
        pub id: i32,
        pub name: String,
        pub conditions: serde_json::Value,
        pub category: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct RuleList {
        pub rules: Vec<RuleView>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct CategoryChangeView {
        pub transaction_id: i32,
        pub rule_id: i32,
        pub from: Option<String>,
        pub to: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct RuleRun {
        pub evaluated: usize,
        pub skipped_rules: Vec<i32>,
        pub changes: Vec<CategoryChangeView>,
    }
}

pub mod sync {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SyncCounts {
        pub added: usize,
        pub modified: usize,
        pub removed: usize,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ItemSync {
        pub item_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub counts: Option<SyncCounts>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SyncAll {
        pub items: Vec<ItemSync>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Recategorized {
        pub changed: usize,
    }
}

pub mod webhook {
    use super::*;

    /// Aggregator webhook body. Only the routing fields are read.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct Webhook {
        pub webhook_type: String,
        pub webhook_code: String,
        pub item_id: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct WebhookAck {
        pub received: bool,
        pub sync_scheduled: bool,
    }
}
