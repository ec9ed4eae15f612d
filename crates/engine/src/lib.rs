//! Budget sync engine.
//!
//! Mirrors accounts and transactions of linked aggregator items into a local
//! database, classifies every transaction as expense or income and lets
//! users re-categorize transactions with declarative rules.

pub use accounts::Account;
pub use aggregator::{
    AccountSnapshot, Aggregator, AggregatorError, Balances, Institution, LinkToken,
    PersonalFinanceCategory, RemovedTransaction, SyncPage, TokenExchange, TransactionRecord,
};
pub use cache::{Cache, CacheDomain, CacheStore, MemoryStore};
pub use classifier::{Classification, classify};
pub use condition::{Condition, ConditionValue, Field, Operator, Predicate, TransactionSnapshot};
pub use error::EngineError;
pub use items::Item;
pub use ops::{
    CategoryChange, Engine, EngineBuilder, ItemSyncResult, RuleInput, RuleRunReport, SyncCounts,
    TransactionPatch, WebhookOutcome,
};
pub use plaid::{PlaidClient, PlaidEnvironment};
pub use rules::Rule;
pub use transactions::Transaction;

pub mod accounts;
pub mod aggregator;
pub mod cache;
pub mod classifier;
pub mod condition;
mod error;
pub mod items;
mod ops;
pub mod plaid;
pub mod rules;
pub mod transactions;
pub mod users;

type ResultEngine<T> = Result<T, EngineError>;
