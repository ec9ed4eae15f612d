//! The module contains the error the engine can throw.
//!
//! The errors are:
//!
//! - [`KeyNotFound`] thrown when an item, account, transaction or rule is not
//!   found, or is owned by another user.
//! - [`InvalidCondition`] thrown when a rule condition document cannot be
//!   parsed.
//! - [`SyncConflict`] thrown when another run advanced an item cursor first.
//! - [`Aggregator`] thrown when the upstream aggregation service fails.
//!
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`InvalidCondition`]: EngineError::InvalidCondition
//!  [`SyncConflict`]: EngineError::SyncConflict
//!  [`Aggregator`]: EngineError::Aggregator
use sea_orm::DbErr;
use thiserror::Error;

use crate::aggregator::AggregatorError;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),
    #[error("Invalid cache domain: {0}")]
    InvalidCacheDomain(String),
    #[error("Sync conflict: {0}")]
    SyncConflict(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::Forbidden(a), Self::Forbidden(b)) => a == b,
            (Self::InvalidName(a), Self::InvalidName(b)) => a == b,
            (Self::InvalidCondition(a), Self::InvalidCondition(b)) => a == b,
            (Self::InvalidCacheDomain(a), Self::InvalidCacheDomain(b)) => a == b,
            (Self::SyncConflict(a), Self::SyncConflict(b)) => a == b,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            (Self::Aggregator(a), Self::Aggregator(b)) => a.to_string() == b.to_string(),
            (Self::Serialization(a), Self::Serialization(b)) => a.to_string() == b.to_string(),
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
