use std::{fmt, future::Future, sync::Arc};

use sea_orm::DatabaseConnection;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Aggregator, Cache, CacheDomain, EngineError, ResultEngine};

mod access;
mod accounts;
mod items;
mod rules;
mod sync;
mod transactions;
mod users;

pub use rules::{CategoryChange, RuleInput, RuleRunReport};
pub use sync::{ItemSyncResult, SyncCounts, WebhookOutcome};
pub use transactions::TransactionPatch;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result: $crate::ResultEngine<_> = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Entry point of every operation.
///
/// Cloning is cheap: the connection pool, the cache and the aggregator are
/// shared between clones.
#[derive(Clone)]
pub struct Engine {
    database: DatabaseConnection,
    cache: Arc<Cache>,
    aggregator: Arc<dyn Aggregator>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Clears one cache domain by name (`items`, `accounts` or
    /// `transactions`).
    pub fn clear_cache(&self, domain_name: &str) -> ResultEngine<()> {
        self.cache.clear(domain_name)?;
        tracing::info!(domain = domain_name, "cache cleared");
        Ok(())
    }

    /// Serves `key` from the cache, loading and filling it on a miss.
    ///
    /// Errors are never cached. A value loaded while the domain is being
    /// invalidated is returned but not stored.
    async fn read_through<T, F, Fut>(
        &self,
        domain: CacheDomain,
        key: String,
        load: F,
    ) -> ResultEngine<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResultEngine<T>>,
    {
        if let Some(value) = self.cache.get(domain, &key) {
            tracing::trace!(%domain, key = %key, "cache hit");
            return Ok(value);
        }

        let ticket = self.cache.ticket(domain);
        let value = load().await?;
        self.cache.fill(ticket, &key, &value);
        Ok(value)
    }
}

fn normalize_required_name(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidName(format!(
            "{label} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    cache: Option<Arc<Cache>>,
    aggregator: Option<Arc<dyn Aggregator>>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Pass the required aggregator client
    pub fn aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> EngineBuilder {
        self.aggregator = Some(aggregator);
        self
    }

    /// Share a cache between engines. A fresh in-memory cache is used
    /// otherwise.
    pub fn cache(mut self, cache: Arc<Cache>) -> EngineBuilder {
        self.cache = Some(cache);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let aggregator = self
            .aggregator
            .ok_or_else(|| EngineError::InvalidConfig("aggregator is required".to_string()))?;
        Ok(Engine {
            database: self.database,
            cache: self.cache.unwrap_or_default(),
            aggregator,
        })
    }
}
