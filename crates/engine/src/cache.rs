//! Read-through cache with per-domain coherence tracking.
//!
//! Every cached query result belongs to exactly one [`CacheDomain`]. Each
//! domain keeps the set of keys it currently has in the underlying
//! [`CacheStore`] and a generation counter, both behind a lock that is
//! independent from the other domains. Invalidating a domain never blocks
//! readers or writers of another one.
//!
//! Read paths take a [`CacheTicket`] before querying the database and fill
//! the cache with [`Cache::fill`]: if any invalidation of the domain happened
//! in between, the loaded value is dropped instead of cached.

use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    Items,
    Accounts,
    Transactions,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 3] = [Self::Items, Self::Accounts, Self::Transactions];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Accounts => "accounts",
            Self::Transactions => "transactions",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheDomain {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "items" => Ok(Self::Items),
            "accounts" => Ok(Self::Accounts),
            "transactions" => Ok(Self::Transactions),
            other => Err(EngineError::InvalidCacheDomain(other.to_string())),
        }
    }
}

/// The key-value primitive the cache sits on.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
}

/// In-process [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Debug, Default)]
struct KeySet {
    keys: HashSet<String>,
    generation: u64,
}

/// Snapshot of a domain generation taken before a database read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTicket {
    domain: CacheDomain,
    generation: u64,
}

pub struct Cache {
    store: Box<dyn CacheStore>,
    items: Mutex<KeySet>,
    accounts: Mutex<KeySet>,
    transactions: Mutex<KeySet>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("items", &self.lock(CacheDomain::Items).keys.len())
            .field("accounts", &self.lock(CacheDomain::Accounts).keys.len())
            .field("transactions", &self.lock(CacheDomain::Transactions).keys.len())
            .finish()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl Cache {
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            items: Mutex::default(),
            accounts: Mutex::default(),
            transactions: Mutex::default(),
        }
    }

    fn lock(&self, domain: CacheDomain) -> MutexGuard<'_, KeySet> {
        let set = match domain {
            CacheDomain::Items => &self.items,
            CacheDomain::Accounts => &self.accounts,
            CacheDomain::Transactions => &self.transactions,
        };
        // Poisoning is ignored: a tracked key without an entry is harmless.
        set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_key(domain: CacheDomain, key: &str) -> String {
        format!("{domain}:{key}")
    }

    pub fn get<T: DeserializeOwned>(&self, domain: CacheDomain, key: &str) -> Option<T> {
        let value = self.store.get(&Self::store_key(domain, key))?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%domain, key, "dropping undecodable cache entry: {err}");
                self.invalidate(domain, key);
                None
            }
        }
    }

    /// Stores a value unconditionally.
    pub fn set<T: Serialize>(&self, domain: CacheDomain, key: &str, value: &T) {
        let mut set = self.lock(domain);
        Self::insert_locked(&*self.store, &mut set, domain, key, value);
    }

    /// Current generation of `domain`, to be taken before reading the
    /// database.
    pub fn ticket(&self, domain: CacheDomain) -> CacheTicket {
        CacheTicket {
            domain,
            generation: self.lock(domain).generation,
        }
    }

    /// Stores a value loaded under `ticket`, unless the domain was
    /// invalidated since. Returns whether the value was cached.
    pub fn fill<T: Serialize>(&self, ticket: CacheTicket, key: &str, value: &T) -> bool {
        let mut set = self.lock(ticket.domain);
        if set.generation != ticket.generation {
            return false;
        }
        Self::insert_locked(&*self.store, &mut set, ticket.domain, key, value)
    }

    fn insert_locked<T: Serialize>(
        store: &dyn CacheStore,
        set: &mut KeySet,
        domain: CacheDomain,
        key: &str,
        value: &T,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%domain, key, "value not cacheable: {err}");
                return false;
            }
        };
        store.set(&Self::store_key(domain, key), value);
        set.keys.insert(key.to_string());
        true
    }

    /// Evicts one key.
    pub fn invalidate(&self, domain: CacheDomain, key: &str) {
        let mut set = self.lock(domain);
        set.generation += 1;
        set.keys.remove(key);
        self.store.remove(&Self::store_key(domain, key));
    }

    /// Evicts every key of `domain`.
    pub fn invalidate_all(&self, domain: CacheDomain) {
        let mut set = self.lock(domain);
        set.generation += 1;
        let keys = std::mem::take(&mut set.keys);
        for key in &keys {
            self.store.remove(&Self::store_key(domain, key));
        }
        tracing::debug!(%domain, evicted = keys.len(), "cache domain cleared");
    }

    /// Clears a domain given by name (`items`, `accounts`, `transactions`).
    pub fn clear(&self, domain_name: &str) -> Result<(), EngineError> {
        let domain = CacheDomain::from_str(domain_name)?;
        self.invalidate_all(domain);
        Ok(())
    }

    pub fn tracked_keys(&self, domain: CacheDomain) -> usize {
        self.lock(domain).keys.len()
    }
}

/// Cache key builders, one per cached query.
pub mod keys {
    pub fn items_for_user(user_id: i32) -> String {
        format!("items_user_{user_id}")
    }

    pub fn all_items() -> String {
        "items_all".to_string()
    }

    pub fn accounts_for_user_item(user_id: i32, item_id: i32) -> String {
        format!("accounts_item_user_{user_id}_{item_id}")
    }

    pub fn accounts_for_item(item_id: i32) -> String {
        format!("accounts_item_{item_id}")
    }

    pub fn transactions_for_user_account(user_id: i32, account_id: i32) -> String {
        format!("transactions_account_user_{user_id}_{account_id}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct SharedStore(Arc<MemoryStore>);

    impl CacheStore for SharedStore {
        fn get(&self, key: &str) -> Option<Value> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: Value) {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) {
            self.0.remove(key)
        }
    }

    #[test]
    fn set_then_get() {
        let cache = Cache::default();
        cache.set(CacheDomain::Items, "a", &vec![1, 2, 3]);
        assert_eq!(cache.get::<Vec<i32>>(CacheDomain::Items, "a"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get::<Vec<i32>>(CacheDomain::Accounts, "a"), None);
    }

    #[test]
    fn invalidate_all_only_touches_its_domain() {
        let cache = Cache::default();
        cache.set(CacheDomain::Transactions, "t1", &"one");
        cache.set(CacheDomain::Transactions, "t2", &"two");
        cache.set(CacheDomain::Accounts, "a1", &"acc");

        cache.invalidate_all(CacheDomain::Transactions);

        assert_eq!(cache.get::<String>(CacheDomain::Transactions, "t1"), None);
        assert_eq!(cache.get::<String>(CacheDomain::Transactions, "t2"), None);
        assert_eq!(cache.tracked_keys(CacheDomain::Transactions), 0);
        assert_eq!(
            cache.get::<String>(CacheDomain::Accounts, "a1"),
            Some("acc".to_string())
        );
        assert_eq!(cache.tracked_keys(CacheDomain::Accounts), 1);
    }

    #[test]
    fn invalidate_removes_entry_from_the_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(SharedStore(store.clone()));
        cache.set(CacheDomain::Accounts, "a1", &1);
        cache.set(CacheDomain::Accounts, "a2", &2);

        cache.invalidate(CacheDomain::Accounts, "a1");

        assert_eq!(store.len(), 1);
        assert_eq!(cache.get::<i32>(CacheDomain::Accounts, "a2"), Some(2));
        assert_eq!(cache.tracked_keys(CacheDomain::Accounts), 1);
    }

    #[test]
    fn tracked_keys_match_live_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(SharedStore(store.clone()));
        for domain in CacheDomain::ALL {
            cache.set(domain, "k", &domain.as_str());
        }
        assert_eq!(store.len(), 3);
        cache.invalidate_all(CacheDomain::Items);
        assert_eq!(store.len(), 2);
        assert!(store.get("items:k").is_none());
        assert!(store.get("accounts:k").is_some());
    }

    #[test]
    fn fill_is_dropped_after_invalidation() {
        let cache = Cache::default();
        let ticket = cache.ticket(CacheDomain::Transactions);
        cache.invalidate_all(CacheDomain::Transactions);

        assert!(!cache.fill(ticket, "t", &"stale"));
        assert_eq!(cache.get::<String>(CacheDomain::Transactions, "t"), None);

        let ticket = cache.ticket(CacheDomain::Transactions);
        assert!(cache.fill(ticket, "t", &"fresh"));
        assert_eq!(
            cache.get::<String>(CacheDomain::Transactions, "t"),
            Some("fresh".to_string())
        );
    }

    #[test]
    fn fill_survives_invalidation_of_other_domains() {
        let cache = Cache::default();
        let ticket = cache.ticket(CacheDomain::Items);
        cache.invalidate_all(CacheDomain::Accounts);
        assert!(cache.fill(ticket, "i", &1));
    }

    #[test]
    fn undecodable_entry_is_evicted() {
        let cache = Cache::default();
        cache.set(CacheDomain::Items, "x", &"text");
        assert_eq!(cache.get::<Vec<u8>>(CacheDomain::Items, "x"), None);
        assert_eq!(cache.tracked_keys(CacheDomain::Items), 0);
    }

    #[test]
    fn clear_by_name() {
        let cache = Cache::default();
        cache.set(CacheDomain::Items, "x", &1);
        cache.clear("items").unwrap();
        assert_eq!(cache.get::<i32>(CacheDomain::Items, "x"), None);
        assert_eq!(
            cache.clear("budgets"),
            Err(EngineError::InvalidCacheDomain("budgets".to_string()))
        );
    }

    #[test]
    fn concurrent_invalidation_of_one_domain_keeps_others() {
        let cache = Arc::new(Cache::default());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("{worker}-{i}");
                    cache.set(CacheDomain::Transactions, &key, &i);
                    cache.set(CacheDomain::Items, &key, &i);
                    if i % 10 == 0 {
                        cache.invalidate_all(CacheDomain::Transactions);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.tracked_keys(CacheDomain::Items), 800);
        assert_eq!(cache.get::<i32>(CacheDomain::Items, "3-199"), Some(199));
    }
}
