//! Storage engine selection.
//!
//! Backends are looked up by name in a [`StorageRegistry`]. The registry is a
//! plain lookup table: each backend registers a factory under its name, and
//! names that are reserved for backends still being built are registered as
//! pending so they fail loudly instead of falling back to something else.
//!
//! | name | status |
//! |---|---|
//! | `memory` | available |
//! | `sqlite` | available |
//! | `mysql`, `mariadb` | pending ([`StorageError::NotImplemented`]) |
//! | anything else | [`StorageError::UnknownBackend`] |

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StorageConfig;
use crate::feed::{Entry, ParsedFeed};
use crate::identity::Identifier;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from resolving a backend name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No backend is registered under this name.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
    /// The name is reserved for a backend that is not usable yet.
    #[error("storage backend '{0}' is not implemented yet")]
    NotImplemented(String),
}

/// Errors a backend reports while persisting or reading.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshot handed over without a subscription identity.
    #[error("parsed feed has no subscription id")]
    MissingSubscriptionId,

    /// Schema setup failed
    #[error("storage migration failed: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of handing one [`ParsedFeed`] to a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Entries whose guid the store had not seen for this subscription.
    pub inserted: usize,
    /// Entries in the snapshot.
    pub total: usize,
}

/// A persistence backend.
///
/// Stores key everything by the snapshot's subscription id. Entries are
/// deduplicated per subscription by guid; the first copy seen is kept.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend kind, e.g. `"memory"`.
    fn name(&self) -> &str;

    /// Persists a stamped snapshot.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingSubscriptionId`] if `feed` was never stamped, or a
    /// backend-specific error.
    async fn persist(&self, feed: &ParsedFeed) -> Result<PersistReport, StoreError>;

    /// All entries stored for a subscription, in insertion order.
    async fn entries(&self, subscription_id: &Identifier) -> Result<Vec<Entry>, StoreError>;
}

/// A resolved backend. Cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    name: String,
    store: Arc<dyn Store>,
}

impl StoreHandle {
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// Name the handle was resolved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn persist(&self, feed: &ParsedFeed) -> Result<PersistReport, StoreError> {
        self.store.persist(feed).await
    }

    pub async fn entries(&self, subscription_id: &Identifier) -> Result<Vec<Entry>, StoreError> {
        self.store.entries(subscription_id).await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("backend", &self.store.name())
            .finish()
    }
}

type StoreFactory = Arc<dyn Fn() -> Arc<dyn Store> + Send + Sync>;

#[derive(Clone)]
enum Backend {
    Available(StoreFactory),
    Pending,
}

/// Name → backend lookup table.
///
/// Names are matched case-insensitively after trimming. [`resolve`] takes
/// `&self` and performs no I/O, so a shared registry can be queried from any
/// number of tasks.
///
/// [`resolve`]: StorageRegistry::resolve
#[derive(Clone, Default)]
pub struct StorageRegistry {
    backends: HashMap<String, Backend>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    ///
    /// `memory` and `sqlite` each hand out one shared instance per registry,
    /// so every handle resolved from the same registry sees the same data.
    pub fn with_defaults(config: &StorageConfig) -> Self {
        let mut registry = Self::new();

        let memory = Arc::new(MemoryStore::new());
        registry.register("memory", move || memory.clone() as Arc<dyn Store>);

        let sqlite = Arc::new(SqliteStore::new(&config.sqlite_path));
        registry.register("sqlite", move || sqlite.clone() as Arc<dyn Store>);

        registry.register_pending("mysql").register_pending("mariadb");
        registry
    }

    /// Registers (or replaces) an available backend.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Store> + Send + Sync + 'static,
    {
        self.backends
            .insert(normalize(name), Backend::Available(Arc::new(factory)));
        self
    }

    /// Reserves `name` for a backend that exists in name only.
    pub fn register_pending(&mut self, name: &str) -> &mut Self {
        self.backends.insert(normalize(name), Backend::Pending);
        self
    }

    /// Resolves a backend name to a handle.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownBackend`] if nothing is registered under `name`
    /// - [`StorageError::NotImplemented`] if `name` is registered as pending
    pub fn resolve(&self, name: &str) -> Result<StoreHandle, StorageError> {
        let key = normalize(name);
        match self.backends.get(&key) {
            Some(Backend::Available(factory)) => Ok(StoreHandle::new(key, factory())),
            Some(Backend::Pending) => Err(StorageError::NotImplemented(key)),
            None => Err(StorageError::UnknownBackend(name.to_owned())),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Key used by backends that store identifiers as text: `<algo>:<hex>`.
pub(crate) fn identifier_key(id: &Identifier) -> String {
    format!("{}:{}", id.algo(), id.hex_string())
}
