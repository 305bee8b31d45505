use super::{PersistReport, Store, StoreError};
use crate::feed::{Entry, ParsedFeed};
use crate::identity::Identifier;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Bucket {
    snapshots: Vec<ParsedFeed>,
    entries: Vec<Entry>,
    guids: HashSet<String>,
}

/// Process-local store. Keeps every snapshot it is handed plus the
/// deduplicated entry list per subscription.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<Identifier, Bucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot persisted for `subscription_id`, oldest first.
    pub async fn snapshots(&self, subscription_id: &Identifier) -> Vec<ParsedFeed> {
        self.buckets
            .read()
            .await
            .get(subscription_id)
            .map(|b| b.snapshots.clone())
            .unwrap_or_default()
    }

    /// Total number of snapshots across all subscriptions.
    pub async fn snapshot_count(&self) -> usize {
        self.buckets
            .read()
            .await
            .values()
            .map(|b| b.snapshots.len())
            .sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, feed: &ParsedFeed) -> Result<PersistReport, StoreError> {
        let subscription_id = *feed
            .subscription_id()
            .ok_or(StoreError::MissingSubscriptionId)?;

        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(subscription_id).or_default();

        let mut inserted = 0;
        for entry in feed.entries() {
            if bucket.guids.insert(entry.guid.clone()) {
                bucket.entries.push(entry.clone());
                inserted += 1;
            }
        }
        bucket.snapshots.push(feed.clone());

        Ok(PersistReport {
            inserted,
            total: feed.entries().len(),
        })
    }

    async fn entries(&self, subscription_id: &Identifier) -> Result<Vec<Entry>, StoreError> {
        Ok(self
            .buckets
            .read()
            .await
            .get(subscription_id)
            .map(|b| b.entries.clone())
            .unwrap_or_default())
    }
}
