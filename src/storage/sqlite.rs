use super::{identifier_key, PersistReport, Store, StoreError};
use crate::feed::{Entry, ParsedFeed};
use crate::identity::Identifier;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;

const IN_MEMORY: &str = ":memory:";
const BATCH_SIZE: usize = 50;

type EntryRow = (String, String, Option<String>, Option<i64>, Option<String>);

/// SQLite backed store.
///
/// Construction only records the path. The pool is opened and the schema
/// created on first use, so resolving the backend never touches the disk.
pub struct SqliteStore {
    path: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteStore {
    /// `path` is a filesystem path or `:memory:`.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<SqlitePool, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", self.path);
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        // An in-memory database lives only as long as its connections, so
        // keep exactly one open for the lifetime of the pool.
        let pool_options = if self.path == IN_MEMORY {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
        };

        let pool = pool_options.connect_with(options).await?;
        migrate(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::debug!(path = %self.path, "Opened sqlite store");
        Ok(pool)
    }
}

/// Creates the schema. Every statement is `IF NOT EXISTS`, so re-running is a
/// no-op.
async fn migrate(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY,
            subscription_id TEXT NOT NULL,
            content_checksum TEXT,
            format TEXT NOT NULL,
            title TEXT,
            entry_count INTEGER NOT NULL,
            stored_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY,
            subscription_id TEXT NOT NULL,
            guid TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT,
            published INTEGER,
            summary TEXT,
            fetched_at INTEGER NOT NULL,
            UNIQUE(subscription_id, guid)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_subscription ON snapshots(subscription_id)",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(&self, feed: &ParsedFeed) -> Result<PersistReport, StoreError> {
        let subscription_id = feed
            .subscription_id()
            .ok_or(StoreError::MissingSubscriptionId)?;
        let subscription_key = identifier_key(subscription_id);
        let now = chrono::Utc::now().timestamp();

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO snapshots (subscription_id, content_checksum, format, title, entry_count, stored_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&subscription_key)
        .bind(feed.content_checksum().map(identifier_key))
        .bind(feed.format().to_string())
        .bind(feed.title())
        .bind(feed.entries().len() as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut inserted: usize = 0;
        for chunk in feed.entries().chunks(BATCH_SIZE) {
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO entries (subscription_id, guid, title, url, published, summary, fetched_at) ",
            );

            insert_builder.push_values(chunk, |mut b, entry| {
                b.push_bind(&subscription_key)
                    .push_bind(&entry.guid)
                    .push_bind(&entry.title)
                    .push_bind(&entry.url)
                    .push_bind(entry.published)
                    .push_bind(&entry.summary)
                    .push_bind(now);
            });

            let result = insert_builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        Ok(PersistReport {
            inserted,
            total: feed.entries().len(),
        })
    }

    async fn entries(&self, subscription_id: &Identifier) -> Result<Vec<Entry>, StoreError> {
        let pool = self.pool().await?;
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT guid, title, url, published, summary FROM entries
             WHERE subscription_id = ? ORDER BY id",
        )
        .bind(identifier_key(subscription_id))
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(guid, title, url, published, summary)| Entry {
                guid,
                title,
                url,
                published,
                summary,
            })
            .collect())
    }
}
