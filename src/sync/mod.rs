//! The per-subscription sync pipeline.
//!
//! One call to [`SyncEngine::sync`] walks a subscription through:
//!
//! 1. precondition checks (feed URL present, not latched unreachable)
//! 2. fetch, stamping `last_synced_at` whatever the outcome
//! 3. fingerprint the payload and stop if it matches the last one
//! 4. detect the format and parse
//! 5. stamp the snapshot with the subscription id and persist it
//!
//! Transport failures and non-success statuses latch the subscription as
//! unreachable; later calls fail fast without touching the network until the
//! caller clears the latch.

pub mod fetch;

pub use fetch::{FetchedResponse, Fetcher, HttpFetcher, ReadError, TransportError};

use crate::config::SyncConfig;
use crate::feed::{FeedFormat, FormatDetector, ParseError, ParsedFeed};
use crate::identity::{Algorithm, Identifier};
use crate::storage::{PersistReport, StorageError, StorageRegistry, StoreError, StoreHandle};
use crate::subscription::{Subscription, SubscriptionError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// How the fetch step failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("fetch of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("sync failure ({status}): {url}")]
    Status { status: u16, url: String },
}

/// Errors from one sync attempt. All are scoped to that subscription.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("subscription has no feed URL")]
    MissingFeedUrl,

    #[error("invalid feed URL '{url}': {reason}")]
    InvalidFeedUrl { url: String, reason: String },

    /// Latched; no request was made.
    #[error("{url} is unreachable")]
    Unreachable { url: String },

    #[error(transparent)]
    FetchFailed(#[from] FetchFailure),

    #[error("failed to read response from {url}: {source}")]
    ReadFailed {
        url: String,
        #[source]
        source: ReadError,
    },

    #[error("unknown syndication format")]
    UnknownFormat,

    #[error(transparent)]
    ParseFailed(#[from] ParseError),

    #[error("failed to persist feed: {0}")]
    Persist(#[from] StoreError),
}

/// Errors building an engine from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Knobs that change what a failed sync leaves behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPolicy {
    /// When set, an unknown format or parse failure restores the previous
    /// checksum so the same payload is processed again on the next sync.
    /// When clear, the payload stays recorded as seen.
    ///
    /// A persist failure is not covered: the new checksum is always kept, so
    /// the next sync of the same bytes returns [`SyncOutcome::Unchanged`] and
    /// that snapshot is not stored until the feed content changes. Call
    /// [`Subscription::clear_content_checksum`] after a persist failure to
    /// force the next sync to process the payload again.
    pub reprocess_on_parse_failure: bool,
}

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Payload fingerprint matched the last one; nothing parsed or persisted.
    Unchanged,
    Changed(ChangeSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    pub format: FeedFormat,
    pub checksum: Identifier,
    pub entries: usize,
    pub persisted: PersistReport,
}

/// Outcome of one subscription inside [`SyncEngine::sync_many`].
#[derive(Debug)]
pub struct SyncReport {
    pub subscription_id: Identifier,
    pub result: Result<SyncOutcome, SyncError>,
}

/// Drives subscriptions through fetch → fingerprint → dedup → detect → parse
/// → persist.
///
/// The engine holds no per-subscription state, so one instance can sync any
/// number of different subscriptions concurrently. `sync` takes the record by
/// `&mut`, which keeps two syncs of the same subscription from overlapping.
#[derive(Clone)]
pub struct SyncEngine {
    fetcher: Arc<dyn Fetcher>,
    detector: FormatDetector,
    store: StoreHandle,
    policy: SyncPolicy,
    identity_algorithm: Algorithm,
    max_concurrent_syncs: usize,
}

const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 10;

/// The only status that counts as a successful fetch. Any other code,
/// including the rest of the 2xx range, latches the subscription.
const SUCCESS_STATUS: u16 = 200;

impl SyncEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>, detector: FormatDetector, store: StoreHandle) -> Self {
        Self {
            fetcher,
            detector,
            store,
            policy: SyncPolicy::default(),
            identity_algorithm: Algorithm::default(),
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
        }
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Algorithm used by [`subscribe`](Self::subscribe) for new ids.
    pub fn with_identity_algorithm(mut self, algo: Algorithm) -> Self {
        self.identity_algorithm = algo;
        self
    }

    /// Clamped to at least one.
    pub fn with_max_concurrent_syncs(mut self, max: usize) -> Self {
        self.max_concurrent_syncs = max.max(1);
        self
    }

    /// Builds an engine with the built-in backends, an HTTP fetcher and the
    /// default RSS/Atom detector.
    ///
    /// # Errors
    ///
    /// [`BuildError::Storage`] if `config.storage.backend` does not resolve.
    pub fn from_config(config: &SyncConfig) -> Result<Self, BuildError> {
        let registry = StorageRegistry::with_defaults(&config.storage);
        Self::from_config_with_registry(config, &registry)
    }

    /// Like [`from_config`](Self::from_config) but resolves the backend in a
    /// caller-supplied registry.
    pub fn from_config_with_registry(
        config: &SyncConfig,
        registry: &StorageRegistry,
    ) -> Result<Self, BuildError> {
        let store = registry.resolve(&config.storage.backend)?;
        let fetcher = HttpFetcher::from_config(&config.fetch)?;

        tracing::debug!(
            backend = store.name(),
            reprocess_on_parse_failure = config.reprocess_on_parse_failure,
            "Built sync engine"
        );

        Ok(Self::new(Arc::new(fetcher), FormatDetector::default(), store)
            .with_policy(SyncPolicy {
                reprocess_on_parse_failure: config.reprocess_on_parse_failure,
            })
            .with_identity_algorithm(config.identity_algorithm)
            .with_max_concurrent_syncs(config.max_concurrent_syncs))
    }

    /// Creates a subscription whose id uses the engine's identity algorithm.
    pub fn subscribe(&self, feed_url: &str) -> Result<Subscription, SubscriptionError> {
        Subscription::with_algorithm(feed_url, self.identity_algorithm)
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn detector(&self) -> &FormatDetector {
        &self.detector
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Runs one sync cycle for `subscription`.
    ///
    /// Side effects on the record happen even when an error is returned:
    /// `last_synced_at` is set once the fetch returns, `unreachable` follows
    /// the fetch outcome, and `last_content_checksum` is replaced as soon as
    /// new content is seen (restored on detect/parse failure only under
    /// [`SyncPolicy::reprocess_on_parse_failure`]).
    ///
    /// # Errors
    ///
    /// - [`SyncError::MissingFeedUrl`] / [`SyncError::InvalidFeedUrl`]: no request made
    /// - [`SyncError::Unreachable`]: latched, no request made
    /// - [`SyncError::FetchFailed`]: transport error or non-success status; latches
    /// - [`SyncError::ReadFailed`]: body could not be fully read
    /// - [`SyncError::UnknownFormat`] / [`SyncError::ParseFailed`]
    /// - [`SyncError::Persist`]: store rejected the snapshot
    pub async fn sync(&self, subscription: &mut Subscription) -> Result<SyncOutcome, SyncError> {
        if subscription.feed_url().is_empty() {
            return Err(SyncError::MissingFeedUrl);
        }
        if subscription.is_unreachable() {
            tracing::debug!(
                subscription = %subscription.id(),
                url = %subscription.feed_url(),
                "Subscription is latched unreachable, skipping fetch"
            );
            return Err(SyncError::Unreachable {
                url: subscription.feed_url().to_owned(),
            });
        }
        let url = Url::parse(subscription.feed_url()).map_err(|e| SyncError::InvalidFeedUrl {
            url: subscription.feed_url().to_owned(),
            reason: e.to_string(),
        })?;

        let fetched = self.fetcher.fetch(&url).await;
        subscription.mark_synced(Utc::now());

        let response = match fetched {
            Ok(response) => response,
            Err(source) => {
                subscription.set_unreachable(true);
                tracing::warn!(
                    subscription = %subscription.id(),
                    url = %url,
                    error = %source,
                    "Fetch failed, marking subscription unreachable"
                );
                return Err(FetchFailure::Transport {
                    url: url.to_string(),
                    source,
                }
                .into());
            }
        };

        let status = response.status();
        if status != SUCCESS_STATUS {
            subscription.set_unreachable(true);
            tracing::warn!(
                subscription = %subscription.id(),
                url = %url,
                status = status,
                "Non-success status, marking subscription unreachable"
            );
            return Err(FetchFailure::Status {
                status,
                url: url.to_string(),
            }
            .into());
        }
        subscription.set_unreachable(false);

        let payload = response
            .read_body()
            .await
            .map_err(|source| SyncError::ReadFailed {
                url: url.to_string(),
                source,
            })?;

        let checksum = Identifier::from_content(subscription.id().algo(), &payload);
        if subscription.last_content_checksum() == Some(&checksum) {
            tracing::debug!(
                subscription = %subscription.id(),
                checksum = %checksum,
                "Content unchanged since last sync"
            );
            return Ok(SyncOutcome::Unchanged);
        }
        let previous = subscription.replace_checksum(Some(checksum));

        let parsed = match self.detect_and_parse(&payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                if self.policy.reprocess_on_parse_failure {
                    subscription.replace_checksum(previous);
                }
                tracing::warn!(
                    subscription = %subscription.id(),
                    url = %url,
                    error = %err,
                    will_retry = self.policy.reprocess_on_parse_failure,
                    "Could not process feed payload"
                );
                return Err(err);
            }
        };

        let parsed = parsed.stamped(*subscription.id(), checksum);
        let persisted = self.store.persist(&parsed).await?;

        tracing::info!(
            subscription = %subscription.id(),
            format = %parsed.format(),
            entries = parsed.entries().len(),
            inserted = persisted.inserted,
            backend = self.store.name(),
            "Synced feed"
        );

        Ok(SyncOutcome::Changed(ChangeSummary {
            format: parsed.format(),
            checksum,
            entries: parsed.entries().len(),
            persisted,
        }))
    }

    fn detect_and_parse(&self, payload: &[u8]) -> Result<ParsedFeed, SyncError> {
        let format = self
            .detector
            .detect(payload)
            .ok_or(SyncError::UnknownFormat)?;
        Ok(self.detector.parse(format, payload)?)
    }

    /// Syncs every subscription in `subscriptions`, at most
    /// `max_concurrent_syncs` at a time.
    ///
    /// Results are returned in completion order, not input order. Latched
    /// subscriptions fail fast as in [`sync`](Self::sync); there is no retry.
    pub async fn sync_many(&self, subscriptions: &mut [Subscription]) -> Vec<SyncReport> {
        if subscriptions.is_empty() {
            return Vec::new();
        }
        let total = subscriptions.len();

        let reports: Vec<SyncReport> = stream::iter(subscriptions.iter_mut())
            .map(|subscription| async move {
                let result = self.sync(subscription).await;
                SyncReport {
                    subscription_id: *subscription.id(),
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent_syncs)
            .collect()
            .await;

        let changed = reports
            .iter()
            .filter(|r| matches!(r.result, Ok(SyncOutcome::Changed(_))))
            .count();
        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        tracing::info!(
            total = total,
            changed = changed,
            unchanged = total - changed - failed,
            failed = failed,
            "Batch sync complete"
        );

        reports
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("detector", &self.detector)
            .field("store", &self.store)
            .field("policy", &self.policy)
            .field("identity_algorithm", &self.identity_algorithm)
            .field("max_concurrent_syncs", &self.max_concurrent_syncs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::feed::{is_atom, is_rss, FeedDocument, FeedParser, FeedRsParser};
    use crate::storage::{MemoryStore, Store};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><link>https://example.com/</link><description>d</description>
    <item><guid>1</guid><title>One</title></item>
</channel></rss>"#;

    const RSS_UPDATED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><link>https://example.com/</link><description>d</description>
    <item><guid>1</guid><title>One</title></item>
    <item><guid>2</guid><title>Two</title></item>
</channel></rss>"#;

    const MALFORMED_RSS: &str = r#"<rss version="2.0"></rss>"#;

    enum Scripted {
        Respond(u16, &'static str),
        TransportFailure,
        ReadFailure,
    }

    /// Plays back a fixed sequence of fetch results and counts calls.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    struct ScriptedResponse {
        status: u16,
        body: Result<Vec<u8>, ()>,
    }

    #[async_trait]
    impl FetchedResponse for ScriptedResponse {
        fn status(&self) -> u16 {
            self.status
        }

        async fn read_body(self: Box<Self>) -> Result<Vec<u8>, ReadError> {
            self.body.map_err(|_| ReadError::Incomplete {
                expected: 100,
                received: 10,
            })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Box<dyn FetchedResponse>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("fetch called more often than scripted");
            match next {
                Scripted::Respond(status, body) => Ok(Box::new(ScriptedResponse {
                    status,
                    body: Ok(body.as_bytes().to_vec()),
                })),
                Scripted::ReadFailure => Ok(Box::new(ScriptedResponse {
                    status: 200,
                    body: Err(()),
                })),
                Scripted::TransportFailure => {
                    Err(TransportError::Connection("connection refused".to_string()))
                }
            }
        }
    }

    /// Wraps the real parser and counts invocations.
    struct CountingParser {
        inner: FeedRsParser,
        calls: Arc<AtomicUsize>,
    }

    impl FeedParser for CountingParser {
        fn parse(&self, payload: &[u8]) -> Result<FeedDocument, ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.parse(payload)
        }
    }

    struct Harness {
        engine: SyncEngine,
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<MemoryStore>,
        parses: Arc<AtomicUsize>,
    }

    fn harness(script: Vec<Scripted>, policy: SyncPolicy) -> Harness {
        let fetcher = ScriptedFetcher::new(script);
        let store = Arc::new(MemoryStore::new());
        let parses = Arc::new(AtomicUsize::new(0));

        let mut detector = FormatDetector::empty();
        detector
            .register(
                FeedFormat::Rss,
                is_rss,
                Arc::new(CountingParser {
                    inner: FeedRsParser::new(FeedFormat::Rss),
                    calls: parses.clone(),
                }),
            )
            .register(
                FeedFormat::Atom,
                is_atom,
                Arc::new(CountingParser {
                    inner: FeedRsParser::new(FeedFormat::Atom),
                    calls: parses.clone(),
                }),
            );

        let engine = SyncEngine::new(
            fetcher.clone(),
            detector,
            StoreHandle::new("memory", store.clone()),
        )
        .with_policy(policy);

        Harness {
            engine,
            fetcher,
            store,
            parses,
        }
    }

    fn subscription() -> Subscription {
        Subscription::new("https://example.com/feed.xml").unwrap()
    }

    #[tokio::test]
    async fn test_first_sync_persists_stamped_snapshot() {
        let h = harness(vec![Scripted::Respond(200, RSS)], SyncPolicy::default());
        let mut sub = subscription();

        let outcome = h.engine.sync(&mut sub).await.unwrap();
        let SyncOutcome::Changed(summary) = outcome else {
            panic!("expected Changed, got {outcome:?}");
        };
        assert_eq!(summary.format, FeedFormat::Rss);
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.persisted.inserted, 1);

        let expected_checksum = Identifier::from_content(sub.id().algo(), RSS);
        assert_eq!(summary.checksum, expected_checksum);
        assert_eq!(sub.last_content_checksum(), Some(&expected_checksum));
        assert!(sub.last_synced_at().is_some());
        assert!(!sub.is_unreachable());

        let snapshots = h.store.snapshots(sub.id()).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].subscription_id(), Some(sub.id()));
        assert_ne!(snapshots[0].subscription_id(), Some(&expected_checksum));
    }

    #[tokio::test]
    async fn test_unchanged_payload_skips_parse_and_persist() {
        let h = harness(
            vec![Scripted::Respond(200, RSS), Scripted::Respond(200, RSS)],
            SyncPolicy::default(),
        );
        let mut sub = subscription();

        h.engine.sync(&mut sub).await.unwrap();
        let first_synced_at = sub.last_synced_at();
        assert_eq!(h.parses.load(Ordering::SeqCst), 1);

        let outcome = h.engine.sync(&mut sub).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(h.parses.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.snapshot_count().await, 1);
        assert_eq!(h.fetcher.calls(), 2);
        assert!(sub.last_synced_at() >= first_synced_at);
    }

    #[tokio::test]
    async fn test_changed_payload_is_processed_again() {
        let h = harness(
            vec![Scripted::Respond(200, RSS), Scripted::Respond(200, RSS_UPDATED)],
            SyncPolicy::default(),
        );
        let mut sub = subscription();

        h.engine.sync(&mut sub).await.unwrap();
        let outcome = h.engine.sync(&mut sub).await.unwrap();

        let SyncOutcome::Changed(summary) = outcome else {
            panic!("expected Changed");
        };
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.persisted.inserted, 1);
        assert_eq!(h.store.entries(sub.id()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_success_status_latches() {
        let h = harness(vec![Scripted::Respond(404, "")], SyncPolicy::default());
        let mut sub = subscription();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::FetchFailed(FetchFailure::Status { status: 404, .. })
        ));
        assert!(sub.is_unreachable());
        assert!(sub.last_synced_at().is_some());

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_2xx_statuses_latch() {
        for status in [201, 204, 206] {
            let h = harness(vec![Scripted::Respond(status, "")], SyncPolicy::default());
            let mut sub = subscription();

            let err = h.engine.sync(&mut sub).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    SyncError::FetchFailed(FetchFailure::Status { status: s, .. }) if s == status
                ),
                "status {status} gave {err:?}"
            );
            assert!(sub.is_unreachable());
            assert!(sub.last_content_checksum().is_none());
            assert_eq!(h.parses.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_transport_failure_latches() {
        let h = harness(vec![Scripted::TransportFailure], SyncPolicy::default());
        let mut sub = subscription();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert!(matches!(
            err,
            SyncError::FetchFailed(FetchFailure::Transport { .. })
        ));
        assert!(sub.is_unreachable());
        assert!(sub.last_synced_at().is_some());
    }

    #[tokio::test]
    async fn test_latched_sync_leaves_timestamp_alone() {
        let h = harness(vec![Scripted::Respond(500, "")], SyncPolicy::default());
        let mut sub = subscription();

        h.engine.sync(&mut sub).await.unwrap_err();
        let latched_at = sub.last_synced_at();

        h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(sub.last_synced_at(), latched_at);
    }

    #[tokio::test]
    async fn test_clearing_latch_allows_fetch() {
        let h = harness(
            vec![Scripted::Respond(503, ""), Scripted::Respond(200, RSS)],
            SyncPolicy::default(),
        );
        let mut sub = subscription();

        h.engine.sync(&mut sub).await.unwrap_err();
        sub.clear_unreachable();

        let outcome = h.engine.sync(&mut sub).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Changed(_)));
        assert!(!sub.is_unreachable());
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_does_not_latch() {
        let h = harness(vec![Scripted::ReadFailure], SyncPolicy::default());
        let mut sub = subscription();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailed);
        assert!(!sub.is_unreachable());
        assert!(sub.last_content_checksum().is_none());
    }

    #[tokio::test]
    async fn test_unknown_format_records_checksum_by_default() {
        let h = harness(
            vec![
                Scripted::Respond(200, "<html></html>"),
                Scripted::Respond(200, "<html></html>"),
            ],
            SyncPolicy::default(),
        );
        let mut sub = subscription();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownFormat));
        assert_eq!(
            sub.last_content_checksum(),
            Some(&Identifier::from_content(sub.id().algo(), "<html></html>"))
        );

        // Same bytes again: dedup wins, nothing is re-examined
        assert_eq!(h.engine.sync(&mut sub).await.unwrap(), SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried_by_default() {
        let h = harness(
            vec![
                Scripted::Respond(200, MALFORMED_RSS),
                Scripted::Respond(200, MALFORMED_RSS),
            ],
            SyncPolicy::default(),
        );
        let mut sub = subscription();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        assert_eq!(h.engine.sync(&mut sub).await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(h.parses.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn test_parse_failure_is_retried_when_policy_set() {
        let h = harness(
            vec![
                Scripted::Respond(200, RSS),
                Scripted::Respond(200, MALFORMED_RSS),
                Scripted::Respond(200, MALFORMED_RSS),
            ],
            SyncPolicy {
                reprocess_on_parse_failure: true,
            },
        );
        let mut sub = subscription();

        h.engine.sync(&mut sub).await.unwrap();
        let good_checksum = sub.last_content_checksum().copied();

        h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(sub.last_content_checksum().copied(), good_checksum);

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        assert_eq!(h.parses.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_feed_url() {
        let h = harness(vec![], SyncPolicy::default());
        let mut sub = subscription();
        let mut json = serde_json::to_value(&sub).unwrap();
        json["feed_url"] = serde_json::Value::String(String::new());
        sub = serde_json::from_value(json).unwrap();

        let err = h.engine.sync(&mut sub).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingFeedUrl));
        assert_eq!(h.fetcher.calls(), 0);
        assert!(sub.last_synced_at().is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_propagates() {
        struct FailingStore;

        #[async_trait]
        impl Store for FailingStore {
            fn name(&self) -> &str {
                "failing"
            }

            async fn persist(&self, _feed: &ParsedFeed) -> Result<PersistReport, StoreError> {
                Err(StoreError::Migration("disk full".to_string()))
            }

            async fn entries(
                &self,
                _subscription_id: &Identifier,
            ) -> Result<Vec<crate::feed::Entry>, StoreError> {
                Ok(Vec::new())
            }
        }

        let engine = SyncEngine::new(
            ScriptedFetcher::new(vec![
                Scripted::Respond(200, RSS),
                Scripted::Respond(200, RSS),
                Scripted::Respond(200, RSS),
            ]),
            FormatDetector::default(),
            StoreHandle::new("failing", Arc::new(FailingStore)),
        );
        let mut sub = subscription();

        let err = engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistFailed);
        assert!(sub.last_content_checksum().is_some());

        // Checksum survives the failure, so the same bytes dedup next time
        assert_eq!(engine.sync(&mut sub).await.unwrap(), SyncOutcome::Unchanged);

        sub.clear_content_checksum();
        let err = engine.sync(&mut sub).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistFailed);
    }

    #[tokio::test]
    async fn test_sync_many_runs_each_subscription_once() {
        let h = harness(
            vec![
                Scripted::Respond(200, RSS),
                Scripted::Respond(200, RSS),
                Scripted::Respond(404, ""),
            ],
            SyncPolicy::default(),
        );
        let mut subs = vec![
            Subscription::new("https://a.example/feed").unwrap(),
            Subscription::new("https://b.example/feed").unwrap(),
            Subscription::new("https://c.example/feed").unwrap(),
        ];

        let reports = h.engine.sync_many(&mut subs).await;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().filter(|r| r.result.is_ok()).count(), 2);
        assert_eq!(subs.iter().filter(|s| s.is_unreachable()).count(), 1);
        assert_eq!(h.fetcher.calls(), 3);

        for report in reports.iter().filter(|r| r.result.is_ok()) {
            let snapshots = h.store.snapshots(&report.subscription_id).await;
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].subscription_id(), Some(&report.subscription_id));
        }
    }

    #[tokio::test]
    async fn test_sync_many_empty() {
        let h = harness(vec![], SyncPolicy::default());
        assert!(h.engine.sync_many(&mut []).await.is_empty());
    }

    #[test]
    fn test_from_config_rejects_pending_backend() {
        let mut config = SyncConfig::default();
        config.storage.backend = "mysql".to_string();
        let err = SyncEngine::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);

        config.storage.backend = "postgres".to_string();
        let err = SyncEngine::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownBackend);
    }

    #[test]
    fn test_from_config_applies_policy() {
        let config = SyncConfig {
            reprocess_on_parse_failure: true,
            identity_algorithm: Algorithm::Sha256,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::from_config(&config).unwrap();
        assert!(engine.policy().reprocess_on_parse_failure);
        assert_eq!(engine.store().name(), "memory");

        let sub = engine.subscribe("https://example.com/feed").unwrap();
        assert_eq!(sub.id().algo(), Algorithm::Sha256);
    }

    #[tokio::test]
    async fn test_checksum_follows_subscription_algorithm() {
        let h = harness(vec![Scripted::Respond(200, RSS)], SyncPolicy::default());
        let mut sub = h
            .engine
            .clone()
            .with_identity_algorithm(Algorithm::Sha256)
            .subscribe("https://example.com/feed.xml")
            .unwrap();

        h.engine.sync(&mut sub).await.unwrap();
        assert_eq!(
            sub.last_content_checksum(),
            Some(&Identifier::from_content(Algorithm::Sha256, RSS))
        );
    }
}
