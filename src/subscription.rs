//! Subscription records.
//!
//! A [`Subscription`] is one watched feed endpoint plus the bookkeeping the
//! sync pipeline needs: the fingerprint of the last processed payload, the
//! reachability latch, and timestamps. Only [`SyncEngine`] mutates the sync
//! fields; callers own the record and decide where to keep it.
//!
//! [`SyncEngine`]: crate::sync::SyncEngine

use crate::identity::{Algorithm, Identifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("feed URL is empty")]
    EmptyUrl,
    #[error("invalid feed URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Where a subscription sits in the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never reached the fetch step.
    Fresh,
    /// Last fetch returned a success status.
    Reachable,
    /// Last fetch failed at transport or status level. Latched until
    /// [`Subscription::clear_unreachable`].
    Unreachable,
}

/// A watched feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: Identifier,
    feed_url: String,
    last_content_checksum: Option<Identifier>,
    unreachable: bool,
    created_at: DateTime<Utc>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Creates a subscription whose id is the default-algorithm digest of the
    /// feed URL exactly as given (surrounding whitespace removed). The URL is
    /// validated and stored in normalized form, but the id always comes from
    /// the caller's string.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::EmptyUrl`] for a blank string,
    /// [`SubscriptionError::InvalidUrl`] if it does not parse.
    pub fn new(feed_url: &str) -> Result<Self, SubscriptionError> {
        Self::with_algorithm(feed_url, Algorithm::default())
    }

    pub fn with_algorithm(feed_url: &str, algo: Algorithm) -> Result<Self, SubscriptionError> {
        let trimmed = feed_url.trim();
        if trimmed.is_empty() {
            return Err(SubscriptionError::EmptyUrl);
        }
        let url = Url::parse(trimmed).map_err(|e| SubscriptionError::InvalidUrl {
            url: trimmed.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            id: Identifier::from_content(algo, trimmed.as_bytes()),
            feed_url: url.to_string(),
            last_content_checksum: None,
            unreachable: false,
            created_at: Utc::now(),
            last_synced_at: None,
        })
    }

    /// Stable identity; never changes after construction.
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    /// Fingerprint of the last payload that got past the dedup check.
    pub fn last_content_checksum(&self) -> Option<&Identifier> {
        self.last_content_checksum.as_ref()
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last sync attempt that reached the network, successful or
    /// not.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn state(&self) -> SyncState {
        if self.unreachable {
            SyncState::Unreachable
        } else if self.last_synced_at.is_none() {
            SyncState::Fresh
        } else {
            SyncState::Reachable
        }
    }

    /// Re-arms a latched subscription so the next sync hits the network.
    pub fn clear_unreachable(&mut self) {
        self.unreachable = false;
    }

    /// Forgets the last payload fingerprint so the next sync processes the
    /// payload even if it is unchanged.
    pub fn clear_content_checksum(&mut self) {
        self.last_content_checksum = None;
    }

    pub(crate) fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
    }

    pub(crate) fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Stores `checksum` and returns the previous value.
    pub(crate) fn replace_checksum(&mut self, checksum: Option<Identifier>) -> Option<Identifier> {
        std::mem::replace(&mut self.last_content_checksum, checksum)
    }
}
