//! Syndication format detection and parsing.
//!
//! Detection and parsing are separate steps:
//!
//! - [`FormatDetector::detect`] sniffs only the root element of a payload and
//!   classifies it into a [`FeedFormat`]
//! - [`FormatDetector::parse`] hands the payload to the parser registered for
//!   that format and returns a [`ParsedFeed`]
//!
//! A new format is added by registering a `(predicate, parser)` pair; the sync
//! pipeline never needs to know about it.
//!
//! # Example
//!
//! ```
//! use tributary::feed::{FeedFormat, FormatDetector};
//!
//! let detector = FormatDetector::default();
//! let payload = br#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
//! assert_eq!(detector.detect(payload), Some(FeedFormat::Atom));
//! ```

mod detect;
mod parser;

pub use detect::{is_atom, is_rss, sniff_root, RootElement, ATOM_NAMESPACE, RSS1_NAMESPACE};
pub use parser::{FeedParser, FeedRsParser};

use crate::identity::Identifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The closed set of recognized syndication formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Rss,
    Atom,
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedFormat::Rss => f.write_str("rss"),
            FeedFormat::Atom => f.write_str("atom"),
        }
    }
}

/// Errors raised while parsing a payload of an already detected format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The detector knows the format but nothing is registered to parse it.
    #[error("no parser registered for {0} feeds")]
    NoParser(FeedFormat),
    /// Recognized format, malformed content.
    #[error("malformed {format} feed: {message}")]
    Malformed { format: FeedFormat, message: String },
    /// The parser read the document as a different feed family.
    #[error("expected {expected} feed, parser found {found}")]
    FormatMismatch { expected: FeedFormat, found: String },
}

/// One normalized feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Feed-provided id, or a hash of `url|title|published` when absent.
    pub guid: String,
    pub title: String,
    pub url: Option<String>,
    /// Unix seconds.
    pub published: Option<i64>,
    pub summary: Option<String>,
}

/// What a [`FeedParser`] produces: the entries, with no notion of who
/// subscribed to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
}

/// Write-once snapshot of one change-bearing fetch.
///
/// Parsers never set the subscription identity. The sync pipeline attaches it
/// with [`ParsedFeed::stamped`] right before handing the snapshot to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    subscription_id: Option<Identifier>,
    content_checksum: Option<Identifier>,
    format: FeedFormat,
    title: Option<String>,
    entries: Vec<Entry>,
}

impl ParsedFeed {
    pub fn new(format: FeedFormat, document: FeedDocument) -> Self {
        Self {
            subscription_id: None,
            content_checksum: None,
            format,
            title: document.title,
            entries: document.entries,
        }
    }

    /// Attaches the owning subscription and the payload fingerprint.
    pub fn stamped(self, subscription_id: Identifier, content_checksum: Identifier) -> Self {
        Self {
            subscription_id: Some(subscription_id),
            content_checksum: Some(content_checksum),
            ..self
        }
    }

    pub fn subscription_id(&self) -> Option<&Identifier> {
        self.subscription_id.as_ref()
    }

    pub fn content_checksum(&self) -> Option<&Identifier> {
        self.content_checksum.as_ref()
    }

    pub fn format(&self) -> FeedFormat {
        self.format
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// Predicate over a sniffed root element.
pub type DetectPredicate = fn(&RootElement) -> bool;

#[derive(Clone)]
struct Registration {
    format: FeedFormat,
    detect: DetectPredicate,
    parser: Arc<dyn FeedParser>,
}

/// Registry of `(format, predicate, parser)` triples.
///
/// Predicates are tried in registration order; the first match wins.
/// `FormatDetector::default()` knows RSS and Atom.
#[derive(Clone)]
pub struct FormatDetector {
    registrations: Vec<Registration>,
}

impl FormatDetector {
    /// A detector with nothing registered. Detects nothing.
    pub fn empty() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Registers `format`. Re-registering a format replaces its predicate and
    /// parser but keeps its position in the evaluation order.
    pub fn register(
        &mut self,
        format: FeedFormat,
        detect: DetectPredicate,
        parser: Arc<dyn FeedParser>,
    ) -> &mut Self {
        let registration = Registration {
            format,
            detect,
            parser,
        };
        match self.registrations.iter_mut().find(|r| r.format == format) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
        self
    }

    pub fn formats(&self) -> impl Iterator<Item = FeedFormat> + '_ {
        self.registrations.iter().map(|r| r.format)
    }

    /// Classifies `payload` by its root element. `None` means no registered
    /// format matched.
    pub fn detect(&self, payload: &[u8]) -> Option<FeedFormat> {
        let root = sniff_root(payload)?;
        self.registrations
            .iter()
            .find(|r| (r.detect)(&root))
            .map(|r| r.format)
    }

    pub fn parse(&self, format: FeedFormat, payload: &[u8]) -> Result<ParsedFeed, ParseError> {
        let registration = self
            .registrations
            .iter()
            .find(|r| r.format == format)
            .ok_or(ParseError::NoParser(format))?;

        let document = registration.parser.parse(payload)?;
        Ok(ParsedFeed::new(format, document))
    }
}

impl Default for FormatDetector {
    fn default() -> Self {
        let mut detector = Self::empty();
        detector
            .register(
                FeedFormat::Rss,
                is_rss,
                Arc::new(FeedRsParser::new(FeedFormat::Rss)),
            )
            .register(
                FeedFormat::Atom,
                is_atom,
                Arc::new(FeedRsParser::new(FeedFormat::Atom)),
            );
        detector
    }
}

impl fmt::Debug for FormatDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDetector")
            .field("formats", &self.formats().collect::<Vec<_>>())
            .finish()
    }
}
