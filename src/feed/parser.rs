use feed_rs::model::FeedType;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use super::{Entry, FeedDocument, FeedFormat, ParseError};

/// A format-specific parser capability.
///
/// Implementations receive the raw payload bytes and return the normalized
/// entries. They must be pure: no I/O, no shared mutable state.
pub trait FeedParser: Send + Sync {
    fn parse(&self, payload: &[u8]) -> Result<FeedDocument, ParseError>;
}

/// [`FeedParser`] backed by the `feed-rs` crate.
///
/// `feed-rs` sniffs the format itself; this wrapper rejects documents whose
/// family differs from the format it was registered for, so a detector
/// predicate and its parser can never silently disagree.
#[derive(Debug, Clone, Copy)]
pub struct FeedRsParser {
    format: FeedFormat,
}

impl FeedRsParser {
    pub fn new(format: FeedFormat) -> Self {
        Self { format }
    }
}

impl FeedParser for FeedRsParser {
    fn parse(&self, payload: &[u8]) -> Result<FeedDocument, ParseError> {
        let feed = parser::parse(payload).map_err(|e| ParseError::Malformed {
            format: self.format,
            message: e.to_string(),
        })?;

        let family_matches = match self.format {
            FeedFormat::Rss => matches!(
                feed.feed_type,
                FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2
            ),
            FeedFormat::Atom => matches!(feed.feed_type, FeedType::Atom),
        };
        if !family_matches {
            return Err(ParseError::FormatMismatch {
                expected: self.format,
                found: format!("{:?}", feed.feed_type),
            });
        }

        let title = feed.title.map(|t| t.content);
        let entries = feed
            .entries
            .into_iter()
            .map(|entry| {
                let url = entry.links.first().map(|l| l.href.clone());
                let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
                let summary = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body));
                let title = entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string());

                let existing_id = if entry.id.is_empty() {
                    None
                } else {
                    Some(entry.id.as_str())
                };
                let guid = generate_guid(existing_id, url.as_deref(), &title, published);

                Entry {
                    guid,
                    title,
                    url,
                    published,
                    summary,
                }
            })
            .collect();

        Ok(FeedDocument { title, entries })
    }
}

/// Stable entry key: the feed's own id when present, otherwise a SHA-256 over
/// `url|title|published`.
pub(crate) fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
