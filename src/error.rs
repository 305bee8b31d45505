//! Error taxonomy shared by every module.
//!
//! Each module keeps its own `thiserror` enum. [`ErrorKind`] folds them into
//! the categories callers usually branch on (retry later, fix the input,
//! configure a different backend, ...).

use crate::identity::IdentityError;
use crate::storage::StorageError;
use crate::subscription::SubscriptionError;
use crate::sync::{BuildError, SyncError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad URL, bad hex, empty feed URL.
    InvalidInput,
    /// Fast-fail on a latched subscription; no network attempt was made.
    Unreachable,
    /// Transport failure or non-success status.
    FetchFailed,
    /// Body could not be fully consumed.
    ReadFailed,
    /// No detector matched the payload.
    UnknownFormat,
    /// Recognized format, malformed content.
    ParseFailed,
    UnknownBackend,
    NotImplemented,
    /// The store rejected the snapshot.
    PersistFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::FetchFailed => "fetch failed",
            ErrorKind::ReadFailed => "read failed",
            ErrorKind::UnknownFormat => "unknown format",
            ErrorKind::ParseFailed => "parse failed",
            ErrorKind::UnknownBackend => "unknown backend",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::PersistFailed => "persist failed",
        };
        f.write_str(name)
    }
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

impl SubscriptionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::UnknownBackend(_) => ErrorKind::UnknownBackend,
            StorageError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingFeedUrl | SyncError::InvalidFeedUrl { .. } => ErrorKind::InvalidInput,
            SyncError::Unreachable { .. } => ErrorKind::Unreachable,
            SyncError::FetchFailed(_) => ErrorKind::FetchFailed,
            SyncError::ReadFailed { .. } => ErrorKind::ReadFailed,
            SyncError::UnknownFormat => ErrorKind::UnknownFormat,
            SyncError::ParseFailed(_) => ErrorKind::ParseFailed,
            SyncError::Persist(_) => ErrorKind::PersistFailed,
        }
    }
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Storage(e) => e.kind(),
            BuildError::Http(_) => ErrorKind::InvalidInput,
        }
    }
}
