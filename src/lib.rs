//! Feed subscription sync pipeline.
//!
//! `tributary` keeps a set of [`Subscription`]s in step with the RSS and Atom
//! feeds they point at. Each sync fetches the feed, skips it when the bytes
//! are identical to the last run, detects and parses the format, stamps the
//! result with the subscription's identity and hands it to a storage backend.
//!
//! ```no_run
//! use tributary::{SyncConfig, SyncEngine, Subscription};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SyncConfig::default();
//! let engine = SyncEngine::from_config(&config)?;
//!
//! let mut subscription = Subscription::new("https://example.com/feed.xml")?;
//! let outcome = engine.sync(&mut subscription).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod identity;
pub mod storage;
pub mod subscription;
pub mod sync;

pub use config::SyncConfig;
pub use error::ErrorKind;
pub use identity::{Algorithm, Identifier};
pub use subscription::Subscription;
pub use sync::{SyncEngine, SyncError, SyncOutcome, SyncPolicy};
