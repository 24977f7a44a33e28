//! Skycast - mirror a web feed onto a Bluesky account
//!
//! Each run reads an RSS or Atom feed, walks the entries oldest first and
//! publishes the ones newer than the persisted cursor, one post per entry.

pub mod config;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod filter;
pub mod gate;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod shutdown;
pub mod sync;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{Result, SkycastError};
pub use feed::{FeedSource, HttpFeedSource};
pub use filter::OrderStrategy;
pub use gate::{PostingGate, RetryPolicy};
pub use media::{HttpMediaFetcher, MediaFetcher};
pub use shutdown::Shutdown;
pub use sync::{RunReport, SyncSettings, Synchronizer};
pub use types::{Cursor, Entry, MediaRef, Message, Session};
