pub mod blob;
pub mod cache;
pub mod config;
pub mod error;
pub mod http_cache;
pub mod model;
pub mod store;

pub use blob::BlobStore;
pub use cache::{BadgeInfo, ImageCache, ImageClass, VisitedUrls};
pub use config::{CrawlConfig, DataLayout};
pub use error::StoreError;
pub use http_cache::{CachedResponse, HttpCache};
pub use model::{Button, ButtonDB, Host, Sighting, SiteMetadata};
pub use store::{Record, Store, Table};

/// Current time in Unix milliseconds, the unit of `Button::timestamp`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
