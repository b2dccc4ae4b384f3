pub mod badge;
pub mod context;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod html;
pub mod links;
pub mod page;
pub mod relevance;
pub mod result;

pub use context::CrawlContext;
pub use crawler::{Crawler, ProgressCallback};
pub use error::{Result, ScanError};
pub use fetcher::{FetchedResponse, Fetcher};
pub use result::{CrawlSummary, FrontierItem, ImageOutcome};
