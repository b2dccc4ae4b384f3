use serde::{Deserialize, Serialize};

/// A URL waiting in the frontier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierItem {
    pub url: String,
    /// Pages walked from the seed to reach this link, oldest first. Empty for seeds.
    pub path_history: Vec<String>,
    /// Link hops from the seed. Seeds are 0.
    pub depth: usize,
    /// A badge was found under the anchor this link came from. Provenance
    /// only: it decided whether a cross-host link was enqueued, and
    /// `fetch_page` does not consult it.
    pub found_button: bool,
}

impl FrontierItem {
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path_history: Vec::new(),
            depth: 0,
            found_button: false,
        }
    }
}

/// What classifying one `<img>` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOutcome {
    pub found_button: bool,
    pub hash: Option<String>,
    /// Link targets contributed by the badge.
    pub links: Vec<String>,
}

impl ImageOutcome {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Totals for a finished crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub pages_processed: usize,
    pub pages_dropped: usize,
    pub links_enqueued: usize,
    pub levels: usize,
    pub requests_sent: usize,
}
