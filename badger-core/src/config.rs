use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "~/.local/share/badger";

/// Crawl settings. Every field has a default so partial JSON files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Link hops allowed from a seed. Seeds themselves are depth 0.
    pub max_depth: usize,
    /// Outbound requests in flight at once, pages and images together.
    pub max_concurrency: usize,
    pub badge_width: u32,
    pub badge_height: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Extra attempts after a transient transport failure.
    pub fetch_retries: u32,
    pub data_dir: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_concurrency: 10,
            badge_width: 88,
            badge_height: 31,
            request_timeout_secs: 10,
            user_agent: "Badger/0.1 (+https://github.com/trapdoorsec/badger)".to_string(),
            fetch_retries: 1,
            data_dir: DEFAULT_DATA_DIR.to_string(),
        }
    }
}

impl CrawlConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_concurrency = workers;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// Where each piece of persistent state lives under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// `~` is expanded.
    pub fn new(data_dir: &str) -> Self {
        let expanded = shellexpand::tilde(data_dir);
        Self {
            root: PathBuf::from(expanded.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("badger.db")
    }

    pub fn http_cache(&self) -> PathBuf {
        self.root.join("http-cache.db")
    }

    pub fn visited(&self) -> PathBuf {
        self.root.join("visited.jsonl")
    }

    pub fn images(&self) -> PathBuf {
        self.root.join("images.jsonl")
    }

    pub fn buttons(&self) -> PathBuf {
        self.root.join("buttons")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CrawlConfig = serde_json::from_str(r#"{"max_depth": 1}"#).unwrap();
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!((config.badge_width, config.badge_height), (88, 31));
    }

    #[test]
    fn test_builder_overrides() {
        let config = CrawlConfig::default()
            .with_max_depth(0)
            .with_workers(2)
            .with_data_dir("/tmp/b");
        assert_eq!(config.max_depth, 0);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.layout().root(), Path::new("/tmp/b"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/tmp/badger");
        assert_eq!(layout.database(), PathBuf::from("/tmp/badger/badger.db"));
        assert_eq!(layout.buttons(), PathBuf::from("/tmp/badger/buttons"));
    }

    #[test]
    fn test_layout_expands_tilde() {
        let layout = DataLayout::new("~/badger");
        assert!(!layout.root().to_string_lossy().starts_with('~'));
    }
}
