use crate::error::{Result, StoreError};
use dashmap::{DashMap, DashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Append-only JSON-lines file backing a cache. Each mutation is one line,
/// synced before the mutating call returns. `None` keeps the cache in memory.
struct Journal {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl Journal {
    fn memory() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    fn open<T: DeserializeOwned>(path: &Path) -> Result<(Self, Vec<T>)> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut entries = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line) {
                    Ok(entry) => entries.push(entry),
                    // a torn final line from a crash mid-append
                    Err(e) => warn!("Skipping bad line {} in {}: {}", lineno + 1, path.display(), e),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let journal = Self {
            path: Some(path.to_path_buf()),
            file: Some(Mutex::new(file)),
        };
        Ok((journal, entries))
    }

    fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = file.lock().map_err(|_| StoreError::Poisoned("cache journal"))?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(file) = &self.file {
            let mut file = file.lock().map_err(|_| StoreError::Poisoned("cache journal"))?;
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Replaces the journal with one line per live entry.
    fn rewrite<T: Serialize>(&self, entries: impl Iterator<Item = T>) -> Result<()> {
        let (Some(path), Some(file)) = (&self.path, &self.file) else {
            return Ok(());
        };
        let mut file = file.lock().map_err(|_| StoreError::Poisoned("cache journal"))?;

        let tmp = path.with_extension("compact");
        let mut out = File::create(&tmp)?;
        for entry in entries {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            out.write_all(line.as_bytes())?;
        }
        out.sync_all()?;
        fs::rename(&tmp, path)?;

        *file = OpenOptions::new().append(true).open(path)?;
        Ok(())
    }
}

/// Normalized URLs that have already been crawled.
pub struct VisitedUrls {
    urls: DashSet<String>,
    journal: Journal,
}

impl VisitedUrls {
    pub fn in_memory() -> Self {
        Self {
            urls: DashSet::new(),
            journal: Journal::memory(),
        }
    }

    /// Loads the set from `path`, creating the file if needed.
    pub fn load(path: &Path) -> Result<Self> {
        let (journal, entries) = Journal::open::<String>(path)?;
        let urls: DashSet<String> = entries.into_iter().collect();
        debug!("Loaded {} visited URLs from {}", urls.len(), path.display());
        Ok(Self { urls, journal })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Marks `url` visited. Returns false if it already was; only the first
    /// caller for a given URL sees true.
    pub fn insert(&self, url: &str) -> Result<bool> {
        if !self.urls.insert(url.to_string()) {
            return Ok(false);
        }
        self.journal.append(&url)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.journal.flush()
    }
}

/// Measured facts about an image that matched the badge size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeInfo {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    pub hash: String,
}

/// Last known classification of an image URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageClass {
    /// Never looked at (or not yet finished).
    Unknown,
    /// Unmeasurable or the wrong size. Never reconsidered.
    NotBadge,
    Badge(BadgeInfo),
}

/// Image URL -> classification.
pub struct ImageCache {
    entries: DashMap<String, ImageClass>,
    journal: Journal,
}

impl ImageCache {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            journal: Journal::memory(),
        }
    }

    /// Loads the map from `path`; later lines override earlier ones.
    pub fn load(path: &Path) -> Result<Self> {
        let (journal, lines) = Journal::open::<(String, ImageClass)>(path)?;
        let entries = DashMap::new();
        for (src, class) in lines {
            entries.insert(src, class);
        }
        debug!("Loaded {} image classifications from {}", entries.len(), path.display());
        Ok(Self { entries, journal })
    }

    pub fn get(&self, src: &str) -> ImageClass {
        self.entries
            .get(src)
            .map(|entry| entry.value().clone())
            .unwrap_or(ImageClass::Unknown)
    }

    pub fn set(&self, src: &str, class: ImageClass) -> Result<()> {
        self.journal.append(&(src, &class))?;
        self.entries.insert(src.to_string(), class);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.journal.flush()
    }

    /// Drops superseded lines from the backing file.
    pub fn compact(&self) -> Result<()> {
        let snapshot: Vec<(String, ImageClass)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.journal.rewrite(snapshot.into_iter())
    }
}
