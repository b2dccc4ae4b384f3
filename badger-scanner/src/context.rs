use crate::error::Result;
use crate::fetcher::Fetcher;
use badger_core::{BlobStore, CrawlConfig, HttpCache, ImageCache, Store, VisitedUrls};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Shared services for every page task of a crawl.
pub struct CrawlContext {
    pub config: CrawlConfig,
    pub fetcher: Fetcher,
    pub store: Arc<Store>,
    pub blobs: BlobStore,
    pub visited: Arc<VisitedUrls>,
    pub images: Arc<ImageCache>,
    /// One lock per image src being classified, so concurrent pages wait
    /// for a single download instead of starting their own.
    image_gates: DashMap<String, Arc<Mutex<()>>>,
}

impl CrawlContext {
    pub fn new(
        config: CrawlConfig,
        store: Arc<Store>,
        blobs: BlobStore,
        visited: Arc<VisitedUrls>,
        images: Arc<ImageCache>,
        http_cache: Arc<HttpCache>,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(&config, http_cache)?;
        Ok(Self {
            config,
            fetcher,
            store,
            blobs,
            visited,
            images,
            image_gates: DashMap::new(),
        })
    }

    /// Opens (or creates) all persistent state under the configured data directory.
    pub fn open(config: CrawlConfig) -> Result<Self> {
        let layout = config.layout();
        info!("Using data directory {}", layout.root().display());

        let store = Arc::new(Store::new(&layout.database())?);
        let blobs = BlobStore::open(layout.buttons())?;
        let visited = Arc::new(VisitedUrls::load(&layout.visited())?);
        let images = Arc::new(ImageCache::load(&layout.images())?);
        let http_cache = Arc::new(HttpCache::open(&layout.http_cache())?);

        Self::new(config, store, blobs, visited, images, http_cache)
    }

    /// Everything in memory except badge blobs, which go to `blob_dir`.
    pub fn in_memory(config: CrawlConfig, blob_dir: &Path) -> Result<Self> {
        Self::new(
            config,
            Arc::new(Store::in_memory()?),
            BlobStore::open(blob_dir)?,
            Arc::new(VisitedUrls::in_memory()),
            Arc::new(ImageCache::in_memory()),
            Arc::new(HttpCache::in_memory()),
        )
    }

    pub(crate) fn image_gate(&self, src: &str) -> Arc<Mutex<()>> {
        self.image_gates
            .entry(src.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forgets `gate` unless a newer one has replaced it.
    pub(crate) fn release_image_gate(&self, src: &str, gate: &Arc<Mutex<()>>) {
        self.image_gates.remove_if(src, |_, current| Arc::ptr_eq(current, gate));
    }

    /// Syncs the side caches.
    pub fn flush(&self) -> Result<()> {
        self.visited.flush()?;
        self.images.flush()?;
        Ok(())
    }
}
