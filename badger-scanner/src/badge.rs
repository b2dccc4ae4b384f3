use crate::context::CrawlContext;
use crate::error::Result;
use crate::html::ImageRef;
use crate::links::{host_key, resolve};
use crate::result::ImageOutcome;
use badger_core::{BadgeInfo, Button, Host, ImageClass, Sighting, now_millis};
use image::ImageReader;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::{debug, info, warn};
use url::Url;

/// Pixel size and container format read from image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

/// Reads only the header; the image is not decoded.
pub fn measure(bytes: &[u8]) -> Option<Measurement> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader
        .format()
        .and_then(|f| f.extensions_str().first().map(|ext| ext.to_string()));
    let (width, height) = reader.into_dimensions().ok()?;
    Some(Measurement {
        width,
        height,
        format,
    })
}

/// Lowercase hex SHA-256 of the raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

enum Cached {
    NotBadge,
    Known(String),
    Miss,
}

impl CrawlContext {
    fn is_badge_size(&self, m: &Measurement) -> bool {
        m.width == self.config.badge_width && m.height == self.config.badge_height
    }

    /// Classifies one image found on `page`, linking to `href` if it sits in
    /// an anchor, and records any badge in the store.
    ///
    /// Network trouble only loses this image. `Err` means the store could
    /// not be written.
    pub async fn process_image(
        &self,
        img: &ImageRef,
        page: &Url,
        href: Option<&str>,
    ) -> Result<ImageOutcome> {
        let Some(src) = img.src.as_deref().and_then(|s| resolve(page, s)) else {
            return Ok(ImageOutcome::none());
        };
        let src = src.to_string();

        let sighting = Sighting {
            src: src.clone(),
            page_url: page.to_string(),
            href: href.map(str::to_string),
            alt: img.alt.clone(),
            title: img.title.clone(),
        };

        let hash = match self.cached_badge(&src, &sighting)? {
            Cached::NotBadge => return Ok(ImageOutcome::none()),
            Cached::Known(hash) => hash,
            Cached::Miss => {
                let gate = self.image_gate(&src);
                let guard = gate.lock().await;
                // another page may have classified it while we waited
                let classified = match self.cached_badge(&src, &sighting)? {
                    Cached::NotBadge => None,
                    Cached::Known(hash) => Some(hash),
                    Cached::Miss => self.classify_remote(&src, &sighting).await?,
                };
                drop(guard);
                self.release_image_gate(&src, &gate);
                match classified {
                    Some(hash) => hash,
                    None => return Ok(ImageOutcome::none()),
                }
            }
        };

        // a badge belongs to the host it links to
        let home = href.and_then(|h| Url::parse(h).ok()).unwrap_or_else(|| page.clone());
        if let Some(host) = host_key(&home) {
            self.store.update::<Host, _>(&host, |current| {
                let mut record = current.unwrap_or_else(|| Host::new(host.clone()));
                Ok(record.add_button(&hash).then_some(record))
            })?;
        }

        Ok(ImageOutcome {
            found_button: true,
            hash: Some(hash),
            links: href.map(str::to_string).into_iter().collect(),
        })
    }

    /// Answers from the image cache. A known badge gets the sighting merged
    /// into its Button; a badge whose Button is missing counts as a miss.
    fn cached_badge(&self, src: &str, sighting: &Sighting) -> Result<Cached> {
        match self.images.get(src) {
            ImageClass::NotBadge => Ok(Cached::NotBadge),
            ImageClass::Badge(info) if self.store.get::<Button>(&info.hash)?.is_some() => {
                debug!("[{}] {} already known as {}", sighting.page_url, src, info.hash);
                self.record_badge(&info.hash, sighting, None, None)?;
                Ok(Cached::Known(info.hash))
            }
            _ => Ok(Cached::Miss),
        }
    }

    /// Downloads, measures and hashes an image not classified before.
    /// Returns the hash if it is a badge.
    async fn classify_remote(&self, src: &str, sighting: &Sighting) -> Result<Option<String>> {
        let response = match self.fetcher.fetch_with_retry(src, self.config.fetch_retries).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Could not fetch image {}: {}", src, e);
                return Ok(None);
            }
        };

        let measurement = match measure(&response.body) {
            Some(m) if self.is_badge_size(&m) => m,
            other => {
                debug!("{} is not a badge ({:?})", src, other.map(|m| (m.width, m.height)));
                self.images.set(src, ImageClass::NotBadge)?;
                return Ok(None);
            }
        };

        let hash = content_hash(&response.body);
        self.images.set(
            src,
            ImageClass::Badge(BadgeInfo {
                width: measurement.width,
                height: measurement.height,
                format: measurement.format.clone(),
                hash: hash.clone(),
            }),
        )?;

        self.record_badge(&hash, sighting, Some(&response.body), measurement.format)?;
        Ok(Some(hash))
    }

    /// Merges a sighting into the Button for `hash`, creating it (and its
    /// blob) when `bytes` are at hand.
    fn record_badge(
        &self,
        hash: &str,
        sighting: &Sighting,
        bytes: Option<&[u8]>,
        format: Option<String>,
    ) -> Result<()> {
        self.store.update::<Button, _>(hash, |current| match current {
            Some(mut button) => {
                if button.merge(sighting) {
                    debug!("[{}] Duplicate found {}, merging into {}", sighting.page_url, sighting.src, hash);
                    Ok(Some(button))
                } else {
                    Ok(None)
                }
            }
            None => match bytes {
                Some(bytes) => {
                    self.blobs.write(hash, bytes)?;
                    info!("[{}] Button found and saved: {}", sighting.page_url, sighting.src);
                    Ok(Some(Button::from_sighting(sighting, format, now_millis())))
                }
                None => Ok(None),
            },
        })?;
        Ok(())
    }
}
