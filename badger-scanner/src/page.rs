use crate::context::CrawlContext;
use crate::error::{Result, ScanError};
use crate::html::parse_page;
use crate::links::{host_key, normalize, resolve};
use crate::relevance::is_likely_relevant;
use crate::result::FrontierItem;
use badger_core::Host;
use tracing::{debug, info, warn};
use url::Url;

fn push_candidate(candidates: &mut Vec<FrontierItem>, item: FrontierItem) {
    match candidates.iter_mut().find(|c| c.url == item.url) {
        Some(existing) => existing.found_button |= item.found_button,
        None => candidates.push(item),
    }
}

impl CrawlContext {
    /// Fetches and processes one frontier page.
    ///
    /// Returns the links worth crawling next, each one hop deeper, or `None`
    /// when the page was skipped or could not be fetched. `Err` is only
    /// returned for store and cache write failures.
    pub async fn fetch_page(&self, item: FrontierItem) -> Result<Option<Vec<FrontierItem>>> {
        let mut url = match Url::parse(&item.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Dropping unparsable URL {}: {}", item.url, e);
                return Ok(None);
            }
        };
        url.set_fragment(None);

        let normalized = normalize(&url);
        if item.depth > self.config.max_depth || self.visited.contains(&normalized) {
            return Ok(None);
        }

        let response = match self
            .fetcher
            .fetch_with_retry(url.as_str(), self.config.fetch_retries)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Error fetching {}: {}", url, e);
                self.visited.insert(&normalized)?;
                return Ok(None);
            }
        };
        self.visited.insert(&normalized)?;
        info!("Fetched {} (depth: {})", url, item.depth);

        // Redirects move the page; links resolve against where it ended up
        let page_url = Url::parse(&response.url).unwrap_or(url);
        if !response.is_html() {
            debug!("{} is not HTML, nothing to extract", page_url);
            return Ok(Some(Vec::new()));
        }

        let document = parse_page(&response.text());

        let mut path = item.path_history.clone();
        path.push(page_url.to_string());

        let Some(page_host) = host_key(&page_url) else {
            warn!("{}", ScanError::InvalidUrl(format!("{} has no host", page_url)));
            return Ok(None);
        };
        self.store.update::<Host, _>(&page_host, |current| {
            let mut host = current.unwrap_or_else(|| Host::new(page_host.clone()));
            let changed = host.record_page(page_url.as_str(), &path, document.metadata.clone());
            Ok(changed.then_some(host))
        })?;

        let mut candidates = Vec::new();
        let next_depth = item.depth + 1;
        let candidate = |url: String, found_button: bool| FrontierItem {
            url,
            path_history: path.clone(),
            depth: next_depth,
            found_button,
        };

        for anchor in &document.anchors {
            let href = anchor
                .href
                .as_deref()
                .and_then(|h| resolve(&page_url, h))
                .map(|h| h.to_string());

            let mut found_here = false;
            for img in &anchor.images {
                let outcome = self.process_image(img, &page_url, href.as_deref()).await?;
                found_here |= outcome.found_button;
                for link in outcome.links {
                    push_candidate(&mut candidates, candidate(link, true));
                }
            }

            if let Some(href) = href {
                if is_likely_relevant(&href, page_url.as_str(), found_here) {
                    push_candidate(&mut candidates, candidate(href, found_here));
                } else {
                    debug!("Skipping cross-host link {} from {}", href, page_url);
                }
            }
        }

        for img in &document.loose_images {
            self.process_image(img, &page_url, None).await?;
        }

        if item.depth >= self.config.max_depth {
            return Ok(Some(Vec::new()));
        }
        Ok(Some(candidates))
    }
}
