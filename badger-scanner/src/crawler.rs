use crate::context::CrawlContext;
use crate::error::{Result, ScanError};
use crate::links::normalize_str;
use crate::result::{CrawlSummary, FrontierItem};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Called with (depth, url) as each page task starts.
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Breadth-first frontier scheduler. One depth level at a time, every page of
/// the level fetched concurrently; the fetcher's gate bounds the actual
/// number of requests in flight.
pub struct Crawler {
    context: Arc<CrawlContext>,
    progress_callback: Option<ProgressCallback>,
}

impl Crawler {
    pub fn new(context: CrawlContext) -> Self {
        Self::from_shared(Arc::new(context))
    }

    pub fn from_shared(context: Arc<CrawlContext>) -> Self {
        Self {
            context,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn context(&self) -> &Arc<CrawlContext> {
        &self.context
    }

    /// Crawls from `seeds` until the frontier is empty or the depth limit
    /// is passed. All seeds share one visited set.
    pub async fn crawl(&self, seeds: &[String]) -> Result<CrawlSummary> {
        let max_depth = self.context.config.max_depth;
        let mut summary = CrawlSummary::default();

        let mut seen = HashSet::new();
        let mut pending: Vec<FrontierItem> = seeds
            .iter()
            .filter(|seed| match normalize_str(seed) {
                Some(normalized) => seen.insert(normalized),
                None => {
                    warn!("Skipping invalid seed URL '{}'", seed);
                    false
                }
            })
            .map(FrontierItem::seed)
            .collect();

        let mut depth = 0;
        while !pending.is_empty() && depth <= max_depth {
            info!("Crawling depth {} with {} URLs", depth, pending.len());

            let mut tasks = JoinSet::new();
            for mut item in pending.drain(..) {
                item.depth = depth;
                if let Some(ref callback) = self.progress_callback {
                    callback(depth, item.url.clone());
                }
                let context = self.context.clone();
                tasks.spawn(async move { context.fetch_page(item).await });
            }

            // Same-level guard; the visited set covers earlier levels
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            let mut fatal: Option<ScanError> = None;

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(Some(links))) => {
                        summary.pages_processed += 1;
                        for link in links {
                            let Some(normalized) = normalize_str(&link.url) else {
                                continue;
                            };
                            if self.context.visited.contains(&normalized) || !seen.insert(normalized) {
                                continue;
                            }
                            debug!("Queued {} for depth {}", link.url, depth + 1);
                            next.push(link);
                        }
                    }
                    Ok(Ok(None)) => summary.pages_dropped += 1,
                    Ok(Err(e)) => {
                        // let the rest of the level finish before giving up
                        error!("Fatal error during crawl: {}", e);
                        fatal.get_or_insert(e);
                    }
                    Err(e) => {
                        warn!("Page task failed: {}", e);
                        summary.pages_dropped += 1;
                    }
                }
            }

            if let Some(e) = fatal {
                self.context.flush()?;
                return Err(e);
            }

            summary.links_enqueued += next.len();
            summary.levels += 1;
            pending = next;
            depth += 1;
        }

        self.context.flush()?;
        summary.requests_sent = self.context.fetcher.requests_sent();
        info!(
            "Crawl complete. {} pages processed over {} levels",
            summary.pages_processed, summary.levels
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::content_hash;
    use badger_core::{Button, CrawlConfig, Host, ImageClass};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([shade, 100, 200, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn crawler(max_depth: usize, blob_dir: &TempDir) -> Crawler {
        let config = CrawlConfig {
            max_depth,
            max_concurrency: 4,
            ..CrawlConfig::default()
        };
        Crawler::new(CrawlContext::in_memory(config, blob_dir.path()).unwrap())
    }

    async fn mount_html(server: &MockServer, route: &str, html: String, hits: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(html.into_bytes()),
            )
            .expect(hits)
            .mount(server)
            .await;
    }

    async fn mount_image(server: &MockServer, route: &str, bytes: Vec<u8>, hits: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(bytes),
            )
            .expect(hits)
            .mount(server)
            .await;
    }

    fn host_of(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }

    /// A badge under a cross-host anchor is stored, filed under the linked
    /// host, and the link is followed.
    #[tokio::test]
    async fn test_badge_link_is_recorded_and_followed() {
        let site_a = MockServer::start().await;
        let site_b = MockServer::start().await;
        let badge = png(88, 31, 1);
        let hash = content_hash(&badge);

        mount_html(
            &site_a,
            "/page",
            format!(
                r#"<html><head><title>A</title></head><body>
                    <a href="{}/x"><img src="badge.png" alt="Cool"></a>
                </body></html>"#,
                site_b.uri()
            ),
            1,
        )
        .await;
        mount_image(&site_a, "/badge.png", badge, 1).await;
        mount_html(&site_b, "/x", "<html><body>B</body></html>".to_string(), 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(1, &blob_dir);
        let seed = format!("{}/page", site_a.uri());
        let summary = crawler.crawl(&[seed.clone()]).await.unwrap();

        assert_eq!(summary.pages_processed, 2);
        assert_eq!(summary.links_enqueued, 1);

        let context = crawler.context();
        let button: Button = context.store.get(&hash).unwrap().unwrap();
        assert_eq!(button.alts, vec!["Cool"]);
        assert_eq!(button.hrefs, vec![format!("{}/x", site_b.uri())]);
        assert_eq!(button.found_at, vec![seed]);
        assert_eq!(button.srcs, vec![format!("{}/badge.png", site_a.uri())]);
        assert_eq!(button.kind.as_deref(), Some("png"));
        assert!(context.blobs.contains(&hash));

        let host_b: Host = context.store.get(&host_of(&site_b)).unwrap().unwrap();
        assert_eq!(host_b.buttons, vec![hash.clone()]);
        assert!(host_b.urls.contains(&format!("{}/x", site_b.uri())));

        let host_a: Host = context.store.get(&host_of(&site_a)).unwrap().unwrap();
        assert!(host_a.buttons.is_empty());
        assert_eq!(host_a.metadata[0].title.as_deref(), Some("A"));
    }

    /// A badge seen on two pages is downloaded once and gains a second foundAt.
    #[tokio::test]
    async fn test_known_badge_is_not_downloaded_again() {
        let site = MockServer::start().await;
        let badge = png(88, 31, 2);
        let hash = content_hash(&badge);

        mount_html(
            &site,
            "/",
            r#"<img src="/badge.png"><a href="/p1">one</a>"#.to_string(),
            1,
        )
        .await;
        mount_html(&site, "/p1", r#"<img src="/badge.png" alt="Again">"#.to_string(), 1).await;
        mount_image(&site, "/badge.png", badge, 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(1, &blob_dir);
        crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        let button: Button = crawler.context().store.get(&hash).unwrap().unwrap();
        assert_eq!(
            button.found_at,
            vec![format!("{}/", site.uri()), format!("{}/p1", site.uri())]
        );
        assert_eq!(button.srcs.len(), 1);
        assert_eq!(button.alts, vec!["Again"]);
    }

    /// Identical bytes from two URLs collapse into one Button.
    #[tokio::test]
    async fn test_identical_bytes_merge_into_one_button() {
        let site = MockServer::start().await;
        let badge = png(88, 31, 3);
        let hash = content_hash(&badge);

        mount_html(
            &site,
            "/",
            r#"<img src="/one.png"><img src="/two.png"><img src="/one.png">"#.to_string(),
            1,
        )
        .await;
        mount_image(&site, "/one.png", badge.clone(), 1).await;
        mount_image(&site, "/two.png", badge, 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(0, &blob_dir);
        crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        let snapshot = crawler.context().store.all().unwrap();
        assert_eq!(snapshot.buttons.len(), 1);
        assert_eq!(
            snapshot.buttons[&hash].srcs,
            vec![format!("{}/one.png", site.uri()), format!("{}/two.png", site.uri())]
        );
        // no anchor, so the badge is filed under the page's own host
        assert_eq!(snapshot.hosts[&host_of(&site)].buttons, vec![hash]);
    }

    /// Wrong-size images are remembered as negatives and never refetched.
    #[tokio::test]
    async fn test_wrong_size_is_permanent_negative() {
        let site = MockServer::start().await;

        mount_html(
            &site,
            "/",
            r#"<img src="/big.png"><a href="/next"><img src="/big.png"></a>"#.to_string(),
            1,
        )
        .await;
        mount_html(&site, "/next", r#"<img src="/big.png">"#.to_string(), 1).await;
        mount_image(&site, "/big.png", png(100, 31, 4), 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(2, &blob_dir);
        crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        let context = crawler.context();
        assert_eq!(
            context.images.get(&format!("{}/big.png", site.uri())),
            ImageClass::NotBadge
        );
        assert!(context.store.all().unwrap().buttons.is_empty());
    }

    /// Cross-host links without a badge are not followed.
    #[tokio::test]
    async fn test_plain_cross_host_link_is_not_followed() {
        let site_a = MockServer::start().await;
        let site_b = MockServer::start().await;

        mount_html(
            &site_a,
            "/",
            format!(r#"<a href="{}/y">elsewhere</a><a href="/local">here</a>"#, site_b.uri()),
            1,
        )
        .await;
        mount_html(&site_a, "/local", "<p>local</p>".to_string(), 1).await;
        mount_html(&site_b, "/y", "<p>never</p>".to_string(), 0).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(2, &blob_dir);
        let summary = crawler.crawl(&[format!("{}/", site_a.uri())]).await.unwrap();
        assert_eq!(summary.pages_processed, 2);
    }

    /// Depth 0 fetches the seed only.
    #[tokio::test]
    async fn test_depth_zero_fetches_only_seed() {
        let site = MockServer::start().await;
        mount_html(&site, "/", r#"<a href="/next">next</a>"#.to_string(), 1).await;
        mount_html(&site, "/next", "<p>no</p>".to_string(), 0).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(0, &blob_dir);
        let summary = crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        assert_eq!(summary.pages_processed, 1);
        assert_eq!(summary.links_enqueued, 0);
        assert_eq!(summary.levels, 1);
    }

    /// Cycles and query variants do not cause refetches.
    #[tokio::test]
    async fn test_visited_pages_are_never_refetched() {
        let site = MockServer::start().await;
        mount_html(
            &site,
            "/",
            r#"<a href="/b">b</a><a href="/b?page=2">b again</a>"#.to_string(),
            1,
        )
        .await;
        mount_html(&site, "/b", r#"<a href="/">home</a><a href="/#top">top</a>"#.to_string(), 1)
            .await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(3, &blob_dir);
        crawler
            .crawl(&[format!("{}/", site.uri()), format!("{}/?ref=seed", site.uri())])
            .await
            .unwrap();

        assert_eq!(crawler.context().visited.len(), 2);
    }

    /// A failing page is dropped, marked visited, and the level carries on.
    #[tokio::test]
    async fn test_failed_page_does_not_stop_crawl() {
        let site = MockServer::start().await;
        mount_html(
            &site,
            "/",
            r#"<a href="/missing">gone</a><a href="/ok">ok</a>"#.to_string(),
            1,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&site)
            .await;
        mount_html(&site, "/ok", "<p>ok</p>".to_string(), 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(3, &blob_dir);
        let summary = crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        assert_eq!(summary.pages_processed, 2);
        assert_eq!(summary.pages_dropped, 1);
        assert!(
            crawler
                .context()
                .visited
                .contains(&format!("{}/missing", site.uri()))
        );
    }

    /// Breadcrumbs record how each page was reached.
    #[tokio::test]
    async fn test_paths_record_breadcrumbs() {
        let site = MockServer::start().await;
        mount_html(&site, "/", r#"<a href="/a">a</a>"#.to_string(), 1).await;
        mount_html(&site, "/a", r#"<a href="/a/b">b</a>"#.to_string(), 1).await;
        mount_html(&site, "/a/b", "<p>leaf</p>".to_string(), 1).await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(2, &blob_dir);
        crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        let host: Host = crawler.context().store.get(&host_of(&site)).unwrap().unwrap();
        let root = site.uri();
        assert!(host.paths.contains(&vec![
            format!("{}/", root),
            format!("{}/a", root),
            format!("{}/a/b", root),
        ]));
        assert_eq!(host.urls.len(), 3);
    }

    /// Pages of one level sharing a badge wait for a single download.
    #[tokio::test]
    async fn test_shared_badge_is_downloaded_once_per_level() {
        let site = MockServer::start().await;
        let badge = png(88, 31, 5);
        let hash = content_hash(&badge);

        mount_html(
            &site,
            "/",
            r#"<a href="/p1">1</a><a href="/p2">2</a><a href="/p3">3</a><a href="/p4">4</a>"#
                .to_string(),
            1,
        )
        .await;
        for page in ["/p1", "/p2", "/p3", "/p4"] {
            mount_html(&site, page, r#"<img src="/badge.png">"#.to_string(), 1).await;
        }
        Mock::given(method("GET"))
            .and(path("/badge.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(badge)
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&site)
            .await;

        let blob_dir = TempDir::new().unwrap();
        let crawler = crawler(1, &blob_dir);
        crawler.crawl(&[format!("{}/", site.uri())]).await.unwrap();

        let badge_gets = site
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/badge.png")
            .count();
        assert_eq!(badge_gets, 1);

        let button: Button = crawler.context().store.get(&hash).unwrap().unwrap();
        assert_eq!(button.found_at.len(), 4);
        assert_eq!(button.srcs, vec![format!("{}/badge.png", site.uri())]);
    }

    /// A blob write failure ends the crawl once the current level drains;
    /// the other pages of that level still complete.
    #[tokio::test]
    async fn test_durability_failure_aborts_crawl() {
        let site = MockServer::start().await;
        mount_html(
            &site,
            "/",
            r#"<a href="/p1">1</a><a href="/p2">2</a>"#.to_string(),
            1,
        )
        .await;
        mount_html(&site, "/p1", r#"<img src="/badge.png">"#.to_string(), 1).await;
        mount_image(&site, "/badge.png", png(88, 31, 6), 1).await;
        mount_html(&site, "/p2", r#"<a href="/p3">3</a>"#.to_string(), 1).await;
        mount_html(&site, "/p3", "<p>never</p>".to_string(), 0).await;

        let dir = TempDir::new().unwrap();
        let blob_dir = dir.path().join("buttons");
        let config = CrawlConfig {
            max_depth: 2,
            max_concurrency: 4,
            ..CrawlConfig::default()
        };
        let context = CrawlContext::in_memory(config, &blob_dir).unwrap();
        // a plain file where the blob directory should be
        std::fs::remove_dir(&blob_dir).unwrap();
        std::fs::write(&blob_dir, b"not a directory").unwrap();

        let crawler = Crawler::new(context);
        let err = crawler
            .crawl(&[format!("{}/", site.uri())])
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::StoreError(_)));
        assert!(err.is_fatal());
        let context = crawler.context();
        assert!(context.visited.contains(&format!("{}/p2", site.uri())));
        assert!(context.store.all().unwrap().buttons.is_empty());
    }
}
