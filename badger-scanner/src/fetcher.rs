use crate::error::{Result, ScanError};
use badger_core::{CachedResponse, CrawlConfig, HttpCache};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A response as seen by the crawler. A 304 never reaches callers; it is
/// replaced by the cached response it refers to.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub from_cache: bool,
}

impl FetchedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Missing content types are given the benefit of the doubt.
    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.contains("html"))
            .unwrap_or(true)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP GET through one shared admission gate, with ETag revalidation.
pub struct Fetcher {
    client: Client,
    gate: Arc<Semaphore>,
    cache: Arc<HttpCache>,
    requests_sent: AtomicUsize,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig, cache: Arc<HttpCache>) -> Result<Self> {
        let timeout = config.request_timeout_secs.max(1);
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(timeout.div_ceil(2)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            gate: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            cache,
            requests_sent: AtomicUsize::new(0),
        })
    }

    /// Outbound requests issued so far, cached replays included.
    pub fn requests_sent(&self) -> usize {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
        let cached = self.cache.get(url)?;

        let mut request = self.client.get(url);
        if let Some(etag) = cached.as_ref().and_then(|c| c.etag.as_deref()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        // The permit covers the body download too, so the gate bounds open sockets
        let (final_url, status, headers, body) = {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ScanError::Other(format!("fetch gate closed: {}", e)))?;
            self.requests_sent.fetch_add(1, Ordering::Relaxed);

            let response = request.send().await?;
            let final_url = response.url().to_string();
            let status = response.status();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect();
            let body = response.bytes().await?.to_vec();
            (final_url, status, headers, body)
        };

        if status == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(hit) => {
                    debug!("{} not modified, serving cached body", url);
                    Ok(FetchedResponse {
                        url: final_url,
                        status: StatusCode::OK.as_u16(),
                        headers: hit.headers,
                        body: hit.body,
                        from_cache: true,
                    })
                }
                None => Err(ScanError::BadStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                }),
            };
        }

        if !status.is_success() {
            return Err(ScanError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let etag = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(ETAG.as_str()))
            .map(|(_, v)| v.clone());
        self.cache.put(
            url,
            CachedResponse {
                etag,
                headers: headers.clone(),
                body: body.clone(),
            },
        )?;

        Ok(FetchedResponse {
            url: final_url,
            status: status.as_u16(),
            headers,
            body,
            from_cache: false,
        })
    }

    /// `fetch`, re-attempted up to `retries` more times immediately after a
    /// transient transport failure.
    pub async fn fetch_with_retry(&self, url: &str, retries: u32) -> Result<FetchedResponse> {
        let mut attempt = 0;
        loop {
            match self.fetch(url).await {
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    warn!("Transient failure fetching {} ({}), retry {}/{}", url, e, attempt, retries);
                }
                result => return result,
            }
        }
    }
}
