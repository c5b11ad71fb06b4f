//! Turning entries into throttled, cached, retry-safe dblp requests.
//!
//! All network access of a run goes through one [`DblpRequester`]:
//!
//! 1. A URL already in the [`ResponseCache`] is answered from memory, with
//!    no throttling and no network call.
//! 2. Otherwise the [`ThrottleGate`] permit is awaited and the request sent.
//! 3. A 429 sleeps the server-provided `Retry-After` (reporting each second)
//!    and repeats from step 2 until any other status arrives.
//! 4. Any other status is cached and returned; non-success is logged.
//!
//! Transport failures (no response at all) are logged and not cached.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::ProgressEvent;
use crate::cache::{CacheError, CachedResponse, ResponseCache};
use crate::candidate::{Candidate, parse_search_response};
use crate::entry::{Entry, EntryError};
use crate::normalize::normalize;
use crate::rate_limit::{ThrottleGate, wait_with_countdown};
use crate::transport::Transport;

/// Every dblp record URL starts with this origin.
pub const DBLP_ORIGIN: &str = "https://dblp.org/";

/// Publication search endpoint.
pub const SEARCH_ENDPOINT: &str = "https://dblp.org/search/publ/api";

/// Default number of hits requested per query.
pub const DEFAULT_NUM_HITS: usize = 10;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error("candidate URL {0} is not on {DBLP_ORIGIN}")]
    ForeignUrl(String),
}

/// Counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestStats {
    /// Requests that reached the transport, retries included.
    pub network_calls: usize,
    pub cache_hits: usize,
    /// 429 responses honored.
    pub rate_limited: usize,
    pub transport_errors: usize,
}

/// Progress callback shared with the pipeline.
pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Search query URL for a title.
pub fn search_url(title: &str, num_hits: usize) -> String {
    format!(
        "{SEARCH_ENDPOINT}?q={}&format=json&h={num_hits}",
        urlencoding::encode(&normalize(title))
    )
}

pub struct DblpRequester {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    gate: ThrottleGate,
    stats: RequestStats,
    progress: Option<ProgressFn>,
}

impl DblpRequester {
    pub fn new(transport: Arc<dyn Transport>, cache: ResponseCache, min_interval: Duration) -> Self {
        Self {
            transport,
            cache,
            gate: ThrottleGate::new(min_interval),
            stats: RequestStats::default(),
            progress: None,
        }
    }

    /// Report rate-limit waits through `progress`.
    pub fn set_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Search dblp for `entry`'s title and return the hits in response
    /// order. The query URL is recorded on the entry.
    ///
    /// `Ok(None)` when the entry has no searchable title, the request did not succeed,
    /// the body could not be parsed, or there were no hits.
    pub async fn fetch_candidates(
        &mut self,
        entry: &mut Entry,
        num_hits: usize,
    ) -> Result<Option<Vec<Candidate>>, RequestError> {
        let Some(title) = entry.title() else {
            tracing::debug!(key = entry.key(), "entry has no title, nothing to query");
            return Ok(None);
        };
        if normalize(title).is_empty() {
            tracing::warn!(
                key = entry.key(),
                title,
                "title has no searchable letters, not querying"
            );
            return Ok(None);
        }
        let url = search_url(title, num_hits);
        entry.set_query_url(&url)?;

        let Some(response) = self.get(&url).await else {
            return Ok(None);
        };
        if !response.is_success() {
            return Ok(None);
        }
        match parse_search_response(&response.body) {
            Ok(candidates) if candidates.is_empty() => Ok(None),
            Ok(candidates) => {
                tracing::debug!(key = entry.key(), hits = candidates.len(), "dblp hits");
                Ok(Some(candidates))
            }
            Err(e) => {
                tracing::warn!(key = entry.key(), url = %url, error = %e, "unparseable dblp search response");
                Ok(None)
            }
        }
    }

    /// Fetch the BibTeX export of a dblp record (`<url>.bib`).
    ///
    /// Fails if `candidate_url` is not a dblp URL; `Ok(None)` if the request
    /// did not succeed.
    pub async fn fetch_canonical_record(
        &mut self,
        candidate_url: &str,
    ) -> Result<Option<String>, RequestError> {
        if !candidate_url.starts_with(DBLP_ORIGIN) {
            return Err(RequestError::ForeignUrl(candidate_url.to_string()));
        }
        let url = format!("{candidate_url}.bib");
        Ok(self
            .get(&url)
            .await
            .filter(CachedResponse::is_success)
            .map(|r| r.body))
    }

    /// Flush newly cached responses to disk.
    pub fn persist_cache(&mut self) -> Result<usize, CacheError> {
        self.cache.persist()
    }

    async fn get(&mut self, url: &str) -> Option<CachedResponse> {
        if let Some(cached) = self.cache.get(url) {
            self.stats.cache_hits += 1;
            tracing::debug!(url, status = cached.status, "cache hit");
            return Some(cached.clone());
        }

        let transport = Arc::clone(&self.transport);
        loop {
            self.gate.acquire().await;
            self.stats.network_calls += 1;
            tracing::debug!(url, "GET");

            let response = match transport.get(url).await {
                Ok(response) => response,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    tracing::warn!(url, error = %e, "request failed");
                    return None;
                }
            };

            if response.is_rate_limited() {
                self.stats.rate_limited += 1;
                let wait = response
                    .retry_after
                    .unwrap_or_else(|| self.gate.fallback_wait());
                tracing::info!(url, wait_secs = wait.as_secs_f64(), "rate limited by dblp, waiting");
                let progress = self.progress.clone();
                wait_with_countdown(wait, |remaining| {
                    if let Some(progress) = &progress {
                        progress(ProgressEvent::RateLimitWait {
                            remaining,
                            total: wait,
                        });
                    }
                })
                .await;
                continue;
            }

            if !response.is_success() {
                tracing::warn!(url, status = response.status, "dblp returned non-success status");
            }
            let cached = CachedResponse {
                status: response.status,
                body: response.body,
            };
            self.cache.insert(url, cached.clone());
            return Some(cached);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::bibtex::BibRecord;
    use crate::transport::mock::{MockResponse, MockTransport};

    const ONE_HIT: &str = r#"{"result": {"hits": {"hit": [{"info": {
        "authors": {"author": {"text": "Jane Doe"}},
        "title": "A Study of Things.",
        "type": "Journal Articles",
        "url": "https://dblp.org/rec/journals/x/Doe20"
    }}]}}}"#;

    fn entry(title: &str) -> Entry {
        Entry::from_record(
            BibRecord::new("doe2020", "article")
                .with_field("title", title)
                .with_field("author", "Doe, Jane"),
        )
        .unwrap()
    }

    fn requester(mock: &Arc<MockTransport>) -> DblpRequester {
        DblpRequester::new(mock.clone(), ResponseCache::in_memory(), Duration::ZERO)
    }

    #[test]
    fn search_url_uses_normalized_title() {
        assert_eq!(
            search_url("A Study of Things: Part-2", 10),
            "https://dblp.org/search/publ/api?q=a%20study%20of%20things%20part&format=json&h=10"
        );
    }

    #[tokio::test]
    async fn candidates_parsed_and_url_recorded() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = requester(&mock);
        let mut e = entry("A Study of Things");

        let hits = req.fetch_candidates(&mut e, 5).await.unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].authors, ["Jane Doe"]);
        assert_eq!(e.query_url(), Some(search_url("A Study of Things", 5).as_str()));
    }

    #[tokio::test]
    async fn identical_url_served_from_cache() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = requester(&mock);

        let mut first = entry("A Study of Things");
        let mut second = entry("A Study of Things");
        req.fetch_candidates(&mut first, 10).await.unwrap();
        req.fetch_candidates(&mut second, 10).await.unwrap();

        assert_eq!(mock.call_count(), 1);
        assert_eq!(req.stats().cache_hits, 1);
        assert_eq!(req.stats().network_calls, 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_throttle_gate() {
        let interval = Duration::from_millis(400);
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = DblpRequester::new(mock.clone(), ResponseCache::in_memory(), interval);

        req.fetch_candidates(&mut entry("A Study of Things"), 10)
            .await
            .unwrap();
        let start = std::time::Instant::now();
        req.fetch_candidates(&mut entry("A Study of Things"), 10)
            .await
            .unwrap();
        assert!(start.elapsed() < interval / 2, "cache hit waited {:?}", start.elapsed());
        assert_eq!(mock.call_count(), 1);

        // a new URL still goes through the gate
        let start = std::time::Instant::now();
        req.fetch_candidates(&mut entry("Another Study"), 10)
            .await
            .unwrap();
        assert!(start.elapsed() >= interval / 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn title_without_letters_is_not_queried() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = requester(&mock);
        let mut e = entry("2021: 42!");

        assert!(req.fetch_candidates(&mut e, 10).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 0);
        assert!(e.query_url().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success_waits_retry_after() {
        let mock = Arc::new(MockTransport::with_sequence(vec![
            MockResponse::rate_limited(7),
            MockResponse::ok(ONE_HIT),
        ]));
        let mut req = requester(&mock);
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        req.set_progress(Arc::new(move |event: ProgressEvent| {
            if let ProgressEvent::RateLimitWait { remaining, .. } = event {
                sink.lock().unwrap().push(remaining.as_secs());
            }
        }));

        let start = tokio::time::Instant::now();
        let hits = req
            .fetch_candidates(&mut entry("A Study of Things"), 10)
            .await
            .unwrap();

        assert!(hits.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(req.stats().rate_limited, 1);
        assert_eq!(*ticks.lock().unwrap(), [7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rate_limits_keep_retrying() {
        let mock = Arc::new(MockTransport::with_sequence(vec![
            MockResponse::rate_limited(2),
            MockResponse::rate_limited(3),
            MockResponse::RateLimited { retry_after: None },
            MockResponse::ok(ONE_HIT),
        ]));
        let mut req = requester(&mock);

        let start = tokio::time::Instant::now();
        req.fetch_candidates(&mut entry("A Study of Things"), 10)
            .await
            .unwrap();

        // 2 + 3 + one-second fallback (zero interval)
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn non_success_is_cached_and_yields_none() {
        let mock = Arc::new(MockTransport::new(MockResponse::status(500)));
        let mut req = requester(&mock);

        assert!(req.fetch_candidates(&mut entry("A"), 10).await.unwrap().is_none());
        assert!(req.fetch_candidates(&mut entry("A"), 10).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 1);
        assert_eq!(req.cache().len(), 1);
    }

    #[tokio::test]
    async fn transport_errors_not_cached() {
        let mock = Arc::new(MockTransport::new(MockResponse::Error("refused".into())));
        let mut req = requester(&mock);

        assert!(req.fetch_candidates(&mut entry("A"), 10).await.unwrap().is_none());
        assert!(req.fetch_candidates(&mut entry("A"), 10).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 2);
        assert!(req.cache().is_empty());
        assert_eq!(req.stats().transport_errors, 2);
    }

    #[tokio::test]
    async fn zero_hits_is_none() {
        let body = r#"{"result": {"hits": {"@total": "0"}}}"#;
        let mock = Arc::new(MockTransport::new(MockResponse::ok(body)));
        let mut req = requester(&mock);
        assert!(req.fetch_candidates(&mut entry("A"), 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entry_without_title_makes_no_request() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = requester(&mock);
        let mut e = Entry::from_record(BibRecord::new("k", "misc")).unwrap();
        assert!(req.fetch_candidates(&mut e, 10).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 0);
        assert!(e.query_url().is_none());
    }

    #[tokio::test]
    async fn conflicting_query_url_is_an_error() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok(ONE_HIT)));
        let mut req = requester(&mock);
        let mut e = entry("A Study of Things");
        req.fetch_candidates(&mut e, 10).await.unwrap();
        // same URL again is fine
        req.fetch_candidates(&mut e, 10).await.unwrap();

        let err = req.fetch_candidates(&mut e, 20).await.unwrap_err();
        assert!(matches!(
            err,
            RequestError::Entry(EntryError::QueryUrlConflict { .. })
        ));
    }

    #[tokio::test]
    async fn canonical_record_fetches_bib_suffix() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok("@article{k, title={T}}")));
        let mut req = requester(&mock);
        let body = req
            .fetch_canonical_record("https://dblp.org/rec/journals/x/Doe20")
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("@article{k, title={T}}"));
        assert_eq!(
            mock.requested_urls(),
            ["https://dblp.org/rec/journals/x/Doe20.bib"]
        );
    }

    #[tokio::test]
    async fn canonical_record_rejects_foreign_url() {
        let mock = Arc::new(MockTransport::new(MockResponse::ok("")));
        let mut req = requester(&mock);
        let err = req
            .fetch_canonical_record("https://example.org/rec/x")
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ForeignUrl(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn canonical_record_non_success_is_none() {
        let mock = Arc::new(MockTransport::new(MockResponse::status(404)));
        let mut req = requester(&mock);
        assert!(
            req.fetch_canonical_record("https://dblp.org/rec/x")
                .await
                .unwrap()
                .is_none()
        );
    }
}
