//! Scripted transport for tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{HttpResponse, Transport, TransportError};

/// One scripted outcome of [`MockTransport::get`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Ok { status: u16, body: String },
    /// 429 with an optional parsed `Retry-After`.
    RateLimited { retry_after: Option<Duration> },
    /// Connection-level failure.
    Error(String),
}

impl MockResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        MockResponse::Ok {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        MockResponse::Ok {
            status,
            body: String::new(),
        }
    }

    pub fn rate_limited(secs: u64) -> Self {
        MockResponse::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        }
    }
}

/// A hand-rolled [`Transport`] returning responses from a script.
///
/// Responses are either routed by URL (see [`route`](Self::route)) or taken
/// from a sequence, one per call, repeating the last when exhausted. Every
/// call is counted and its URL recorded.
pub struct MockTransport {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    routes: Mutex<Vec<(String, Vec<MockResponse>)>>,
    call_count: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Always return `response` unless a route matches.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            routes: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Return `responses` in order, repeating the last one.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        responses.reverse();
        let fallback = responses[0].clone();
        let mock = Self::new(fallback);
        *mock.responses.lock().unwrap() = responses;
        mock
    }

    /// Answer URLs containing `needle` with `responses` in order, repeating
    /// the last. Routes are checked in registration order.
    pub fn route(self, needle: impl Into<String>, mut responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty(), "route needs at least one response");
        responses.reverse();
        self.routes
            .lock()
            .unwrap()
            .push((needle.into(), responses));
        self
    }

    /// How many times `get()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// URLs requested so far, in call order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    fn next_response(&self, url: &str) -> MockResponse {
        let mut routes = self.routes.lock().unwrap();
        if let Some((_, seq)) = routes
            .iter_mut()
            .find(|(needle, _)| url.contains(needle.as_str()))
            && let Some(resp) = pop_or_repeat(seq)
        {
            return resp;
        }
        drop(routes);

        let mut seq = self.responses.lock().unwrap();
        pop_or_repeat(&mut seq).unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sequences are stored reversed; the last remaining response repeats.
fn pop_or_repeat(seq: &mut Vec<MockResponse>) -> Option<MockResponse> {
    match seq.len() {
        0 => None,
        1 => Some(seq[0].clone()),
        _ => seq.pop(),
    }
}

impl Transport for MockTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(url.to_string());
        let response = self.next_response(url);

        Box::pin(async move {
            match response {
                MockResponse::Ok { status, body } => Ok(HttpResponse::new(status, body)),
                MockResponse::RateLimited { retry_after } => {
                    Ok(HttpResponse::rate_limited(retry_after))
                }
                MockResponse::Error(message) => Err(TransportError {
                    url: url.to_string(),
                    message,
                }),
            }
        })
    }
}
