//! HTTP GET capability used by the request orchestrator.

pub mod http;
pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub use http::HttpTransport;

/// Status code dblp uses to ask callers to back off.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, if present and understood.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            body: String::new(),
            retry_after,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == TOO_MANY_REQUESTS
    }
}

/// The request never produced a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

/// Something that can perform an HTTP GET.
pub trait Transport: Send + Sync {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}
