use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{HttpResponse, Transport, TransportError};
use crate::rate_limit::parse_retry_after;

/// [`Transport`] backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError {
                url: String::new(),
                message: format!("building HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let failed = |e: reqwest::Error| TransportError {
                url: url.to_string(),
                message: e.to_string(),
            };

            let resp = self.client.get(url).send().await.map_err(failed)?;
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.map_err(failed)?;

            Ok(HttpResponse {
                status,
                body,
                retry_after,
            })
        })
    }
}
