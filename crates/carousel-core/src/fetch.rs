//! Network seam
//!
//! Everything that touches the network goes through [`Fetcher`], so the cache
//! and the resolver can be exercised against a fake origin.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};
use url::Url;

/// Network priority of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchPriority {
    High,
    #[default]
    Normal,
    /// Background work such as preloading; never competes with playback
    Low,
}

/// Outcome of a (possibly conditional) GET
#[derive(Debug, Clone)]
pub enum FetchResponse {
    Fresh {
        body: Bytes,
        etag: Option<String>,
        content_type: Option<String>,
        max_age: Option<Duration>,
    },
    /// The validator still matches
    NotModified { max_age: Option<Duration> },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`; with `etag` set the request is conditional
    async fn fetch(
        &self,
        url: &Url,
        etag: Option<&str>,
        priority: FetchPriority,
    ) -> Result<FetchResponse>;

    /// Lightweight existence probe. `Ok(false)` only for a definite "gone".
    async fn exists(&self, url: &Url) -> Result<bool>;
}

/// `Fetcher` over reqwest
pub struct HttpFetcher {
    client: Client,
    /// Serializes low-priority requests
    background: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            background: Arc::new(Semaphore::new(1)),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(
        &self,
        url: &Url,
        etag: Option<&str>,
        priority: FetchPriority,
    ) -> Result<FetchResponse> {
        let _permit = match priority {
            FetchPriority::Low => Some(
                self.background
                    .acquire()
                    .await
                    .map_err(|_| Error::Internal("background fetch semaphore closed".into()))?,
            ),
            _ => None,
        };

        let mut request = self.client.get(url.clone());
        if let Some(tag) = etag {
            request = request.header(header::IF_NONE_MATCH, tag);
        }

        let response = request.send().await.map_err(|e| map_transport(url, e))?;
        let status = response.status();
        let max_age = response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);

        if status == StatusCode::NOT_MODIFIED {
            debug!("Not modified");
            return Ok(FetchResponse::NotModified { max_age });
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let etag = header_string(&response, header::ETAG);
        let content_type = header_string(&response, header::CONTENT_TYPE);
        let body = response.bytes().await.map_err(|e| map_transport(url, e))?;

        debug!(bytes = body.len(), "Fetched");

        Ok(FetchResponse::Fresh {
            body,
            etag,
            content_type,
            max_age,
        })
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn exists(&self, url: &Url) -> Result<bool> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| map_transport(url, e))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            s => Err(Error::HttpStatus {
                url: url.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn map_transport(url: &Url, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout { url: url.to_string() }
    } else {
        Error::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// `max-age` directive of a Cache-Control header
pub fn parse_max_age(value: &str) -> Option<Duration> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|d| d.strip_prefix("max-age="))
        .and_then(|secs| secs.trim_matches('"').parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("public, max-age=600"), Some(Duration::from_secs(600)));
        assert_eq!(parse_max_age("max-age=\"30\", immutable"), Some(Duration::from_secs(30)));
        assert_eq!(parse_max_age("no-store"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }
}
