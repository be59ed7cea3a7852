// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Browser-like user agent; several platform pages refuse obvious bots
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120.0.0.0 Safari/537.36";

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Connect and read bounds for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeouts {
    /// Maximum time to establish the connection
    #[serde(with = "crate::config::secs")]
    pub connect: Duration,
    /// Maximum time to wait for any single read
    #[serde(with = "crate::config::secs")]
    pub read: Duration,
}

impl Timeouts {
    pub const fn from_secs(connect: u64, read: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect),
            read: Duration::from_secs(read),
        }
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct HttpBody {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub bytes: Bytes,
}

impl HttpBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP response with status, content length, and body stream
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Length header value, if present
    pub content_length: Option<u64>,
    /// Response body as a stream of bytes
    pub body: ByteStream,
}

/// HTTP client abstraction for testability
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch the entire response body as bytes
    async fn get_bytes(&self, url: &str, timeouts: Timeouts) -> Result<HttpBody, reqwest::Error>;

    /// Get a streaming response for large downloads
    async fn get_stream(&self, url: &str, timeouts: Timeouts)
    -> Result<HttpResponse, reqwest::Error>;
}

/// Default HTTP client implementation using reqwest
///
/// reqwest only takes connect and read timeouts at client construction, so
/// one client is kept per distinct [`Timeouts`] value.
#[derive(Clone, Default)]
pub struct ReqwestClient {
    clients: Arc<Mutex<HashMap<Timeouts, reqwest::Client>>>,
}

impl ReqwestClient {
    /// Create a new ReqwestClient with default settings
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, timeouts: Timeouts) -> Result<reqwest::Client, reqwest::Error> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&timeouts) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()?;
        clients.insert(timeouts, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_bytes(&self, url: &str, timeouts: Timeouts) -> Result<HttpBody, reqwest::Error> {
        let response = self.client_for(timeouts)?.get(url).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok(HttpBody { status, bytes })
    }

    async fn get_stream(
        &self,
        url: &str,
        timeouts: Timeouts,
    ) -> Result<HttpResponse, reqwest::Error> {
        let response = self.client_for(timeouts)?.get(url).send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();

        let body: ByteStream = Box::pin(response.bytes_stream());

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }
}
