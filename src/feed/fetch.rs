// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::FeedError;
use crate::http::{HttpClient, Timeouts};

use super::parse::{Feed, parse_feed};

/// Fetch raw feed bytes from a URL (without parsing)
///
/// Non-2xx answers are reported as [`FeedError::HttpStatus`] so callers can
/// tell a missing feed from a flaky one.
pub async fn fetch_feed_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    timeouts: Timeouts,
) -> Result<Bytes, FeedError> {
    let body = client
        .get_bytes(url, timeouts)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !body.is_success() {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: body.status,
        });
    }

    Ok(body.bytes)
}

/// Fetch and parse a feed from a URL
pub async fn fetch_feed<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    timeouts: Timeouts,
) -> Result<Feed, FeedError> {
    let feed_url = Url::parse(url)?;
    debug!(%feed_url, "Fetching feed");
    let bytes = fetch_feed_bytes(client, url, timeouts).await?;
    let feed = parse_feed(&bytes, feed_url)?;
    debug!(title = %feed.title, entries = feed.entries.len(), "Parsed feed");
    Ok(feed)
}
