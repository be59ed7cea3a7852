// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FeedError, FeedPath, ResolveError};
use crate::feed::{Feed, fetch_feed, fetch_feed_bytes};
use crate::http::HttpClient;
use crate::retry::with_retry;

use super::ResolverOptions;
use super::show::ShowIdentity;

/// One hit from the show-search index
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "collectionName", default)]
    pub name: Option<String>,
    #[serde(rename = "feedUrl", default)]
    pub feed_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Lowercase and keep only ASCII letters and digits
pub fn normalize_text(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Locate and parse the feed for a show
///
/// The templated primary address is tried first. A 404 skips its retries;
/// any primary failure moves on to the search index when a show name is
/// known. Without a show id only the search index is tried.
pub async fn locate_feed<C: HttpClient + ?Sized>(
    client: &C,
    show: &ShowIdentity,
    options: &ResolverOptions,
) -> Result<Feed, ResolveError> {
    let primary_error = match &show.show_id {
        Some(show_id) => match fetch_primary(client, show_id, options).await {
            Ok(feed) => return Ok(feed),
            Err(e) => Some(e),
        },
        None => None,
    };

    let Some(show_name) = &show.show_name else {
        let reason = match primary_error {
            Some(e) => format!("{e}; no show name known for the search fallback"),
            None => "no show id or show name known".to_string(),
        };
        return Err(ResolveError::FeedUnreachable {
            path: FeedPath::Primary,
            reason,
        });
    };

    match &primary_error {
        Some(e) if e.is_not_found() => {
            info!(show_name = %show_name, "Primary feed not found, trying search index");
        }
        Some(e) => {
            info!(error = %e, show_name = %show_name, "Primary feed failed, trying search index");
        }
        None => {}
    }

    match fetch_fallback(client, show_name, options).await {
        Ok(feed) => Ok(feed),
        Err(fallback_error) => Err(match primary_error {
            Some(primary_error) => ResolveError::FeedUnreachable {
                path: FeedPath::PrimaryThenFallback,
                reason: format!("primary: {primary_error}; fallback: {fallback_error}"),
            },
            None => ResolveError::FeedUnreachable {
                path: FeedPath::Fallback,
                reason: fallback_error.to_string(),
            },
        }),
    }
}

/// Build the primary feed address for a show id
pub fn primary_feed_url(template: &str, show_id: &str) -> String {
    template.replace("{show_id}", show_id)
}

async fn fetch_primary<C: HttpClient + ?Sized>(
    client: &C,
    show_id: &str,
    options: &ResolverOptions,
) -> Result<Feed, FeedError> {
    let url = primary_feed_url(&options.primary_feed_template, show_id);
    debug!(%url, "Fetching primary feed");

    with_retry(&options.primary_retry, || {
        fetch_feed(client, &url, options.primary_timeouts)
    })
    .await
}

async fn fetch_fallback<C: HttpClient + ?Sized>(
    client: &C,
    show_name: &str,
    options: &ResolverOptions,
) -> Result<Feed, FeedError> {
    let results = search_shows(client, show_name, options).await?;
    let feed_url = pick_feed_url(&results, show_name).ok_or_else(|| FeedError::ParseFailed {
        url: options.search_endpoint.clone(),
        reason: format!("no search result for '{show_name}' carries a feed address"),
    })?;

    info!(%feed_url, show_name, "Search index matched a feed");
    fetch_feed(client, &feed_url, options.fallback_timeouts).await
}

/// Query the show-search index and return at most `search_limit` results
pub async fn search_shows<C: HttpClient + ?Sized>(
    client: &C,
    show_name: &str,
    options: &ResolverOptions,
) -> Result<Vec<SearchResult>, FeedError> {
    let limit = options.search_limit.to_string();
    let url = Url::parse_with_params(
        &options.search_endpoint,
        [
            ("media", "podcast"),
            ("term", show_name),
            ("limit", limit.as_str()),
        ],
    )?;

    let bytes = with_retry(&options.fallback_retry, || {
        fetch_feed_bytes(client, url.as_str(), options.fallback_timeouts)
    })
    .await?;

    let response: SearchResponse =
        serde_json::from_slice(&bytes).map_err(|e| FeedError::ParseFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if response.results.is_empty() {
        warn!(show_name, "Search index returned no results");
    }

    Ok(response
        .results
        .into_iter()
        .take(options.search_limit)
        .collect())
}

/// Choose the candidate whose name best matches the known show name
///
/// A bidirectional substring match of the normalized names wins; otherwise
/// the first candidate with a feed address is used.
pub fn pick_feed_url(results: &[SearchResult], show_name: &str) -> Option<String> {
    let target = normalize_text(show_name);

    let with_feed = || {
        results
            .iter()
            .filter_map(|r| r.feed_url.as_deref().map(|feed| (r, feed)))
    };

    with_feed()
        .find(|(result, _)| {
            let candidate = normalize_text(result.name.as_deref().unwrap_or_default());
            !candidate.is_empty()
                && !target.is_empty()
                && (candidate.contains(&target) || target.contains(&candidate))
        })
        .or_else(|| with_feed().next())
        .map(|(_, feed)| feed.to_string())
}
