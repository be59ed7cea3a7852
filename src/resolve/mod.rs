// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Episode audio resolution: show lookup, feed lookup, entry matching, and
//! enclosure extraction.

mod locator;
mod matcher;
mod reference;
mod show;
pub mod tree;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::episode::{audio_extension, suggested_filename};
use crate::error::ResolveError;
use crate::feed::FeedEntry;
use crate::http::{HttpClient, Timeouts};
use crate::retry::RetryPolicy;

pub use locator::{SearchResult, locate_feed, normalize_text, pick_feed_url, primary_feed_url};
pub use matcher::{MatchMethod, MatchResult, MatchThresholds, match_episode};
pub use reference::{EpisodeReference, episode_id_from_url, show_id_from_url};
pub use show::{ShowIdSource, ShowIdentity, resolve_show};

/// Tunables for the resolution chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Primary feed address; `{show_id}` is substituted
    pub primary_feed_template: String,
    pub primary_timeouts: Timeouts,
    pub primary_retry: RetryPolicy,
    /// Show-search index queried by name when the primary feed fails
    pub search_endpoint: String,
    /// Number of search candidates considered
    pub search_limit: usize,
    pub fallback_timeouts: Timeouts,
    pub fallback_retry: RetryPolicy,
    /// Bounds for the single episode-page fetch
    pub page_timeouts: Timeouts,
    /// Recursion cap when searching metadata blobs
    pub max_tree_depth: usize,
    pub matcher: MatchThresholds,
    /// Extension used when neither the enclosure URL nor its type names one
    pub fallback_extension: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            primary_feed_template: "https://spotifeed.timdorr.com/show/{show_id}".to_string(),
            primary_timeouts: Timeouts::from_secs(5, 15),
            primary_retry: RetryPolicy::fixed(2, Duration::from_secs(1)),
            search_endpoint: "https://itunes.apple.com/search".to_string(),
            search_limit: 5,
            fallback_timeouts: Timeouts::from_secs(10, 30),
            fallback_retry: RetryPolicy::exponential(3),
            page_timeouts: Timeouts::from_secs(10, 10),
            max_tree_depth: tree::DEFAULT_MAX_DEPTH,
            matcher: MatchThresholds::default(),
            fallback_extension: "mp3".to_string(),
        }
    }
}

/// A playable audio URL for an episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAudio {
    pub audio_url: Url,
    /// Filesystem-safe name stem, without extension
    pub suggested_filename: String,
    /// Extension without the leading dot
    pub extension: String,
    pub episode_id: String,
    pub show_id: Option<String>,
    pub entry_title: String,
    pub method: MatchMethod,
    pub confidence: f64,
}

/// Resolve an episode reference to a playable audio URL
///
/// Errors identify the failing step: show lookup, feed fetch (and which
/// path), or match.
pub async fn resolve_audio<C: HttpClient + ?Sized>(
    client: &C,
    reference: &EpisodeReference,
    blob: Option<&Value>,
    options: &ResolverOptions,
) -> Result<ResolvedAudio, ResolveError> {
    let show = resolve_show(client, reference, blob, options).await?;
    let feed = locate_feed(client, &show, options).await?;

    let found = match_episode(&feed.entries, reference, &options.matcher).ok_or_else(|| {
        ResolveError::EpisodeNotInFeed {
            episode_id: reference.episode_id().to_string(),
            title: reference.title_hint().map(String::from),
            entries: feed.entries.len(),
        }
    })?;

    let (audio_url, mime_type) = enclosure_of(found.entry, &feed.feed_url)?;
    let extension = audio_extension(&audio_url, mime_type.as_deref(), &options.fallback_extension);
    let suggested = suggested_filename(&found.entry.title, reference.episode_id());

    info!(
        %audio_url,
        feed = %feed.feed_url,
        method = %found.method,
        confidence = found.confidence,
        "Resolved episode audio"
    );

    Ok(ResolvedAudio {
        audio_url,
        suggested_filename: suggested,
        extension,
        episode_id: reference.episode_id().to_string(),
        show_id: show.show_id,
        entry_title: found.entry.title.clone(),
        method: found.method,
        confidence: found.confidence,
    })
}

/// Pick the media URL of an entry: an `enclosure` link first, then the
/// enclosure element. Relative URLs are resolved against the feed URL.
fn enclosure_of(
    entry: &FeedEntry,
    feed_url: &Url,
) -> Result<(Url, Option<String>), ResolveError> {
    let (href, mime_type) = entry
        .links
        .iter()
        .find(|link| link.rel.as_deref() == Some("enclosure") && !link.href.is_empty())
        .map(|link| (link.href.as_str(), link.mime_type.clone()))
        .or_else(|| {
            entry
                .enclosure
                .as_ref()
                .filter(|enclosure| !enclosure.url.is_empty())
                .map(|enclosure| (enclosure.url.as_str(), enclosure.mime_type.clone()))
        })
        .ok_or_else(|| ResolveError::MissingEnclosure {
            title: entry.title.clone(),
        })?;

    let url = feed_url
        .join(href)
        .map_err(|_| ResolveError::MissingEnclosure {
            title: entry.title.clone(),
        })?;

    Ok((url, mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Enclosure, EntryLink};
    use crate::http::{HttpBody, HttpResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap;

    /// Serves canned bodies per URL; anything else is a 404
    struct RoutedClient {
        routes: HashMap<String, (u16, String)>,
    }

    impl RoutedClient {
        fn new(routes: &[(&str, u16, &str)]) -> Self {
            Self {
                routes: routes
                    .iter()
                    .map(|(url, status, body)| (url.to_string(), (*status, body.to_string())))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl HttpClient for RoutedClient {
        async fn get_bytes(&self, url: &str, _t: Timeouts) -> Result<HttpBody, reqwest::Error> {
            let (status, body) = self
                .routes
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(HttpBody {
                status,
                bytes: Bytes::from(body),
            })
        }

        async fn get_stream(
            &self,
            _url: &str,
            _t: Timeouts,
        ) -> Result<HttpResponse, reqwest::Error> {
            unimplemented!()
        }
    }

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Show</title><description>D</description><link>https://e.com</link>
<item><title>Something Else</title><guid>urn:spotify:E1:guid</guid><enclosure url="https://cdn.example.com/audio/e1.m4a?token=1" type="audio/mp4" length="1"/></item>
<item><title>Episode One</title><guid>other</guid><enclosure url="https://cdn.example.com/audio/one" type="" length="1"/></item>
<item><title>Silent Episode</title><guid>silent</guid></item>
</channel></rss>"#;

    fn options() -> ResolverOptions {
        ResolverOptions {
            primary_feed_template: "https://feeds.test/show/{show_id}".to_string(),
            ..ResolverOptions::default()
        }
    }

    #[tokio::test]
    async fn resolves_id_match_with_extension_from_path() {
        let client = RoutedClient::new(&[("https://feeds.test/show/SHOW1", 200, FEED)]);
        let blob = json!({ "show": { "uri": "spotify:show:SHOW1" } });
        let reference = EpisodeReference::new("https://open.spotify.com/episode/E1", "E1", None);

        let audio = resolve_audio(&client, &reference, Some(&blob), &options())
            .await
            .unwrap();

        assert_eq!(audio.audio_url.as_str(), "https://cdn.example.com/audio/e1.m4a?token=1");
        assert_eq!(audio.extension, "m4a");
        assert_eq!(audio.method, MatchMethod::IdMatch);
        assert_eq!(audio.suggested_filename, "Something-Else");
        assert_eq!(audio.show_id.as_deref(), Some("SHOW1"));
    }

    #[tokio::test]
    async fn title_match_defaults_extension() {
        let client = RoutedClient::new(&[("https://feeds.test/show/SHOW1", 200, FEED)]);
        let blob = json!({ "showId": "SHOW1" });
        let reference = EpisodeReference::new(
            "https://open.spotify.com/episode/ZZ",
            "ZZ",
            Some("Episode One".to_string()),
        );

        let audio = resolve_audio(&client, &reference, Some(&blob), &options())
            .await
            .unwrap();

        assert_eq!(audio.method, MatchMethod::ExactTitle);
        assert_eq!(audio.extension, "mp3");
    }

    #[tokio::test]
    async fn missing_enclosure_is_reported() {
        let client = RoutedClient::new(&[("https://feeds.test/show/SHOW1", 200, FEED)]);
        let blob = json!({ "showId": "SHOW1" });
        let reference = EpisodeReference::new(
            "https://open.spotify.com/episode/ZZ",
            "ZZ",
            Some("Silent Episode".to_string()),
        );

        let err = resolve_audio(&client, &reference, Some(&blob), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingEnclosure { .. }));
    }

    #[tokio::test]
    async fn episode_not_in_feed_is_distinct_from_show_not_found() {
        let client = RoutedClient::new(&[("https://feeds.test/show/SHOW1", 200, FEED)]);
        let blob = json!({ "showId": "SHOW1" });
        let reference = EpisodeReference::new(
            "https://open.spotify.com/episode/QQ",
            "QQ",
            Some("Totally unknown title".to_string()),
        );

        let err = resolve_audio(&client, &reference, Some(&blob), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::EpisodeNotInFeed { entries: 3, .. }));

        let reference = EpisodeReference::new("https://example.com/nowhere", "QQ", None);
        let err = resolve_audio(&client, &reference, None, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ShowNotFound { .. }));
    }

    #[test]
    fn enclosure_link_is_preferred_over_enclosure_element() {
        let entry = FeedEntry {
            title: "T".to_string(),
            links: vec![EntryLink {
                href: "/media/linked.ogg".to_string(),
                rel: Some("enclosure".to_string()),
                mime_type: Some("audio/ogg".to_string()),
            }],
            enclosure: Some(Enclosure {
                url: "https://cdn.example.com/element.mp3".to_string(),
                length: None,
                mime_type: None,
            }),
            ..Default::default()
        };
        let feed_url = Url::parse("https://feeds.example.com/show.xml").unwrap();

        let (url, mime) = enclosure_of(&entry, &feed_url).unwrap();
        assert_eq!(url.as_str(), "https://feeds.example.com/media/linked.ogg");
        assert_eq!(mime.as_deref(), Some("audio/ogg"));
    }
}
