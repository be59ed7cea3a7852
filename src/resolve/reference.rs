// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ResolveError;

static EPISODE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)spotify\.com/episode/([a-z0-9]+)").expect("episode url pattern")
});

static SHOW_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)spotify\.com/show/([a-z0-9]+)").expect("show url pattern")
});

static SHOW_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"spotify:show:([A-Za-z0-9]+)").expect("show uri pattern"));

static SHOW_NAME_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""showName"\s*:\s*"([^"]+)""#).expect("show name pattern"));

/// Blob keys that may carry the episode id, in priority order
const EPISODE_ID_KEYS: [&str; 3] = ["id", "episode_id", "episodeId"];

/// The episode a run is about, fixed once per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeReference {
    raw_url: String,
    episode_id: String,
    title_hint: Option<String>,
}

impl EpisodeReference {
    pub fn new(
        raw_url: impl Into<String>,
        episode_id: impl Into<String>,
        title_hint: Option<String>,
    ) -> Self {
        Self {
            raw_url: raw_url.into(),
            episode_id: episode_id.into(),
            title_hint: title_hint
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }

    /// Build a reference from the caller's URL and whatever metadata was found
    ///
    /// The episode id comes from the metadata blob when present, otherwise
    /// from the `/episode/<id>` segment of the URL.
    pub fn from_url(
        raw_url: &str,
        blob: Option<&Value>,
        title_hint: Option<&str>,
    ) -> Result<Self, ResolveError> {
        let from_blob = blob.and_then(|blob| {
            EPISODE_ID_KEYS
                .iter()
                .filter_map(|key| blob.get(*key).and_then(Value::as_str))
                .find_map(normalize_episode_id)
        });

        let episode_id = from_blob
            .or_else(|| episode_id_from_url(raw_url))
            .ok_or_else(|| ResolveError::EpisodeIdUnknown {
                url: raw_url.to_string(),
            })?;

        Ok(Self::new(raw_url, episode_id, title_hint.map(String::from)))
    }

    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn title_hint(&self) -> Option<&str> {
        self.title_hint.as_deref()
    }
}

/// Extract the episode id from an episode page URL
pub fn episode_id_from_url(url: &str) -> Option<String> {
    EPISODE_URL
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Extract a show id from a show page URL
pub fn show_id_from_url(url: &str) -> Option<String> {
    SHOW_URL.captures(url).map(|caps| caps[1].to_string())
}

/// Find the first show reference (URI or show URL) anywhere in `text`
pub fn find_show_id(text: &str) -> Option<String> {
    SHOW_URI
        .captures(text)
        .or_else(|| SHOW_URL.captures(text))
        .map(|caps| caps[1].to_string())
}

/// Whether `text` mentions a show reference at all
pub fn mentions_show(text: &str) -> bool {
    text.contains("spotify:show:") || SHOW_URL.is_match(text)
}

/// Turn a key-path value into a bare show id
///
/// Accepts show URIs, show URLs, and bare alphanumeric ids.
pub fn normalize_show_id(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(id) = find_show_id(value) {
        return Some(id);
    }
    is_bare_id(value).then(|| value.to_string())
}

fn normalize_episode_id(value: &str) -> Option<String> {
    let value = value.trim();
    let id = value.rsplit(':').next().unwrap_or(value);
    if let Some(from_url) = episode_id_from_url(value) {
        return Some(from_url);
    }
    is_bare_id(id).then(|| id.to_string())
}

fn is_bare_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Scan a raw page body for an embedded `"showName":"..."` value
pub fn show_name_from_page(body: &str) -> Option<String> {
    SHOW_NAME_JSON
        .captures(body)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
}
