// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::http::HttpClient;

use super::ResolverOptions;
use super::reference::{
    EpisodeReference, find_show_id, mentions_show, normalize_show_id, show_id_from_url,
    show_name_from_page,
};
use super::tree::{find_string, lookup_str};

/// Nested key paths that may hold a show id or URI
const SHOW_ID_PATHS: [&[&str]; 12] = [
    &["show", "uri"],
    &["show", "id"],
    &["podcastShow", "uri"],
    &["podcastShow", "id"],
    &["linkedEntity", "uri"],
    &["showUri"],
    &["show_id"],
    &["showId"],
    &["podcastShowUri"],
    &["relatedEntityUri"],
    &["relatedEntityId"],
    &["parentShowUri"],
];

/// Key paths that may hold the show's display name
const SHOW_NAME_PATHS: [&[&str]; 5] = [
    &["showName"],
    &["show", "name"],
    &["podcastShow", "name"],
    &["linkedEntity", "name"],
    &["subtitle"],
];

/// Where the show id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowIdSource {
    KeyPath,
    BlobSearch,
    EpisodeUrl,
    EpisodePage,
}

/// The show an episode belongs to, as far as it could be determined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowIdentity {
    pub show_id: Option<String>,
    pub show_name: Option<String>,
    pub id_source: Option<ShowIdSource>,
}

impl ShowIdentity {
    pub fn is_empty(&self) -> bool {
        self.show_id.is_none() && self.show_name.is_none()
    }
}

/// Derive the show identity for an episode
///
/// The id is taken from the first of: known key paths in the metadata blob,
/// a bounded search of the whole blob, the episode URL, the episode page.
/// The page is fetched at most once and only if the id or the name is still
/// unknown; a failed page fetch is not an error by itself.
pub async fn resolve_show<C: HttpClient + ?Sized>(
    client: &C,
    reference: &EpisodeReference,
    blob: Option<&Value>,
    options: &ResolverOptions,
) -> Result<ShowIdentity, ResolveError> {
    let mut identity = ShowIdentity {
        show_name: blob.and_then(show_name_from_blob),
        ..Default::default()
    };

    if let Some(id) = blob.and_then(show_id_from_key_paths) {
        identity.show_id = Some(id);
        identity.id_source = Some(ShowIdSource::KeyPath);
    } else if let Some(id) = blob.and_then(|b| show_id_from_blob_search(b, options.max_tree_depth))
    {
        identity.show_id = Some(id);
        identity.id_source = Some(ShowIdSource::BlobSearch);
    } else if let Some(id) = show_id_from_url(reference.raw_url()) {
        identity.show_id = Some(id);
        identity.id_source = Some(ShowIdSource::EpisodeUrl);
    }

    if identity.show_id.is_none() || identity.show_name.is_none() {
        scan_episode_page(client, reference, options, &mut identity).await;
    }

    if identity.is_empty() {
        return Err(ResolveError::ShowNotFound {
            url: reference.raw_url().to_string(),
        });
    }

    debug!(
        show_id = identity.show_id.as_deref(),
        show_name = identity.show_name.as_deref(),
        source = ?identity.id_source,
        "Resolved show"
    );
    Ok(identity)
}

fn show_id_from_key_paths(blob: &Value) -> Option<String> {
    SHOW_ID_PATHS
        .iter()
        .filter_map(|path| lookup_str(blob, path))
        .find_map(normalize_show_id)
}

fn show_id_from_blob_search(blob: &Value, max_depth: usize) -> Option<String> {
    find_string(blob, max_depth, mentions_show).and_then(find_show_id)
}

fn show_name_from_blob(blob: &Value) -> Option<String> {
    SHOW_NAME_PATHS
        .iter()
        .filter_map(|path| lookup_str(blob, path))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(String::from)
}

async fn scan_episode_page<C: HttpClient + ?Sized>(
    client: &C,
    reference: &EpisodeReference,
    options: &ResolverOptions,
    identity: &mut ShowIdentity,
) {
    let body = match client
        .get_bytes(reference.raw_url(), options.page_timeouts)
        .await
    {
        Ok(body) if body.is_success() => body,
        Ok(body) => {
            warn!(status = body.status, url = reference.raw_url(), "Episode page unavailable");
            return;
        }
        Err(e) => {
            warn!(error = %e, url = reference.raw_url(), "Failed to fetch episode page");
            return;
        }
    };

    let text = String::from_utf8_lossy(&body.bytes);

    if identity.show_id.is_none()
        && let Some(id) = find_show_id(&text)
    {
        identity.show_id = Some(id);
        identity.id_source = Some(ShowIdSource::EpisodePage);
    }

    if identity.show_name.is_none() {
        identity.show_name = show_name_from_page(&text);
    }
}
