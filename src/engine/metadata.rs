// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;

use super::{EpisodeInfo, MetadataProvider};

/// Serves caller-supplied metadata for every URL
///
/// Stands in for a page scraper: the CLI fills it from flags and an optional
/// JSON dump of the platform's episode metadata.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    info: EpisodeInfo,
}

impl StaticMetadataProvider {
    pub fn new(info: EpisodeInfo) -> Self {
        Self { info }
    }

    /// Load a raw platform metadata blob from a JSON file
    ///
    /// Top-level `name`/`title`, `description` and `release_date` fields are
    /// lifted into the episode info; the whole document is kept as the raw
    /// blob.
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::MetadataFailed(format!("cannot read {}: {e}", path.display()))
        })?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::MetadataFailed(format!("invalid JSON in {}: {e}", path.display()))
        })?;
        Ok(Self::new(info_from_blob(raw)))
    }

    /// Override the title hint
    pub fn with_title(mut self, title: Option<String>) -> Self {
        if title.is_some() {
            self.info.title = title;
        }
        self
    }
}

fn info_from_blob(raw: Value) -> EpisodeInfo {
    let text = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(String::from)
    };

    EpisodeInfo {
        title: text(&["name", "title"]),
        subtitle: text(&["subtitle"]),
        description: text(&["description"]),
        cover_image_url: text(&["cover_image_url", "image"]),
        release_date: text(&["release_date", "releaseDate"]),
        raw: Some(raw.clone()),
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn resolve(&self, _episode_url: &str) -> Result<EpisodeInfo, EngineError> {
        Ok(self.info.clone())
    }
}
