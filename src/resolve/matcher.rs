// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Picks the feed entry that corresponds to a platform episode.
//!
//! Feeds and the platform share no guaranteed key, so matching runs three
//! passes from most to least reliable and only moves on when a pass finds
//! nothing: identifiers, then titles, then a salvage scan.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feed::FeedEntry;

use super::locator::normalize_text;
use super::reference::{EpisodeReference, episode_id_from_url};

/// Empirically chosen acceptance thresholds
///
/// These are calibration points carried over from field use, not derived
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// A title match must score strictly above this
    pub min_title_score: f64,
    /// Word overlap needs at least this many shared words
    pub min_common_words: usize,
    /// ...covering strictly more than this share of the target's words
    pub min_word_coverage: f64,
    /// Salvage by title scans this many leading entries
    pub salvage_title_entries: usize,
    /// Salvage by title needs at least this overlap with the target's words
    pub salvage_title_overlap: f64,
    /// Salvage by raw id scans this many leading entries
    pub salvage_id_entries: usize,
    /// Confidence reported for a salvage-by-id hit
    pub salvage_id_confidence: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            min_title_score: 0.3,
            min_common_words: 3,
            min_word_coverage: 0.5,
            salvage_title_entries: 20,
            salvage_title_overlap: 0.5,
            salvage_id_entries: 50,
            salvage_id_confidence: 0.5,
        }
    }
}

/// How a match was found, from most to least reliable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    IdMatch,
    ExactTitle,
    FuzzyTitle,
    WordOverlap,
    SalvageTitle,
    SalvageId,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMethod::IdMatch => "id-match",
            MatchMethod::ExactTitle => "exact-title",
            MatchMethod::FuzzyTitle => "fuzzy-title",
            MatchMethod::WordOverlap => "word-overlap",
            MatchMethod::SalvageTitle => "salvage-title",
            MatchMethod::SalvageId => "salvage-id",
        })
    }
}

/// The selected entry with the matcher's confidence in it
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub entry: &'a FeedEntry,
    /// Position of the entry in the feed
    pub index: usize,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// Run all matching passes over `entries`
pub fn match_episode<'a>(
    entries: &'a [FeedEntry],
    reference: &EpisodeReference,
    thresholds: &MatchThresholds,
) -> Option<MatchResult<'a>> {
    let result = match_by_id(entries, reference.episode_id())
        .or_else(|| {
            reference
                .title_hint()
                .and_then(|title| match_by_title(entries, title, thresholds))
        })
        .or_else(|| salvage(entries, reference, thresholds));

    match &result {
        Some(found) => debug!(
            index = found.index,
            title = %found.entry.title,
            method = %found.method,
            confidence = found.confidence,
            "Matched feed entry"
        ),
        None => debug!(
            episode_id = reference.episode_id(),
            entries = entries.len(),
            "No feed entry matched"
        ),
    }

    result
}

/// Pass 1: the episode id appears in an entry's guid, link, or any link href
pub fn match_by_id<'a>(entries: &'a [FeedEntry], episode_id: &str) -> Option<MatchResult<'a>> {
    let target = episode_id.to_lowercase();
    if target.is_empty() {
        return None;
    }

    entries
        .iter()
        .enumerate()
        .find(|(_, entry)| {
            id_candidates(entry).any(|candidate| {
                let candidate = candidate.to_lowercase();
                candidate.contains(&target)
                    || episode_id_from_url(&candidate).is_some_and(|id| id == target)
            })
        })
        .map(|(index, entry)| MatchResult {
            entry,
            index,
            confidence: 1.0,
            method: MatchMethod::IdMatch,
        })
}

fn id_candidates(entry: &FeedEntry) -> impl Iterator<Item = &str> {
    entry
        .guid
        .as_deref()
        .into_iter()
        .chain(entry.link.as_deref())
        .chain(entry.links.iter().map(|link| link.href.as_str()))
}

/// Pass 2: exact, containment, or word-overlap title match
///
/// Exact normalized equality returns immediately. Otherwise the best score
/// wins, the earliest entry on ties, and only if it beats the floor.
pub fn match_by_title<'a>(
    entries: &'a [FeedEntry],
    title: &str,
    thresholds: &MatchThresholds,
) -> Option<MatchResult<'a>> {
    let target = normalize_text(title);
    if target.is_empty() {
        return None;
    }
    let target_words = word_set(title);

    let mut best: Option<MatchResult<'a>> = None;

    for (index, entry) in entries.iter().enumerate() {
        let normalized = normalize_text(&entry.title);
        if normalized.is_empty() {
            continue;
        }

        if normalized == target {
            return Some(MatchResult {
                entry,
                index,
                confidence: 1.0,
                method: MatchMethod::ExactTitle,
            });
        }

        let mut consider = |score: f64, method: MatchMethod| {
            if best.is_none_or(|b| score > b.confidence) {
                best = Some(MatchResult {
                    entry,
                    index,
                    confidence: score,
                    method,
                });
            }
        };

        if let Some(score) = containment_score(&target, &normalized) {
            consider(score, MatchMethod::FuzzyTitle);
        }

        if let Some(score) = word_overlap_score(&target_words, &word_set(&entry.title), thresholds)
        {
            consider(score, MatchMethod::WordOverlap);
        }
    }

    best.filter(|b| b.confidence > thresholds.min_title_score)
}

/// Title the metadata scraper falls back to when the page had none
const PLACEHOLDER_TITLE: &str = "Spotify Episode";

/// Pass 3: trade precision for recall once the other passes came up empty
///
/// Placeholder title hints never salvage by title; only the id scan runs.
pub fn salvage<'a>(
    entries: &'a [FeedEntry],
    reference: &EpisodeReference,
    thresholds: &MatchThresholds,
) -> Option<MatchResult<'a>> {
    let title_hint = reference
        .title_hint()
        .filter(|title| !title.contains(PLACEHOLDER_TITLE));

    let by_title = title_hint.and_then(|title| {
        let target_words = word_set(title);
        if target_words.is_empty() {
            return None;
        }

        entries
            .iter()
            .enumerate()
            .take(thresholds.salvage_title_entries)
            .find_map(|(index, entry)| {
                let common = target_words.intersection(&word_set(&entry.title)).count();
                let overlap = common as f64 / target_words.len() as f64;
                (overlap >= thresholds.salvage_title_overlap).then_some(MatchResult {
                    entry,
                    index,
                    confidence: overlap,
                    method: MatchMethod::SalvageTitle,
                })
            })
    });

    by_title.or_else(|| {
        let target = reference.episode_id().to_lowercase();
        if target.is_empty() {
            return None;
        }

        entries
            .iter()
            .enumerate()
            .take(thresholds.salvage_id_entries)
            .find(|(_, entry)| entry_text(entry).contains(&target))
            .map(|(index, entry)| MatchResult {
                entry,
                index,
                confidence: thresholds.salvage_id_confidence,
                method: MatchMethod::SalvageId,
            })
    })
}

/// `min(len)/max(len)` when one normalized title contains the other
fn containment_score(target: &str, candidate: &str) -> Option<f64> {
    if target.contains(candidate) || candidate.contains(target) {
        let shorter = target.len().min(candidate.len());
        let longer = target.len().max(candidate.len());
        Some(shorter as f64 / longer as f64)
    } else {
        None
    }
}

/// `|common| / max(|target|, |entry|)`, counted only for a substantial overlap
fn word_overlap_score(
    target: &HashSet<String>,
    candidate: &HashSet<String>,
    thresholds: &MatchThresholds,
) -> Option<f64> {
    if target.is_empty() {
        return None;
    }

    let common = target.intersection(candidate).count();
    let coverage = common as f64 / target.len() as f64;
    if common >= thresholds.min_common_words && coverage > thresholds.min_word_coverage {
        Some(common as f64 / target.len().max(candidate.len()) as f64)
    } else {
        None
    }
}

fn word_set(title: &str) -> HashSet<String> {
    title
        .split_whitespace()
        .map(normalize_text)
        .filter(|word| !word.is_empty())
        .collect()
}

fn entry_text(entry: &FeedEntry) -> String {
    [
        entry.guid.as_deref(),
        entry.link.as_deref(),
        Some(entry.title.as_str()),
        entry.summary.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}
