// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};
use url::Url;

use crate::error::FeedError;

/// A parsed syndication feed
#[derive(Debug, Clone)]
pub struct Feed {
    pub title: String,
    pub feed_url: Url,
    /// Entries in document order
    pub entries: Vec<FeedEntry>,
}

/// A single entry (episode) of a feed
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: String,
    pub guid: Option<String>,
    pub link: Option<String>,
    /// Every link element of the entry, including alternates and enclosures
    pub links: Vec<EntryLink>,
    pub enclosure: Option<Enclosure>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<FixedOffset>>,
}

/// A link element with its relation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLink {
    pub href: String,
    pub rel: Option<String>,
    pub mime_type: Option<String>,
}

/// The media attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub length: Option<u64>,
    pub mime_type: Option<String>,
}

/// Parse RSS 2.0 or Atom bytes into a [`Feed`]
///
/// A document that parses but contains no entries is an error.
pub fn parse_feed(xml_bytes: &[u8], feed_url: Url) -> Result<Feed, FeedError> {
    let feed = match rss::Channel::read_from(xml_bytes) {
        Ok(channel) => from_rss(&channel, feed_url.clone()),
        Err(rss_err) => match atom_syndication::Feed::read_from(xml_bytes) {
            Ok(atom) => from_atom(&atom, feed_url.clone()),
            Err(atom_err) => {
                return Err(FeedError::ParseFailed {
                    url: feed_url.to_string(),
                    reason: format!("not RSS ({rss_err}) and not Atom ({atom_err})"),
                });
            }
        },
    };

    if feed.entries.is_empty() {
        return Err(FeedError::Empty {
            url: feed_url.to_string(),
        });
    }

    Ok(feed)
}

fn from_rss(channel: &rss::Channel, feed_url: Url) -> Feed {
    let entries = channel.items().iter().map(rss_entry).collect();

    Feed {
        title: decode(channel.title()),
        feed_url,
        entries,
    }
}

fn rss_entry(item: &rss::Item) -> FeedEntry {
    let enclosure = item.enclosure().map(|enclosure| Enclosure {
        url: enclosure.url().trim().to_string(),
        length: enclosure.length().parse().ok(),
        mime_type: Some(enclosure.mime_type().to_string()).filter(|s| !s.is_empty()),
    });

    let link = item.link().map(|l| l.trim().to_string());
    let mut links: Vec<EntryLink> = link
        .iter()
        .map(|href| EntryLink {
            href: href.clone(),
            rel: Some("alternate".to_string()),
            mime_type: None,
        })
        .collect();
    if let Some(enclosure) = &enclosure {
        links.push(EntryLink {
            href: enclosure.url.clone(),
            rel: Some("enclosure".to_string()),
            mime_type: enclosure.mime_type.clone(),
        });
    }

    let published_at = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str.trim())
            .ok()
            .or_else(|| parse_relaxed_date(date_str))
    });

    FeedEntry {
        title: item.title().map(decode).unwrap_or_default(),
        guid: item.guid().map(|g| g.value().trim().to_string()),
        link,
        links,
        enclosure,
        summary: item.description().map(decode),
        published_at,
    }
}

fn from_atom(feed: &atom_syndication::Feed, feed_url: Url) -> Feed {
    let entries = feed.entries().iter().map(atom_entry).collect();

    Feed {
        title: decode(&feed.title().value),
        feed_url,
        entries,
    }
}

fn atom_entry(entry: &atom_syndication::Entry) -> FeedEntry {
    let links: Vec<EntryLink> = entry
        .links()
        .iter()
        .map(|link| EntryLink {
            href: link.href().trim().to_string(),
            rel: Some(link.rel().to_string()),
            mime_type: link.mime_type().map(String::from),
        })
        .collect();

    let enclosure = entry
        .links()
        .iter()
        .find(|link| link.rel() == "enclosure")
        .map(|link| Enclosure {
            url: link.href().trim().to_string(),
            length: link.length().and_then(|l| l.parse().ok()),
            mime_type: link.mime_type().map(String::from),
        });

    let link = entry
        .links()
        .iter()
        .find(|link| link.rel() == "alternate")
        .map(|link| link.href().trim().to_string());

    FeedEntry {
        title: decode(&entry.title().value),
        guid: Some(entry.id().trim().to_string()).filter(|id| !id.is_empty()),
        link,
        links,
        enclosure,
        summary: entry.summary().map(|s| decode(&s.value)),
        published_at: entry.published().copied().or(Some(*entry.updated())),
    }
}

/// Feeds routinely carry HTML entities in titles (`&amp;`, `&#8217;`)
fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text.trim()).into_owned()
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str.trim(), format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast for unit testing</description>
    <link>https://example.com</link>
    <item>
      <title>Episode 1: Rock &amp; Roll</title>
      <description>First episode</description>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <guid>ep1-guid</guid>
      <link>https://example.com/episodes/1</link>
      <enclosure url="https://example.com/ep1.mp3" length="1234567" type="audio/mpeg"/>
    </item>
    <item>
      <title>No Audio</title>
    </item>
  </channel>
</rss>"#;

    const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Show</title>
  <id>urn:show</id>
  <updated>2024-01-02T10:00:00Z</updated>
  <entry>
    <title>Atom Episode</title>
    <id>urn:episode:42</id>
    <updated>2024-01-02T10:00:00Z</updated>
    <link rel="alternate" href="https://example.com/atom/42"/>
    <link rel="enclosure" href="https://cdn.example.com/42.m4a" type="audio/mp4" length="99"/>
  </entry>
</feed>"#;

    fn feed_url() -> Url {
        Url::parse("https://example.com/feed.xml").unwrap()
    }

    #[test]
    fn parse_rss_keeps_document_order_and_decodes_entities() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes(), feed_url()).unwrap();

        assert_eq!(feed.title, "Test Podcast");
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title, "Episode 1: Rock & Roll");
        assert_eq!(feed.entries[1].title, "No Audio");
    }

    #[test]
    fn parse_rss_extracts_entry_fields() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes(), feed_url()).unwrap();
        let entry = &feed.entries[0];

        assert_eq!(entry.guid.as_deref(), Some("ep1-guid"));
        assert_eq!(entry.link.as_deref(), Some("https://example.com/episodes/1"));
        assert!(entry.published_at.is_some());

        let enclosure = entry.enclosure.as_ref().unwrap();
        assert_eq!(enclosure.url, "https://example.com/ep1.mp3");
        assert_eq!(enclosure.length, Some(1234567));
        assert_eq!(enclosure.mime_type.as_deref(), Some("audio/mpeg"));
        assert!(
            entry
                .links
                .iter()
                .any(|l| l.rel.as_deref() == Some("enclosure"))
        );
    }

    #[test]
    fn parse_rss_keeps_entries_without_enclosure() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes(), feed_url()).unwrap();
        assert!(feed.entries[1].enclosure.is_none());
    }

    #[test]
    fn parse_atom_as_fallback() {
        let feed = parse_feed(SAMPLE_ATOM.as_bytes(), feed_url()).unwrap();

        assert_eq!(feed.title, "Atom Show");
        let entry = &feed.entries[0];
        assert_eq!(entry.guid.as_deref(), Some("urn:episode:42"));
        assert_eq!(entry.link.as_deref(), Some("https://example.com/atom/42"));
        assert_eq!(
            entry.enclosure.as_ref().map(|e| e.url.as_str()),
            Some("https://cdn.example.com/42.m4a")
        );
        assert_eq!(entry.links.len(), 2);
    }

    #[test]
    fn feed_without_entries_is_an_error() {
        let empty = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><description>D</description><link>https://e.com</link></channel></rss>"#;

        let err = parse_feed(empty.as_bytes(), feed_url()).unwrap_err();
        assert!(matches!(err, FeedError::Empty { .. }));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed(b"<html><body>not a feed</body></html>", feed_url()).unwrap_err();
        assert!(matches!(err, FeedError::ParseFailed { .. }));
    }

    #[test]
    fn relaxed_dates_are_accepted() {
        assert!(parse_relaxed_date("2024-01-15T08:30:00+01:00").is_some());
        assert!(parse_relaxed_date("yesterday").is_none());
    }
}
