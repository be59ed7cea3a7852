// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

/// Maximum length for the title portion of a filename
const MAX_TITLE_LENGTH: usize = 100;

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ')
}

/// Filename stem (without extension) for an episode
///
/// The sanitized title, or `episode_<id>` when nothing of the title survives
/// sanitization.
pub fn suggested_filename(title: &str, episode_id: &str) -> String {
    let sanitized = sanitize_title(title);
    if sanitized.is_empty() {
        format!("episode_{}", sanitize_title(episode_id))
    } else {
        sanitized
    }
}

/// Audio file extension for an enclosure, without the leading dot
///
/// Taken from the URL path if it names a known audio type, then from the
/// MIME type, then `fallback`.
pub fn audio_extension(url: &Url, mime_type: Option<&str>, fallback: &str) -> String {
    if let Some(ext) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|filename| filename.contains('.'))
        .and_then(|filename| filename.rsplit('.').next())
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    if let Some(mime) = mime_type
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    fallback.to_string()
}

/// Sanitize a title for use in a filename using whitelist approach
fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '-' })
        .collect();

    let collapsed = collapse_separators(&sanitized);
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c == '.' || c.is_whitespace());

    if trimmed.len() > MAX_TITLE_LENGTH {
        truncate_at_boundary(trimmed, MAX_TITLE_LENGTH)
    } else {
        trimmed.to_string()
    }
}

/// Collapse runs of spaces and dashes into single dashes
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c == '-' || c.is_whitespace() {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c);
            last_was_separator = false;
        }
    }

    result
}

/// Truncate at a dash if one sits in the back half, else hard-cut
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind('-')
        && pos > max_len / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end_matches('-').to_string()
}

fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

fn mime_to_extension(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(url: &str, mime: Option<&str>) -> String {
        audio_extension(&Url::parse(url).unwrap(), mime, "mp3")
    }

    #[test]
    fn sanitize_replaces_special_chars_with_dash() {
        assert_eq!(sanitize_title("a:b/c\\d"), "a-b-c-d");
    }

    #[test]
    fn sanitize_handles_unicode_and_emoji() {
        assert_eq!(sanitize_title("Café résumé"), "Caf-r-sum");
        assert_eq!(sanitize_title("Hello 🎙️ World"), "Hello-World");
    }

    #[test]
    fn sanitize_collapses_and_trims_separators() {
        assert_eq!(sanitize_title("  --a - - - b--  "), "a-b");
        assert_eq!(sanitize_title("line1\nline2\ttab"), "line1-line2-tab");
    }

    #[test]
    fn sanitize_strips_leading_dots() {
        assert_eq!(sanitize_title("../../etc/passwd"), "etc-passwd");
    }

    #[test]
    fn truncate_cuts_at_word_boundary() {
        let result = truncate_at_boundary("word1-word2-word3-word4-word5", 20);
        assert!(result.len() <= 20);
        assert!(!result.ends_with('-'));
    }

    #[test]
    fn truncate_handles_no_boundaries() {
        let long = "a".repeat(150);
        assert_eq!(truncate_at_boundary(&long, 100).len(), 100);
    }

    #[test]
    fn suggested_filename_uses_title() {
        assert_eq!(
            suggested_filename("Episode: A \"Test\" <Episode>", "abc"),
            "Episode-A-Test-Episode"
        );
    }

    #[test]
    fn suggested_filename_falls_back_to_episode_id() {
        assert_eq!(suggested_filename("🎙️🎙️", "4rOoJ6Egrf8K2IrywzwOMk"), "episode_4rOoJ6Egrf8K2IrywzwOMk");
        assert_eq!(suggested_filename("", "abc"), "episode_abc");
    }

    #[test]
    fn extension_from_url_path_wins() {
        assert_eq!(ext("https://example.com/episode.m4a", Some("audio/mpeg")), "m4a");
        assert_eq!(ext("https://example.com/episode.MP3?token=abc", None), "mp3");
        assert_eq!(ext("https://example.com/episode.opus", None), "opus");
    }

    #[test]
    fn extension_falls_back_to_mime_type() {
        assert_eq!(ext("https://example.com/episode", Some("audio/mp4")), "m4a");
        assert_eq!(ext("https://example.com/episode", Some("audio/ogg; codecs=opus")), "ogg");
    }

    #[test]
    fn extension_ignores_non_audio_suffixes() {
        assert_eq!(ext("https://example.com/episode.html", None), "mp3");
        assert_eq!(ext("https://example.com/episode", Some("application/octet-stream")), "mp3");
    }

    #[test]
    fn extension_uses_supplied_fallback() {
        let url = Url::parse("https://example.com/stream").unwrap();
        assert_eq!(audio_extension(&url, None, "m4a"), "m4a");
    }

    #[test]
    fn valid_char_rejects_path_and_shell_chars() {
        for c in ['/', '\\', ':', '*', '?', '"', '<', '>', '|', 'é'] {
            assert!(!is_valid_filename_char(c), "{c} should be rejected");
        }
        for c in ['a', 'Z', '0', '-', '_', '.', ' '] {
            assert!(is_valid_filename_char(c), "{c} should be accepted");
        }
    }
}
