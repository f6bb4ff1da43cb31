//! Input normalization for source messages.

use dropwatch_core::defaults::{MAX_MESSAGE_CHARS, MEDIA_PLACEHOLDER, TRUNCATION_MARKER};
use dropwatch_core::{normalize_timestamp, MessageTimestamp, SourceMessage};
use tracing::debug;

/// A message ready for prompt construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Cleaned text, truncated to the configured limit.
    pub text: String,
    pub channel: String,
    pub timestamp: MessageTimestamp,
    pub link: String,
    /// Whether the text was cut.
    pub truncated: bool,
}

/// Why a message was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or whitespace-only text.
    Empty,
    /// The media-only placeholder.
    MediaOnly,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Empty => "empty",
            SkipReason::MediaOnly => "media_only",
        }
    }
}

/// Outcome of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    Ready(Normalized),
    Skipped(SkipReason),
}

/// Clean, validate and truncate a source message.
pub fn normalize(message: &SourceMessage) -> Normalization {
    normalize_with_limit(message, MAX_MESSAGE_CHARS)
}

/// [`normalize`] with an explicit character limit.
pub fn normalize_with_limit(message: &SourceMessage, max_chars: usize) -> Normalization {
    let cleaned = strip_unencodable(&message.text);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return Normalization::Skipped(SkipReason::Empty);
    }
    if trimmed == MEDIA_PLACEHOLDER {
        return Normalization::Skipped(SkipReason::MediaOnly);
    }

    let (text, truncated) = truncate_chars(trimmed, max_chars);
    if truncated {
        debug!(
            subsystem = "pipeline",
            component = "normalizer",
            source_link = %message.link,
            max_chars,
            "Message text truncated"
        );
    }

    Normalization::Ready(Normalized {
        text,
        channel: message.channel.clone(),
        timestamp: normalize_timestamp(&message.timestamp),
        link: message.link.clone(),
        truncated,
    })
}

/// Drop characters the document store cannot encode.
///
/// Removes NUL, U+FFFD and C0 controls other than tab, newline and carriage return.
pub fn strip_unencodable(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if c == '\u{FFFD}' {
                return false;
            }
            !(c.is_ascii_control() && c != '\t' && c != '\n' && c != '\r' && c != '\u{7F}')
        })
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            (out, true)
        }
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> SourceMessage {
        SourceMessage::new(text, "alpha_calls", "2025-04-17T16:02:02Z", "https://t.me/c/1/2")
    }

    fn ready(n: Normalization) -> Normalized {
        match n {
            Normalization::Ready(n) => n,
            Normalization::Skipped(reason) => panic!("unexpected skip: {:?}", reason),
        }
    }

    #[test]
    fn test_empty_and_whitespace_are_skipped() {
        assert_eq!(normalize(&msg("")), Normalization::Skipped(SkipReason::Empty));
        assert_eq!(
            normalize(&msg("  \n\t ")),
            Normalization::Skipped(SkipReason::Empty)
        );
    }

    #[test]
    fn test_media_placeholder_is_skipped() {
        assert_eq!(
            normalize(&msg("[Media message]")),
            Normalization::Skipped(SkipReason::MediaOnly)
        );
        assert_eq!(
            normalize(&msg("  [Media message] \n")),
            Normalization::Skipped(SkipReason::MediaOnly)
        );
    }

    #[test]
    fn test_text_is_trimmed_and_fields_carried() {
        let n = ready(normalize(&msg("  Alpha testnet is live  ")));
        assert_eq!(n.text, "Alpha testnet is live");
        assert_eq!(n.channel, "alpha_calls");
        assert_eq!(n.link, "https://t.me/c/1/2");
        assert!(n.timestamp.as_utc().is_some());
        assert!(!n.truncated);
    }

    #[test]
    fn test_long_text_truncated_with_marker() {
        let long = "é".repeat(MAX_MESSAGE_CHARS + 10);
        let n = ready(normalize(&msg(&long)));
        assert!(n.truncated);
        assert!(n.text.ends_with(TRUNCATION_MARKER));
        let body: String = n.text.chars().take(MAX_MESSAGE_CHARS).collect();
        assert_eq!(body, "é".repeat(MAX_MESSAGE_CHARS));
        assert_eq!(
            n.text.chars().count(),
            MAX_MESSAGE_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn test_text_at_limit_not_truncated() {
        let exact = "a".repeat(MAX_MESSAGE_CHARS);
        let n = ready(normalize(&msg(&exact)));
        assert!(!n.truncated);
        assert_eq!(n.text, exact);
    }

    #[test]
    fn test_unencodable_characters_dropped() {
        let n = ready(normalize(&msg("Al\u{0}pha\u{FFFD} test\u{7}net\tnow\r\nlive")));
        assert_eq!(n.text, "Alpha testnet\tnow\r\nlive");
    }

    #[test]
    fn test_only_control_characters_is_empty() {
        assert_eq!(
            normalize(&msg("\u{0}\u{1}\u{FFFD}")),
            Normalization::Skipped(SkipReason::Empty)
        );
    }

    #[test]
    fn test_unparseable_timestamp_preserved() {
        let m = SourceMessage::new("hello", "c", "yesterday-ish", "https://t.me/c/1/3");
        let n = ready(normalize(&m));
        assert_eq!(n.timestamp.unparsed(), Some("yesterday-ish"));
    }

    #[test]
    fn test_custom_limit() {
        let n = ready(normalize_with_limit(&msg("abcdef"), 3));
        assert_eq!(n.text, format!("abc{}", TRUNCATION_MARKER));
    }
}
