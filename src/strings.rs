//! Printable string extraction
//!
//! Firmware images carry build banners, version strings and log format strings
//! which are the quickest way to tell what a dump actually contains.

use std::{collections::HashSet, sync::LazyLock};

use regex::{bytes::Regex as BytesRegex, Regex};

/// Shortest run of printable characters reported by [interesting_strings]
pub const DEFAULT_MIN_LEN: usize = 8;

/// Keywords which mark build and version banners in ESP-IDF and Arduino builds
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "esp-idf:",
    "arduino-lib-builder",
    "Latest Firmware:",
    "Compiled",
    "IDF_VER",
];

static MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\b").unwrap()
});
static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}:\d{2}:\d{2}\b").unwrap());
static PRINTABLE: LazyLock<BytesRegex> =
    LazyLock::new(|| BytesRegex::new(r"(?-u)[\x20-\x7E]+").unwrap());

/// A run of printable ASCII characters and where it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundString {
    pub offset: usize,
    pub text: String,
}

/// Every run of at least `min_len` printable ASCII characters (`0x20..=0x7E`).
pub fn printable_strings(data: &[u8], min_len: usize) -> Vec<FoundString> {
    PRINTABLE
        .find_iter(data)
        .filter(|found| found.len() >= min_len)
        .map(|found| FoundString {
            offset: found.start(),
            // The match only contains printable ASCII
            text: found.as_bytes().iter().map(|&b| b as char).collect(),
        })
        .collect()
}

/// Pick the strings most likely to identify a build.
///
/// Strings containing one of `keywords` come first, in the order they appear.
/// Any remaining room up to `limit` is filled with strings which look like
/// build dates or times.
pub fn interesting_strings(data: &[u8], keywords: &[String], limit: usize) -> Vec<String> {
    let found = printable_strings(data, DEFAULT_MIN_LEN);

    let mut selected = Vec::new();
    let mut seen = HashSet::new();

    for text in found.iter().map(|s| &s.text) {
        if selected.len() >= limit {
            return selected;
        }
        if keywords.iter().any(|k| text.contains(k.as_str())) && seen.insert(text.as_str()) {
            selected.push(text.clone());
        }
    }

    for text in found.iter().map(|s| &s.text) {
        if selected.len() >= limit {
            break;
        }
        if seen.contains(text.as_str()) {
            continue;
        }
        if MONTH.is_match(text) || TIMESTAMP.is_match(text) {
            seen.insert(text.as_str());
            selected.push(text.clone());
        }
    }

    selected
}

pub fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn finds_runs_of_printable_characters() {
        let data = b"\x00\x01hello world\xFFab\x00a longer string here\x7F";

        let found = printable_strings(data, 6);
        assert_eq!(
            found,
            vec![
                FoundString {
                    offset: 2,
                    text: "hello world".into()
                },
                FoundString {
                    offset: 17,
                    text: "a longer string here".into()
                },
            ]
        );
    }

    #[test]
    fn minimum_length_larger_than_any_run() {
        let data = [b'a'; 64];

        assert!(printable_strings(&data, 200_000).is_empty());
        assert!(printable_strings(&data, usize::MAX).is_empty());
        assert_eq!(printable_strings(&data, 64).len(), 1);
        assert_eq!(printable_strings(&data, 0)[0].text.len(), 64);
    }

    #[test]
    fn keyword_strings_come_first() {
        let data = b"\x00Built on Mar 14 2025\x00v5.1 esp-idf: v5.1.2\x00esp-idf: v5.1.2\x00\
                     v5.1 esp-idf: v5.1.2\x00plain old text\x00at 12:34:56 today\x00";

        let strings = interesting_strings(data, &default_keywords(), 12);
        assert_eq!(
            strings,
            vec![
                "v5.1 esp-idf: v5.1.2",
                "esp-idf: v5.1.2",
                "Built on Mar 14 2025",
                "at 12:34:56 today",
            ]
        );
    }

    #[test]
    fn respects_the_limit() {
        let data = b"\x00esp-idf: one\x00esp-idf: two\x00esp-idf: three\x00";

        assert_eq!(interesting_strings(data, &default_keywords(), 2).len(), 2);
        assert!(interesting_strings(data, &default_keywords(), 0).is_empty());
    }
}
