//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Replace consecutive whitespace (spaces, tabs, newlines) with a single space
/// and trim leading/trailing whitespace.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Split an ESCO `altLabels` cell into individual labels.
///
/// ESCO CSV exports put one label per line inside a quoted cell; older
/// derived files join them with `|`. Both separators are accepted. Order is
/// preserved, blanks are dropped and each label is whitespace-normalized.
pub fn split_alt_labels(cell: &str) -> Vec<String> {
    cell.split(['\n', '|'])
        .map(normalize_whitespace)
        .filter(|label| !label.is_empty())
        .collect()
}

/// Treat an empty (after trimming) string as absent.
pub fn non_empty(s: &str) -> Option<String> {
    let normalized = normalize_whitespace(s);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Truncate `s` to at most `max_len` characters, appending `"..."` if
/// truncation occurred. Counts characters, not bytes.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let byte_offset = s
        .char_indices()
        .nth(max_len - 3)
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    format!("{}...", &s[..byte_offset])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_internal_runs() {
        assert_eq!(normalize_whitespace("  manage \t\n staff  "), "manage staff");
        assert_eq!(normalize_whitespace(""), "");
        assert_eq!(normalize_whitespace(" \n "), "");
    }

    #[test]
    fn alt_labels_split_on_newlines() {
        let labels = split_alt_labels("data analyst\nanalyst of data\n");
        assert_eq!(labels, vec!["data analyst", "analyst of data"]);
    }

    #[test]
    fn alt_labels_split_on_pipes_and_drop_blanks() {
        let labels = split_alt_labels("a| |b  c|");
        assert_eq!(labels, vec!["a", "b c"]);
    }

    #[test]
    fn alt_labels_empty_cell() {
        assert!(split_alt_labels("").is_empty());
    }

    #[test]
    fn non_empty_filters_whitespace_only() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" x "), Some("x".to_string()));
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate_with_ellipsis("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 2), "..");
        assert_eq!(truncate_with_ellipsis("abc", 0), "");
    }
}
