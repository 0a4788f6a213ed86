//! Tracked-hostname matching.
//!
//! The tracked list is stored as one comma-separated string. A pattern
//! matches a hostname when the two are equal or when the hostname sits under
//! the pattern as a subdomain (`news.example.com` matches `example.com`).
//! Matching is case-insensitive; patterns are lowercased at parse time.

/// Split the stored comma-separated pattern list. Fragments are trimmed and
/// lowercased; empty fragments from stray commas are dropped.
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// True when `hostname` equals `pattern` or is a subdomain of it.
/// `hostname` must already be lowercase.
pub fn matches(hostname: &str, pattern: &str) -> bool {
    hostname == pattern || hostname.ends_with(&format!(".{pattern}"))
}

/// True when `hostname` matches any pattern in the raw tracked list.
pub fn is_tracked(hostname: &str, raw_list: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    parse_patterns(raw_list)
        .iter()
        .any(|p| matches(&hostname, p))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
