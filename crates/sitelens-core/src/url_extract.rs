//! Website address detection in free-form chat text

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Addresses that carry an explicit scheme
static RE_SCHEME_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"'`()\[\]{}|\\^]+"#).expect("invalid scheme url regex")
});

/// Bare domain-like tokens: labels, a dot, an alphabetic suffix, optional path
static RE_BARE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}(?:/[^\s<>"'`()\[\]{}|\\^]*)?"#)
        .expect("invalid bare domain regex")
});

/// Trailing-period abbreviations that look like domains once followed by a word
const ABBREVIATIONS: &[&str] = &["e.g.", "i.e.", "etc.", "vs.", "p.s.", "a.k.a.", "n.b."];

/// Suffixes that are file extensions rather than top-level domains
const FILE_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "gif", "svg", "webp", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "txt", "csv", "zip", "js", "css", "json", "exe", "mp3", "mp4",
];

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\'', '"'];

/// Pick the one website the user referred to, normalized to an absolute URL.
///
/// Only the first qualifying candidate is returned: a chat turn analyzes at
/// most one site.
pub fn extract_site_url(text: &str) -> Option<String> {
    candidate_urls(text)
        .iter()
        .find_map(|candidate| normalize_candidate(candidate))
}

/// All address-like tokens in `text`, scheme matches first, deduplicated and
/// with abbreviation artifacts removed.
pub fn candidate_urls(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut scheme_spans = Vec::new();

    for m in RE_SCHEME_URL.find_iter(text) {
        scheme_spans.push(m.range());
        push_unique(&mut candidates, trim_trailing(m.as_str()));
    }

    for m in RE_BARE_DOMAIN.find_iter(text) {
        if scheme_spans
            .iter()
            .any(|span| span.start <= m.start() && m.end() <= span.end)
        {
            continue;
        }
        // Either half of a mailbox address is not the user's site reference
        if text[..m.start()].ends_with('@') || text[m.end()..].starts_with('@') {
            continue;
        }
        let token = trim_trailing(m.as_str());
        if is_abbreviation_artifact(token) {
            continue;
        }
        push_unique(&mut candidates, token);
    }

    candidates
}

/// Prepend `https://` when the token has no scheme, validate it and return the
/// parsed form (lower-cased scheme and host, no trailing slash).
pub fn normalize_candidate(token: &str) -> Option<String> {
    let token = token.trim();
    let lower = token.to_ascii_lowercase();
    let absolute = if lower.starts_with("http://") || lower.starts_with("https://") {
        token.to_string()
    } else {
        format!("https://{token}")
    };

    let parsed = Url::parse(&absolute).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    if !host.contains('.') {
        return None;
    }

    Some(parsed.as_str().trim_end_matches('/').to_string())
}

fn push_unique(candidates: &mut Vec<String>, token: &str) {
    if !token.is_empty() && !candidates.iter().any(|c| c == token) {
        candidates.push(token.to_string());
    }
}

fn trim_trailing(token: &str) -> &str {
    token.trim_end_matches(TRAILING_PUNCTUATION)
}

fn is_abbreviation_artifact(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    if ABBREVIATIONS.iter().any(|abbr| lower.starts_with(abbr)) {
        return true;
    }

    let host = lower.split('/').next().unwrap_or_default();
    let suffix = host.rsplit('.').next().unwrap_or_default();
    suffix.len() < 2
        || !suffix.chars().all(|c| c.is_ascii_alphabetic())
        || FILE_EXTENSIONS.contains(&suffix)
}
