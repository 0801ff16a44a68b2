//! Marketing signal extraction from HTML or rendered markdown.
//!
//! Every field is pulled out by its own pattern pass. A field that does not
//! match degrades to "absent" without affecting the others, so a page with
//! broken head markup still yields headings and copy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::parser::{
    collapse_whitespace, decode_entities, extract_json_ld_blocks, inner_text, json_ld_types,
    sanitize_html, truncate_chars,
};
use crate::types::{FetchedPage, PageFormat};

pub const MAX_H1: usize = 3;
pub const MAX_H2: usize = 5;
pub const MIN_HEADING_CHARS: usize = 4;
pub const MAX_HEADING_CHARS: usize = 150;
pub const MAX_SCHEMA_TYPES: usize = 5;

/// Excerpt budget when working from raw HTML
pub const HTML_EXCERPT_CHARS: usize = 1500;
/// Excerpt budget when working from rendered markdown
pub const MARKDOWN_EXCERPT_CHARS: usize = 2000;
pub const MAX_PROSE_LINES: usize = 15;
pub const MIN_PROSE_LINE_CHARS: usize = 40;

/// Bounded summary of a page's marketing-relevant attributes.
///
/// `None` means the page did not have the element; `Some("")` means the
/// element exists but is blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalRecord {
    pub source: PageFormat,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub has_tracking: bool,
    pub has_structured_data: bool,
    pub structured_data_types: Vec<String>,
    pub has_canonical: bool,
    pub has_sitemap_reference: bool,
    pub robots_directive: Option<String>,
    pub body_excerpt: Option<String>,
}

impl SignalRecord {
    /// Whether head-level markup (meta tags, scripts, link tags) was visible
    /// to the extractor. Rendered markdown drops it.
    pub fn observes_markup(&self) -> bool {
        self.source == PageFormat::Html
    }

    /// Names of fields that came back absent
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.meta_description.is_none() {
            missing.push("meta_description");
        }
        if self.h1.is_empty() {
            missing.push("h1");
        }
        if self.h2.is_empty() {
            missing.push("h2");
        }
        if self.robots_directive.is_none() {
            missing.push("robots_directive");
        }
        if self.body_excerpt.is_none() {
            missing.push("body_excerpt");
        }
        missing
    }
}

/// Extract the signal record for a fetched page
pub fn extract_signals(page: &FetchedPage) -> SignalRecord {
    extract_signals_from(&page.content, page.format)
}

/// Extract the signal record from raw content of a known format
pub fn extract_signals_from(content: &str, format: PageFormat) -> SignalRecord {
    match format {
        PageFormat::Html => extract_from_html(content),
        PageFormat::Markdown => extract_from_markdown(content),
    }
}

fn extract_from_html(html: &str) -> SignalRecord {
    let json_ld = extract_json_ld_blocks(html).unwrap_or_default();
    let mut schema_types = json_ld_types(&json_ld, MAX_SCHEMA_TYPES);
    for name in microdata_types(html) {
        if schema_types.len() < MAX_SCHEMA_TYPES && !schema_types.contains(&name) {
            schema_types.push(name);
        }
    }

    SignalRecord {
        source: PageFormat::Html,
        title: html_title(html),
        meta_description: meta_content(html, "description"),
        h1: html_headings(html, &RE_H1, MAX_H1),
        h2: html_headings(html, &RE_H2, MAX_H2),
        has_tracking: has_tracking(html),
        has_structured_data: !json_ld.is_empty() || RE_MICRODATA.is_match(html),
        structured_data_types: schema_types,
        has_canonical: has_canonical(html),
        has_sitemap_reference: has_sitemap_reference(html),
        robots_directive: meta_content(html, "robots").map(|c| collapse_whitespace(&c)),
        body_excerpt: html_excerpt(html),
    }
}

fn extract_from_markdown(markdown: &str) -> SignalRecord {
    let headings = markdown_headings(markdown);
    let title = header_field(markdown, "Title").or_else(|| headings.h1_all.first().cloned());

    SignalRecord {
        source: PageFormat::Markdown,
        title,
        meta_description: header_field(markdown, "Description"),
        h1: bounded_headings(headings.h1_all, MAX_H1),
        h2: bounded_headings(headings.h2_all, MAX_H2),
        has_tracking: false,
        has_structured_data: false,
        structured_data_types: Vec::new(),
        has_canonical: false,
        has_sitemap_reference: has_sitemap_reference(markdown),
        robots_directive: None,
        body_excerpt: markdown_excerpt(markdown),
    }
}

// ---------------------------------------------------------------------------
// HTML field extractors
// ---------------------------------------------------------------------------

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("invalid title regex"));
static RE_H1: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1\s*>").expect("invalid h1 regex"));
static RE_H2: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h2\b[^>]*>(.*?)</h2\s*>").expect("invalid h2 regex"));

/// Whole `<meta>` / `<link>` tags, tolerating `>` inside quoted values
static RE_META_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("invalid meta regex")
});
static RE_LINK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("invalid link regex")
});
static RE_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("invalid attribute regex")
});

static RE_MICRODATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)itemtype\s*=\s*["']?https?://(?:www\.)?schema\.org/([A-Za-z]+)"#)
        .expect("invalid microdata regex")
});

static RE_GTM_CONTAINER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bGTM-[A-Z0-9]{4,9}\b").expect("invalid gtm regex"));
static RE_GTAG_CONFIG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"gtag\(\s*['"]config['"]\s*,\s*['"](?:G|UA|AW|DC)-[A-Z0-9-]+"#)
        .expect("invalid gtag regex")
});

/// Lower-cased snippet identifiers of common analytics and ad pixels
const TRACKING_MARKERS: &[&str] = &[
    "googletagmanager.com",
    "google-analytics.com",
    "gtag(",
    "ga('create'",
    "fbq(",
    "connect.facebook.net",
    "_linkedin_partner_id",
    "snap.licdn.com",
    "static.hotjar.com",
    "clarity.ms",
    "analytics.tiktok.com",
    "plausible.io/js",
    "cdn.segment.com",
];

static RE_SITEMAP_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)sitemap[a-z0-9_-]*\.xml|rel\s*=\s*["']?sitemap"#)
        .expect("invalid sitemap regex")
});

fn html_title(html: &str) -> Option<String> {
    RE_TITLE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| inner_text(m.as_str()))
        .or_else(|| meta_content(html, "og:title"))
}

/// Attributes of a single tag as lower-cased name / raw value pairs
fn tag_attributes(tag: &str) -> Vec<(String, String)> {
    RE_ATTRIBUTE
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

/// `content` of the first `<meta name=… >` (or `property=…`) matching `key`,
/// whatever order the attributes appear in
fn meta_content(html: &str, key: &str) -> Option<String> {
    RE_META_TAG.find_iter(html).find_map(|tag| {
        let attrs = tag_attributes(tag.as_str());
        let matches_key = attrs.iter().any(|(name, value)| {
            (name == "name" || name == "property") && value.trim().eq_ignore_ascii_case(key)
        });
        if !matches_key {
            return None;
        }
        attrs
            .into_iter()
            .find(|(name, _)| name == "content")
            .map(|(_, value)| collapse_whitespace(&decode_entities(&value)))
    })
}

fn html_headings(html: &str, pattern: &Regex, cap: usize) -> Vec<String> {
    let all = pattern
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| inner_text(m.as_str()))
        .collect();
    bounded_headings(all, cap)
}

/// Trim, dedupe, drop implausible lengths and cap, preserving document order
fn bounded_headings(candidates: Vec<String>, cap: usize) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for heading in candidates {
        let heading = heading.trim().to_string();
        let len = heading.chars().count();
        if !(MIN_HEADING_CHARS..=MAX_HEADING_CHARS).contains(&len) {
            continue;
        }
        if kept.contains(&heading) {
            continue;
        }
        kept.push(heading);
        if kept.len() == cap {
            break;
        }
    }
    kept
}

fn has_tracking(html: &str) -> bool {
    if RE_GTM_CONTAINER.is_match(html) || RE_GTAG_CONFIG.is_match(html) {
        return true;
    }
    let lower = html.to_ascii_lowercase();
    TRACKING_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn microdata_types(html: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for caps in RE_MICRODATA.captures_iter(html) {
        if let Some(name) = caps.get(1) {
            let name = name.as_str().to_string();
            if !types.contains(&name) {
                types.push(name);
            }
        }
    }
    types
}

fn has_canonical(html: &str) -> bool {
    RE_LINK_TAG.find_iter(html).any(|tag| {
        tag_attributes(tag.as_str()).iter().any(|(name, value)| {
            name == "rel"
                && value
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("canonical"))
        })
    })
}

fn has_sitemap_reference(content: &str) -> bool {
    RE_SITEMAP_REF.is_match(content)
}

fn html_excerpt(html: &str) -> Option<String> {
    let text = inner_text(&sanitize_html(html));
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(&text, HTML_EXCERPT_CHARS))
    }
}

// ---------------------------------------------------------------------------
// Markdown field extractors
// ---------------------------------------------------------------------------

static RE_MD_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("invalid md image regex"));
static RE_MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("invalid md link regex"));
static RE_MD_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*|__|`").expect("invalid md emphasis regex"));
static RE_MD_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[*+-]|\d+[.)])\s+").expect("invalid md bullet regex"));

/// Header lines a rendering proxy puts ahead of the page body
const PROXY_HEADER_FIELDS: &[&str] = &[
    "Title:",
    "URL Source:",
    "Description:",
    "Published Time:",
    "Markdown Content:",
    "Warning:",
];

/// `Title: …` style header line from the rendering proxy preamble.
///
/// Only the leading block of proxy header lines is searched; it ends at
/// `Markdown Content:` or at the first line that is not a header, so page
/// copy that happens to start with `Description:` is never read as metadata.
fn header_field(markdown: &str, field: &str) -> Option<String> {
    let prefix = format!("{field}:");
    for line in markdown.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("Markdown Content:") || !is_proxy_header(line) {
            return None;
        }
        if let Some(value) = line.strip_prefix(prefix.as_str()) {
            return Some(collapse_whitespace(value));
        }
    }
    None
}

#[derive(Default)]
struct MarkdownHeadings {
    h1_all: Vec<String>,
    h2_all: Vec<String>,
}

/// ATX (`# x`, `## x`) and setext (`x` over `===` / `---`) headings
fn markdown_headings(markdown: &str) -> MarkdownHeadings {
    let mut headings = MarkdownHeadings::default();
    let lines: Vec<&str> = markdown.lines().map(str::trim_end).collect();

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim_start();

        if let Some(rest) = line.strip_prefix("## ") {
            headings.h2_all.push(clean_markdown_inline(rest.trim_end_matches('#')));
            continue;
        }
        if let Some(rest) = line.strip_prefix("# ") {
            headings.h1_all.push(clean_markdown_inline(rest.trim_end_matches('#')));
            continue;
        }

        let Some(next) = lines.get(idx + 1).map(|l| l.trim()) else {
            continue;
        };
        if line.is_empty() || is_setext_underline(line) || is_proxy_header(line) {
            continue;
        }
        if next.len() >= 2 && next.chars().all(|c| c == '=') {
            headings.h1_all.push(clean_markdown_inline(line));
        } else if next.len() >= 2 && next.chars().all(|c| c == '-') {
            headings.h2_all.push(clean_markdown_inline(line));
        }
    }

    headings
}

fn is_setext_underline(line: &str) -> bool {
    line.len() >= 2 && (line.chars().all(|c| c == '=') || line.chars().all(|c| c == '-'))
}

fn is_proxy_header(line: &str) -> bool {
    PROXY_HEADER_FIELDS.iter().any(|field| line.starts_with(field))
}

/// Unwrap links, drop images and emphasis markers
fn clean_markdown_inline(text: &str) -> String {
    let text = RE_MD_IMAGE.replace_all(text, "");
    let text = RE_MD_LINK.replace_all(&text, "$1");
    let text = RE_MD_EMPHASIS.replace_all(&text, "");
    collapse_whitespace(&text)
}

/// Prose paragraphs only: navigation, images, tables and headings are skipped
fn markdown_excerpt(markdown: &str) -> Option<String> {
    let body = markdown
        .split_once("Markdown Content:")
        .map(|(_, rest)| rest)
        .unwrap_or(markdown);

    let mut paragraphs = Vec::new();
    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with('|')
            || line.starts_with("```")
            || is_setext_underline(line)
            || is_proxy_header(line)
        {
            continue;
        }

        // Lines that are nothing but links and images are navigation
        let without_images = RE_MD_IMAGE.replace_all(line, "");
        let without_links = RE_MD_LINK.replace_all(&without_images, "");
        if without_links.chars().filter(|c| c.is_alphanumeric()).count() < 3 {
            continue;
        }

        let line = line.trim_start_matches('>').trim_start();
        let line = RE_MD_BULLET.replace(line, "");
        let cleaned = clean_markdown_inline(&line);
        if cleaned.chars().count() <= MIN_PROSE_LINE_CHARS {
            continue;
        }

        paragraphs.push(cleaned);
        if paragraphs.len() == MAX_PROSE_LINES {
            break;
        }
    }

    if paragraphs.is_empty() {
        None
    } else {
        Some(truncate_chars(&paragraphs.join(" "), MARKDOWN_EXCERPT_CHARS))
    }
}
