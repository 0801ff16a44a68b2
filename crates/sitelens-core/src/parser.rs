//! Low-level HTML cleanup and JSON-LD discovery

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;

/// Extract JSON-LD script blocks from HTML
pub fn extract_json_ld_blocks(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let script_selector = Selector::parse("script")
        .map_err(|e| anyhow::anyhow!("unable to parse selector: {}", e))?;

    Ok(document
        .select(&script_selector)
        .filter_map(|element| {
            let script_type = element
                .value()
                .attr("type")
                .map(|t| t.trim().to_ascii_lowercase())
                .unwrap_or_default();

            // Use contains() to catch variations like "application/ld+json; charset=utf-8"
            if script_type.contains("ld+json") {
                let text = element.text().collect::<String>().trim().to_string();
                if text.is_empty() { None } else { Some(text) }
            } else {
                None
            }
        })
        .collect())
}

/// Distinct `@type` names declared across JSON-LD blocks, in first-seen order.
///
/// Looks at top-level objects, top-level arrays and `@graph` members. Blocks
/// that are not valid JSON are skipped.
pub fn json_ld_types(blocks: &[String], limit: usize) -> Vec<String> {
    let mut types = Vec::new();

    for block in blocks {
        let Ok(parsed) = serde_json::from_str::<JsonValue>(block) else {
            continue;
        };
        collect_types(&parsed, &mut types);
    }

    types.truncate(limit);
    types
}

fn collect_types(value: &JsonValue, types: &mut Vec<String>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect_types(item, types);
            }
        }
        JsonValue::Object(obj) => {
            match obj.get("@type") {
                Some(JsonValue::String(name)) => push_type(types, name),
                Some(JsonValue::Array(names)) => {
                    for name in names.iter().filter_map(JsonValue::as_str) {
                        push_type(types, name);
                    }
                }
                _ => {}
            }
            if let Some(graph) = obj.get("@graph") {
                collect_types(graph, types);
            }
        }
        _ => {}
    }
}

fn push_type(types: &mut Vec<String>, name: &str) {
    // "https://schema.org/Product" -> "Product"
    let short = name.rsplit(['/', '#']).next().unwrap_or(name).trim();
    if !short.is_empty() && !types.iter().any(|t| t == short) {
        types.push(short.to_string());
    }
}

/// Sanitize HTML by removing script, style, and other non-visible elements
pub fn sanitize_html(html: &str) -> String {
    static RE_TAG_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [
            r"(?is)<head[\s>].*?</head>",
            r"(?is)<script[^>]*?>[\s\S]*?</script>",
            r"(?is)<style[^>]*?>[\s\S]*?</style>",
            r"(?is)<noscript[^>]*?>[\s\S]*?</noscript>",
            r"(?is)<template[^>]*?>[\s\S]*?</template>",
            r"(?is)<svg[^>]*?>[\s\S]*?</svg>",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("invalid block regex"))
        .collect()
    });
    static RE_COMMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)<!--.*?-->").expect("invalid comment regex"));

    let mut clean = RE_COMMENT.replace_all(html, "").into_owned();
    for re in RE_TAG_BLOCKS.iter() {
        clean = re.replace_all(&clean, " ").into_owned();
    }
    clean
}

/// Replace every markup tag with a space
pub fn strip_tags(html: &str) -> String {
    static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("invalid tag regex"));
    RE_TAG.replace_all(html, " ").into_owned()
}

/// Decode the handful of entities that show up in titles and copy
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&#8211;", "-")
        .replace("&#8212;", "-")
        .replace("&#038;", "&")
        .replace("&amp;", "&")
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Inner text of a markup fragment: tags stripped, entities decoded, whitespace collapsed
pub fn inner_text(fragment: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_tags(fragment)))
}

/// Truncate to at most `max_chars` characters, never splitting a character
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
