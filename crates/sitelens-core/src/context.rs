//! Rendering of signal records and fetch failures into prompt context.
//!
//! Every line of a block is a closed claim about the fetched page, framed by
//! start and end markers so the model can tell page data from instructions.

use std::fmt;
use std::fmt::Write as FmtWrite;

use crate::error::FetchFailure;
use crate::signals::SignalRecord;
use crate::types::PageFormat;

pub const MISSING: &str = "MISSING";
pub const NONE_FOUND: &str = "NONE FOUND";
pub const EMPTY: &str = "EMPTY (tag present but blank)";
pub const NO_TRACKING: &str = "No — conversion tracking may be missing";
pub const NOT_OBSERVABLE: &str = "UNKNOWN (not visible in rendered page text)";

const END_MARKER: &str = "=== END OF WEBSITE DATA. Base any feedback about this site only on the lines above. Do not invent or assume details about the site that are not listed. ===";
const FAILURE_END_MARKER: &str = "=== END OF WEBSITE DATA. No page data is available. Do not speculate about this site's content, design or SEO. ===";

/// Formatted website context, ready to append to a system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock(String);

impl ContextBlock {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContextBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_start(buf: &mut String, url: &str) {
    let _ = writeln!(buf, "=== WEBSITE ANALYSIS: {url} ===");
}

fn push_line(buf: &mut String, label: &str, value: &str) {
    let _ = writeln!(buf, "{label}: {value}");
}

fn optional_text(value: Option<&str>, absent: &str) -> String {
    match value {
        None => absent.to_string(),
        Some(v) if v.trim().is_empty() => EMPTY.to_string(),
        Some(v) => v.to_string(),
    }
}

fn heading_list(headings: &[String]) -> String {
    if headings.is_empty() {
        NONE_FOUND.to_string()
    } else {
        headings
            .iter()
            .map(|h| format!("\"{h}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Markup-level value, or the not-observable sentinel for rendered sources
fn markup_value(record: &SignalRecord, value: String) -> String {
    if record.observes_markup() {
        value
    } else {
        NOT_OBSERVABLE.to_string()
    }
}

fn yes_no(flag: bool, yes: &str, no: &str) -> String {
    if flag { yes.to_string() } else { no.to_string() }
}

/// Render a successful extraction
pub fn format_signals(url: &str, record: &SignalRecord) -> ContextBlock {
    let mut buf = String::new();
    push_start(&mut buf, url);

    let source = match record.source {
        PageFormat::Html => "page HTML",
        PageFormat::Markdown => "rendered page text",
    };
    push_line(&mut buf, "Source", source);
    push_line(
        &mut buf,
        "Title",
        &optional_text(record.title.as_deref(), MISSING),
    );

    let meta = match record.meta_description.as_deref() {
        None if !record.observes_markup() => NOT_OBSERVABLE.to_string(),
        other => optional_text(other, MISSING),
    };
    push_line(&mut buf, "Meta description", &meta);
    push_line(&mut buf, "H1 headings", &heading_list(&record.h1));
    push_line(&mut buf, "H2 headings", &heading_list(&record.h2));

    let tracking = markup_value(
        record,
        yes_no(
            record.has_tracking,
            "Yes (analytics or ad pixel detected)",
            NO_TRACKING,
        ),
    );
    push_line(&mut buf, "Analytics/tracking", &tracking);

    let schema = if record.has_structured_data && !record.structured_data_types.is_empty() {
        format!("Yes ({})", record.structured_data_types.join(", "))
    } else {
        yes_no(record.has_structured_data, "Yes", "No")
    };
    push_line(
        &mut buf,
        "Structured data (schema)",
        &markup_value(record, schema),
    );
    push_line(
        &mut buf,
        "Canonical tag",
        &markup_value(record, yes_no(record.has_canonical, "Yes", MISSING)),
    );

    let sitemap = if record.has_sitemap_reference {
        "Yes".to_string()
    } else {
        markup_value(record, NONE_FOUND.to_string())
    };
    push_line(&mut buf, "Sitemap reference", &sitemap);
    push_line(
        &mut buf,
        "Robots directive",
        &markup_value(
            record,
            optional_text(record.robots_directive.as_deref(), NONE_FOUND),
        ),
    );
    push_line(
        &mut buf,
        "Page text excerpt",
        &optional_text(record.body_excerpt.as_deref(), NONE_FOUND),
    );

    buf.push_str(END_MARKER);
    ContextBlock(buf)
}

/// Render a fetch failure as an instruction to ask rather than guess
pub fn format_failure(url: &str, failure: &FetchFailure) -> ContextBlock {
    let mut buf = String::new();
    push_start(&mut buf, url);
    push_line(
        &mut buf,
        "Status",
        &format!("COULD NOT LOAD SITE ({})", failure.summary()),
    );
    push_line(
        &mut buf,
        "Instruction",
        "Tell the user you were unable to load their website right now. Do not guess or \
         describe what the site contains. Ask them to briefly describe their business, \
         what they sell and where they are located instead.",
    );
    buf.push_str(FAILURE_END_MARKER);
    ContextBlock(buf)
}
