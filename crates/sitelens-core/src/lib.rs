//! # sitelens-core
//!
//! Site analysis for chat proxies: spot the website a user mentions, fetch it
//! under a hard time budget, pull out a bounded set of marketing signals and
//! render them as a framed block of prompt context.
//!
//! This library provides:
//! - URL detection in free-form chat text
//! - Direct and rendering-proxy page fetch strategies
//! - Tolerant, per-field signal extraction from HTML or markdown
//! - Context block formatting and system prompt composition
//!
//! ## Features
//!
//! - `default`: includes `fetch`
//! - `fetch`: network fetch strategies and [`SiteAnalyzer`]; without it the
//!   crate is pure text processing
//!
//! ## Example
//!
//! ```no_run
//! use sitelens_core::{FetchConfig, SiteAnalyzer, compose_system_prompt, DEFAULT_SYSTEM_PROMPT};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let analyzer = SiteAnalyzer::from_config(&FetchConfig::default())?;
//! let context = analyzer.analyze_text("what do you think of acme-plumbing.com?").await;
//! let system = compose_system_prompt(DEFAULT_SYSTEM_PROMPT, context.as_ref());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod signals;
pub mod types;
pub mod url_extract;

#[cfg(feature = "fetch")]
pub mod analyzer;
#[cfg(feature = "fetch")]
pub mod fetch;

// Re-export commonly used types
pub use context::{ContextBlock, format_failure, format_signals};
pub use error::FetchFailure;
pub use prompt::{
    DEFAULT_HISTORY_WINDOW, DEFAULT_SYSTEM_PROMPT, compose_messages, compose_system_prompt,
};
pub use signals::{SignalRecord, extract_signals, extract_signals_from};
pub use types::{ChatTurn, FetchedPage, PageFormat, Role, latest_user_text, trailing_window};
pub use url_extract::extract_site_url;

#[cfg(feature = "fetch")]
pub use analyzer::SiteAnalyzer;

#[cfg(feature = "fetch")]
pub use fetch::{
    DirectFetcher, FetchConfig, FetchOptions, FetchStrategy, PageFetcher, RenderProxyFetcher,
    build_fetcher,
};
