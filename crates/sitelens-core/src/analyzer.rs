//! End-to-end site analysis for one chat turn

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::context::{ContextBlock, format_failure, format_signals};
use crate::fetch::{FetchConfig, PageFetcher, build_fetcher};
use crate::signals::extract_signals;
use crate::url_extract::extract_site_url;

/// Detects a site in chat text, fetches it and renders the context block.
///
/// Holds no per-request state; clone it freely across requests.
#[derive(Clone)]
pub struct SiteAnalyzer {
    fetcher: Arc<dyn PageFetcher>,
}

impl std::fmt::Debug for SiteAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteAnalyzer")
            .field("fetcher", &self.fetcher.name())
            .finish()
    }
}

impl SiteAnalyzer {
    pub fn new(fetcher: impl PageFetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }

    pub fn from_boxed(fetcher: Box<dyn PageFetcher>) -> Self {
        Self {
            fetcher: Arc::from(fetcher),
        }
    }

    /// Analyzer using the strategy named in `config`
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Ok(Self::from_boxed(build_fetcher(config)?))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.fetcher.name()
    }

    /// `None` when the text names no website; otherwise a success or failure block.
    pub async fn analyze_text(&self, text: &str) -> Option<ContextBlock> {
        let Some(url) = extract_site_url(text) else {
            debug!("no website address in user turn");
            return None;
        };
        Some(self.analyze_url(&url).await)
    }

    /// Fetch and analyze a normalized URL. Never fails: fetch problems become
    /// a failure block.
    pub async fn analyze_url(&self, url: &str) -> ContextBlock {
        info!(url, strategy = self.fetcher.name(), "analyzing website");

        match self.fetcher.fetch(url).await {
            Ok(page) => {
                let record = extract_signals(&page);
                let missing = record.missing_fields();
                if !missing.is_empty() {
                    debug!(url, ?missing, "partial signal record");
                }
                format_signals(url, &record)
            }
            Err(failure) => {
                warn!(url, %failure, "website fetch failed");
                format_failure(url, &failure)
            }
        }
    }
}
