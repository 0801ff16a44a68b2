//! One-shot analysis from the command line

use anyhow::Result;
use serde_json::json;
use sitelens_core::{
    PageFetcher, SiteAnalyzer, build_fetcher, extract_signals, extract_site_url,
};

use crate::config::AnalyzeArgs;

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let text = args.text.join(" ");
    let config = args.fetch.to_config();

    if args.json {
        let fetcher = build_fetcher(&config)?;
        let output = analyze_json(fetcher.as_ref(), &text).await;
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let analyzer = SiteAnalyzer::from_config(&config)?;
    match analyzer.analyze_text(&text).await {
        Some(block) => println!("{block}"),
        None => eprintln!("No website address found in the input."),
    }
    Ok(())
}

/// Machine-readable result: the signal record on success, the failure otherwise
pub async fn analyze_json(fetcher: &dyn PageFetcher, text: &str) -> serde_json::Value {
    let Some(url) = extract_site_url(text) else {
        return json!({ "url": null });
    };

    match fetcher.fetch(&url).await {
        Ok(page) => json!({
            "url": url,
            "strategy": fetcher.name(),
            "signals": extract_signals(&page),
        }),
        Err(failure) => json!({
            "url": url,
            "strategy": fetcher.name(),
            "error": failure.to_string(),
            "summary": failure.summary(),
        }),
    }
}
