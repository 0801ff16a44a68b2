//! Command-line and environment configuration

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sitelens_core::fetch::DEFAULT_RENDER_PROXY_URL;
use sitelens_core::{DEFAULT_SYSTEM_PROMPT, FetchConfig, FetchOptions, FetchStrategy};

pub const DEFAULT_BIND: &str = "0.0.0.0:8888";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variable the hosted deployment stored the completion key in
pub const LEGACY_API_KEY_ENV: &str = "avachat";

#[derive(Parser, Debug)]
#[command(name = "sitelens")]
#[command(about = "Chat proxy that grounds replies in a live analysis of the user's website")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat proxy HTTP server
    Serve(ServeArgs),
    /// Analyze the website mentioned in TEXT and print the context block
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "SITELENS_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Completion API key (falls back to the `avachat` variable)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible completion API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "SITELENS_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = 300)]
    pub max_tokens: u32,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    /// Completion request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub completion_timeout_secs: u64,

    /// Conversation turns forwarded to the model
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(10..=12))]
    pub history_window: u64,

    /// File whose contents replace the built-in system prompt
    #[arg(long, env = "SITELENS_SYSTEM_PROMPT_FILE")]
    pub system_prompt_file: Option<PathBuf>,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    pub max_body_bytes: usize,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

impl ServeArgs {
    /// The configured completion key, if any. Blank values count as unset.
    pub fn api_key(&self) -> Option<String> {
        let explicit = self.openai_api_key.clone();
        non_blank(explicit).or_else(|| non_blank(std::env::var(LEGACY_API_KEY_ENV).ok()))
    }

    pub fn load_preamble(&self) -> Result<String> {
        match &self.system_prompt_file {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read system prompt {}", path.display()))?;
                anyhow::ensure!(
                    !text.trim().is_empty(),
                    "system prompt file {} is empty",
                    path.display()
                );
                Ok(text)
            }
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Free-form text that mentions a website
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,

    /// Print the extracted signals as JSON instead of the context block
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

/// Fetch settings shared by `serve` and `analyze`
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[arg(long, env = "SITELENS_FETCH_STRATEGY", value_enum, default_value_t = StrategyArg::Direct)]
    pub fetch_strategy: StrategyArg,

    /// Hard wall-clock budget for one site fetch
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(8..=15))]
    pub fetch_timeout_secs: u64,

    /// Rendering proxy base URL; the target address is appended to it
    #[arg(long, env = "RENDER_PROXY_URL", default_value = DEFAULT_RENDER_PROXY_URL)]
    pub render_proxy_url: String,

    #[arg(long, env = "RENDER_PROXY_API_KEY", hide_env_values = true)]
    pub render_proxy_key: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Direct,
    RenderProxy,
}

impl From<StrategyArg> for FetchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Direct => FetchStrategy::Direct,
            StrategyArg::RenderProxy => FetchStrategy::RenderProxy,
        }
    }
}

impl FetchArgs {
    pub fn to_config(&self) -> FetchConfig {
        FetchConfig {
            strategy: self.fetch_strategy.into(),
            options: FetchOptions {
                timeout: Duration::from_secs(self.fetch_timeout_secs),
                ..FetchOptions::default()
            },
            render_proxy_url: Some(self.render_proxy_url.clone()),
            render_proxy_key: non_blank(self.render_proxy_key.clone()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
