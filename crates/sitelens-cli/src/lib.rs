//! # sitelens-cli
//!
//! The `sitelens` binary: a chat proxy that injects a live website analysis
//! into the system prompt before calling the completion API, plus an
//! `analyze` command for checking a site from the terminal.

pub mod analyze;
pub mod config;
pub mod provider;
pub mod server;

pub use config::{AnalyzeArgs, Cli, Command, FetchArgs, ServeArgs};
pub use provider::{CompletionError, CompletionProvider, OpenAiConfig, OpenAiProvider};
pub use server::{AppError, AppState, ChatReply, FALLBACK_REPLY, router};

#[cfg(test)]
mod tests;
