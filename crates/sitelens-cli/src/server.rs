//! Chat proxy HTTP server

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{MethodRouter, post};
use serde::Serialize;
use sitelens_core::{ChatTurn, SiteAnalyzer, compose_messages, latest_user_text};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServeArgs;
use crate::provider::{CompletionError, CompletionProvider, OpenAiConfig, OpenAiProvider};

pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Shared, immutable per-process state
#[derive(Clone)]
pub struct AppState {
    pub analyzer: SiteAnalyzer,
    /// `None` when no completion key is configured
    pub provider: Option<Arc<dyn CompletionProvider>>,
    pub preamble: Arc<str>,
    pub history_window: usize,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("messages required")]
    MessagesRequired,
    #[error("API key not configured")]
    ApiKeyMissing,
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidJson | AppError::MessagesRequired => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::ApiKeyMissing => {
                error!("chat request rejected: completion API key not configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": self.to_string() }),
                )
            }
            AppError::Completion(CompletionError::Upstream { status, detail }) => {
                warn!(status, "completion API error");
                (
                    StatusCode::BAD_GATEWAY,
                    serde_json::json!({ "error": "OpenAI error", "detail": detail }),
                )
            }
            AppError::Completion(CompletionError::Transport(message)) => {
                error!(%message, "completion request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": message }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/chat", chat_route())
        .route("/.netlify/functions/chat", chat_route())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn chat_route() -> MethodRouter<AppState> {
    post(chat)
        .options(|| async { StatusCode::OK })
        .fallback(|| async { (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed") })
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Json<ChatReply>, AppError> {
    let provider = state.provider.as_ref().ok_or(AppError::ApiKeyMissing)?;
    let turns = parse_turns(&body)?;

    let context = match latest_user_text(&turns) {
        Some(text) => state.analyzer.analyze_text(text).await,
        None => None,
    };
    info!(
        turns = turns.len(),
        website_context = context.is_some(),
        "chat request"
    );

    let messages = compose_messages(
        &state.preamble,
        context.as_ref(),
        &turns,
        state.history_window,
    );
    let reply = provider
        .complete(&messages)
        .await?
        .unwrap_or_else(|| FALLBACK_REPLY.to_string());

    Ok(Json(ChatReply { reply }))
}

/// Pull the `messages` array out of a chat request body.
///
/// Entries that are not a system/user/assistant turn with text content (tool
/// calls, unknown roles) are skipped rather than failing the request.
pub fn parse_turns(body: &[u8]) -> Result<Vec<ChatTurn>, AppError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| AppError::InvalidJson)?;
    let messages = value
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or(AppError::MessagesRequired)?;

    let turns: Vec<ChatTurn> = messages
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();
    if turns.len() < messages.len() {
        debug!(
            skipped = messages.len() - turns.len(),
            "dropped unsupported chat turns"
        );
    }
    Ok(turns)
}

/// Build state from configuration and serve until Ctrl-C
pub async fn run(args: ServeArgs) -> Result<()> {
    let preamble = args.load_preamble()?;
    let analyzer = SiteAnalyzer::from_config(&args.fetch.to_config())?;

    let provider: Option<Arc<dyn CompletionProvider>> = match args.api_key() {
        Some(api_key) => Some(Arc::new(OpenAiProvider::new(OpenAiConfig {
            base_url: args.openai_base_url.clone(),
            api_key,
            model: args.model.clone(),
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            timeout: args.completion_timeout(),
        })?)),
        None => {
            warn!("no completion API key configured; chat requests will return 500");
            None
        }
    };

    let state = AppState {
        analyzer: analyzer.clone(),
        provider,
        preamble: Arc::from(preamble),
        history_window: args.history_window as usize,
    };
    let app = router(state, args.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(
        addr = %args.bind,
        fetch_strategy = analyzer.strategy_name(),
        model = %args.model,
        "sitelens chat proxy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
