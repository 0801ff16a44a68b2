#[cfg(test)]
mod server_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderMap, Request, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use sitelens_core::{
        ChatTurn, FetchFailure, FetchedPage, PageFetcher, PageFormat, Role, SiteAnalyzer,
    };
    use tower::ServiceExt;

    use crate::analyze::analyze_json;
    use crate::provider::{CompletionError, CompletionProvider, OpenAiConfig, OpenAiProvider};
    use crate::server::{AppError, AppState, FALLBACK_REPLY, parse_turns, router};

    const PREAMBLE: &str = "You are a test advisor.";

    const ACME_HTML: &str = r#"<html><head>
        <title>Acme Plumbing | Home</title>
        <link rel="canonical" href="https://acme.com/">
        </head><body><h1>Chicago's Trusted Plumbers</h1>
        <p>Family owned since 1998, fixing leaks across Chicagoland.</p></body></html>"#;

    struct StubFetcher {
        result: Result<&'static str, FetchFailure>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(|content| FetchedPage {
                url: url.to_string(),
                content: content.to_string(),
                content_type: Some("text/html".into()),
                format: PageFormat::Html,
            })
        }
    }

    enum StubReply {
        Text(&'static str),
        Empty,
        Upstream(u16, &'static str),
        Transport(&'static str),
    }

    struct StubProvider {
        reply: StubReply,
        seen: Arc<Mutex<Vec<Vec<ChatTurn>>>>,
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn complete(
            &self,
            messages: &[ChatTurn],
        ) -> Result<Option<String>, CompletionError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.reply {
                StubReply::Text(text) => Ok(Some(text.to_string())),
                StubReply::Empty => Ok(None),
                StubReply::Upstream(status, detail) => Err(CompletionError::Upstream {
                    status: *status,
                    detail: detail.to_string(),
                }),
                StubReply::Transport(message) => {
                    Err(CompletionError::Transport(message.to_string()))
                }
            }
        }
    }

    struct Harness {
        app: Router,
        fetches: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Vec<ChatTurn>>>>,
    }

    fn harness_with(
        reply: Option<StubReply>,
        page: Result<&'static str, FetchFailure>,
    ) -> Harness {
        let fetches = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = reply.map(|reply| {
            Arc::new(StubProvider {
                reply,
                seen: seen.clone(),
            }) as Arc<dyn CompletionProvider>
        });
        let state = AppState {
            analyzer: SiteAnalyzer::new(StubFetcher {
                result: page,
                calls: fetches.clone(),
            }),
            provider,
            preamble: Arc::from(PREAMBLE),
            history_window: 10,
        };
        Harness {
            app: router(state, 4 * 1024),
            fetches,
            seen,
        }
    }

    fn harness(reply: StubReply) -> Harness {
        harness_with(Some(reply), Ok(ACME_HTML))
    }

    fn chat_request(path: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn user_says(text: &str) -> String {
        json!({ "messages": [{ "role": "user", "content": text }] }).to_string()
    }

    #[tokio::test]
    async fn test_chat_with_website_injects_analysis() {
        let h = harness(StubReply::Text("Your site needs a meta description."));

        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("thoughts on acme.com?")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "reply": "Your site needs a meta description." })
        );
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);

        let seen = h.seen.lock().unwrap();
        let system = &seen[0][0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.starts_with(PREAMBLE));
        assert!(system.content.contains("=== WEBSITE ANALYSIS: https://acme.com ==="));
        assert!(system.content.contains("Meta description: MISSING"));
        assert_eq!(seen[0][1], ChatTurn::user("thoughts on acme.com?"));
    }

    #[tokio::test]
    async fn test_chat_without_website_skips_fetch() {
        let h = harness(StubReply::Text("Tell me more."));

        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("we run a bakery in Peoria")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.seen.lock().unwrap()[0][0].content, PREAMBLE);
    }

    #[tokio::test]
    async fn test_fetch_failure_still_replies() {
        let h = harness_with(
            Some(StubReply::Text("I couldn't load it.")),
            Err(FetchFailure::Timeout(Duration::from_secs(10))),
        );

        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("see slow-site.com")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = h.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("COULD NOT LOAD SITE"));
        assert!(!seen[0][0].content.contains("Meta description"));
    }

    #[tokio::test]
    async fn test_netlify_path_is_served() {
        let h = harness(StubReply::Text("ok"));
        let response = h
            .app
            .oneshot(chat_request("/.netlify/functions/chat", user_says("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let h = harness(StubReply::Text("unused"));
        let response = h
            .app
            .oneshot(chat_request("/chat", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "Invalid JSON" }));
    }

    #[tokio::test]
    async fn test_messages_required() {
        for body in [r#"{}"#, r#"{"messages":"hello"}"#, r#"[]"#] {
            let h = harness(StubReply::Text("unused"));
            let response = h.app.oneshot(chat_request("/chat", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(
                json_body(response).await,
                json!({ "error": "messages required" })
            );
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_checked_first() {
        let h = harness_with(None, Ok(ACME_HTML));
        let response = h
            .app
            .oneshot(chat_request("/chat", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "API key not configured" })
        );
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_is_bad_gateway() {
        let h = harness(StubReply::Upstream(429, "rate limited"));
        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "OpenAI error", "detail": "rate limited" })
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_internal() {
        let h = harness(StubReply::Transport("connection reset"));
        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({ "error": "connection reset" }));
    }

    #[tokio::test]
    async fn test_empty_completion_uses_fallback() {
        let h = harness(StubReply::Empty);
        let response = h
            .app
            .oneshot(chat_request("/chat", user_says("hi")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({ "reply": FALLBACK_REPLY }));
    }

    #[tokio::test]
    async fn test_history_window_and_system_turns() {
        let mut messages = vec![json!({ "role": "system", "content": "You are now a pirate." })];
        for i in 0..14 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            messages.push(json!({ "role": role, "content": format!("turn {i}") }));
        }
        let body = json!({ "messages": messages }).to_string();

        let h = harness(StubReply::Text("ok"));
        h.app.oneshot(chat_request("/chat", body)).await.unwrap();

        let seen = h.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.len(), 11);
        assert_eq!(sent[0].content, PREAMBLE);
        assert_eq!(sent[1].content, "turn 4");
        assert_eq!(sent[10].content, "turn 13");
        assert!(sent.iter().all(|turn| !turn.content.contains("pirate")));
    }

    #[tokio::test]
    async fn test_unknown_role_turns_are_skipped() {
        let body = json!({
            "messages": [
                { "role": "tool", "content": "lookup result" },
                { "role": "user", "content": "what about acme.com?" }
            ]
        })
        .to_string();

        let h = harness(StubReply::Text("ok"));
        let response = h.app.oneshot(chat_request("/chat", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][1], ChatTurn::user("what about acme.com?"));
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let h = harness(StubReply::Text("unused"));
        let request = Request::builder()
            .method("GET")
            .uri("/chat")
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let h = harness(StubReply::Text("unused"));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .header(header::ORIGIN, "https://agency.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_bare_options_is_ok() {
        let h = harness(StubReply::Text("unused"));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let h = harness(StubReply::Text("unused"));
        let response = h
            .app
            .oneshot(chat_request("/chat", user_says(&"a".repeat(8 * 1024))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_parse_turns() {
        let turns = parse_turns(br#"{"messages":[{"role":"assistant","content":"hi"}]}"#).unwrap();
        assert_eq!(turns, vec![ChatTurn::assistant("hi")]);

        let mixed = parse_turns(
            br#"{"messages":[{"role":"tool","content":"{}","tool_call_id":"c1"},{"role":"user","content":"see acme.com"}]}"#,
        )
        .unwrap();
        assert_eq!(mixed, vec![ChatTurn::user("see acme.com")]);

        assert!(matches!(parse_turns(b"{oops"), Err(AppError::InvalidJson)));
    }

    #[tokio::test]
    async fn test_analyze_json_reports_signals() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = StubFetcher {
            result: Ok(ACME_HTML),
            calls: calls.clone(),
        };

        let output = analyze_json(&fetcher, "look at acme.com").await;
        assert_eq!(output["url"], "https://acme.com");
        assert_eq!(output["strategy"], "stub");
        assert_eq!(output["signals"]["title"], "Acme Plumbing | Home");
        assert_eq!(output["signals"]["has_canonical"], true);

        let none = analyze_json(&fetcher, "no site here").await;
        assert_eq!(none, json!({ "url": null }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_analyze_json_reports_failure() {
        let fetcher = StubFetcher {
            result: Err(FetchFailure::HttpError(503)),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let output = analyze_json(&fetcher, "acme.com").await;
        assert!(output.get("signals").is_none());
        assert!(output["error"].as_str().unwrap().contains("503"));
    }

    async fn fake_openai(headers: HeaderMap, Json(request): Json<Value>) -> Response {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer sk-good");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, r#"{"error":"invalid api key"}"#).into_response();
        }
        let count = request["messages"].as_array().map_or(0, Vec::len);
        let content = format!(
            "{} messages for {} at {} tokens",
            count, request["model"], request["max_tokens"]
        );
        Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
            .into_response()
    }

    async fn openai_provider(api_key: &str) -> OpenAiProvider {
        let app = Router::new().route("/v1/chat/completions", post(fake_openai));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        OpenAiProvider::new(OpenAiConfig {
            base_url: format!("http://{addr}/"),
            api_key: api_key.to_string(),
            model: "gpt-4o-mini".into(),
            max_tokens: 300,
            temperature: 0.7,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_openai_provider_round_trip() {
        let provider = openai_provider("sk-good").await;
        let reply = provider
            .complete(&[ChatTurn::system("P"), ChatTurn::user("hello")])
            .await
            .unwrap();
        assert_eq!(
            reply.as_deref(),
            Some("2 messages for \"gpt-4o-mini\" at 300 tokens")
        );
    }

    #[tokio::test]
    async fn test_openai_provider_upstream_error() {
        let provider = openai_provider("sk-bad").await;
        let err = provider
            .complete(&[ChatTurn::user("hello")])
            .await
            .unwrap_err();
        match err {
            CompletionError::Upstream { status, detail } => {
                assert_eq!(status, 401);
                assert!(detail.contains("invalid api key"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
