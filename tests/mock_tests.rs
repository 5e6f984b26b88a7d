//! Mock-based end-to-end tests.
//!
//! These tests use wiremock to simulate the upstream NIM API and drive the
//! full router with `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use nim_proxy_rust::{
    build_router,
    core::{init_metrics, AppConfig},
    relay::ReasoningDisplay,
    AppState, ModelTable,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Create a test app pointed at the mock server.
fn create_test_app(mock_server: &MockServer, configure: impl FnOnce(&mut AppConfig)) -> Router {
    init_metrics();

    let mut config = AppConfig::default();
    config.upstream.api_base = mock_server.uri();
    config.upstream.api_key = "test_key".to_string();
    config.upstream.request_timeout_secs = 10;
    configure(&mut config);

    let state = Arc::new(AppState::new(
        config,
        ModelTable::builtin(),
        reqwest::Client::new(),
    ));
    build_router(state)
}

fn sse_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "upstream-1",
            "object": "chat.completion.chunk",
            "created": 1,
            "model": "meta/llama-3.1-8b-instruct",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    )
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn frames(body: &str) -> Vec<&str> {
    body.split("\n\n").filter(|f| !f.is_empty()).collect()
}

fn frame_json(frame: &str) -> Option<Value> {
    frame
        .strip_prefix("data: ")
        .and_then(|json| serde_json::from_str(json).ok())
}

fn frame_content(frame: &str) -> Option<String> {
    frame_json(frame)?
        .pointer("/choices/0/delta/content")?
        .as_str()
        .map(str::to_string)
}

#[tokio::test]
async fn test_streaming_relay_end_to_end() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test_key"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(format!(
            "{}{}data: [DONE]\n\n",
            sse_chunk("Hello"),
            sse_chunk(" world")
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let body = body_string(response).await;
    let frames = frames(&body);
    assert_eq!(frames.len(), 3, "frames: {:?}", frames);

    let text: String = frames[..2].iter().filter_map(|f| frame_content(f)).collect();
    assert_eq!(text, "Hello world");
    for frame in &frames[..2] {
        let chunk = frame_json(frame).unwrap();
        assert_eq!(chunk["model"], "x");
        assert!(chunk.get("error").is_none());
    }
    assert_eq!(frames[2], "data: [DONE]");
}

#[tokio::test]
async fn test_streaming_upstream_error_before_output() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "invalid api key"}})),
        )
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["message"], "invalid api key");
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn test_streaming_upstream_500_defaults_message() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "api_error");
    assert_eq!(body["error"]["code"], 500);
}

#[tokio::test]
async fn test_unparseable_frame_passed_through() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(format!(
            "{}data: {{broken\n\n{}data: [DONE]\n\n",
            sse_chunk("a"),
            sse_chunk("b")
        )))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    let body = body_string(response).await;
    let frames = frames(&body);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[1], "data: {broken");
    assert_eq!(frame_content(frames[2]).as_deref(), Some("b"));
}

#[tokio::test]
async fn test_streaming_reasoning_inlined() {
    let mock_server = MockServer::start().await;
    let reasoning = json!({
        "choices": [{"index": 0, "delta": {"reasoning_content": "plan"}, "finish_reason": null}]
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(format!(
            "data: {}\n\n{}data: [DONE]\n\n",
            reasoning,
            sse_chunk("answer")
        )))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.reasoning_display = ReasoningDisplay::Inlined;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    let body = body_string(response).await;
    assert!(!body.contains("reasoning_content"));
    let text: String = frames(&body).iter().filter_map(|f| frame_content(f)).collect();
    assert_eq!(text, "<think>\nplan</think>\n\nanswer");
}

#[tokio::test]
async fn test_streaming_with_continuation() {
    let mock_server = MockServer::start().await;
    let initial = "a".repeat(100);
    let followup = "b".repeat(100);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(format!("{}data: [DONE]\n\n", sse_chunk(&initial))))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(format!("{}data: [DONE]\n\n", sse_chunk(&followup))))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.continuation.enabled = true;
        config.continuation.min_desired_units = 1000;
        config.continuation.max_attempts = 1;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    let body = body_string(response).await;
    let frames = frames(&body);
    let text: String = frames.iter().filter_map(|f| frame_content(f)).collect();
    assert_eq!(text, format!("{}\n\n{}", initial, followup));

    let last_chunk = frame_json(frames[frames.len() - 2]).unwrap();
    assert_eq!(last_chunk["choices"][0]["finish_reason"], "stop");
    assert_eq!(*frames.last().unwrap(), "data: [DONE]");
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let followup_body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let roles: Vec<&str> = followup_body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(followup_body["messages"][2]["content"], initial);
}

#[tokio::test]
async fn test_simulated_streaming_replays_words() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "model": "meta/llama-3.1-8b-instruct",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello brave world"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.streaming.simulate = true;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        })))
        .await
        .unwrap();

    let body = body_string(response).await;
    let words: Vec<String> = frames(&body)
        .iter()
        .filter_map(|f| frame_content(f))
        .filter(|c| !c.is_empty())
        .collect();
    assert_eq!(words, vec!["Hello ", "brave ", "world"]);
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn test_non_streaming_completion() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "deepseek-ai/deepseek-r1-distill-llama-70b",
            "stream": false,
            "temperature": 0.5,
            "max_tokens": 4000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "upstream-id",
            "model": "deepseek-ai/deepseek-r1-distill-llama-70b",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Answer", "reasoning_content": "Why"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.reasoning_display = ReasoningDisplay::Inlined;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "<think>\nWhy\n</think>\n\nAnswer"
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 12);
}

#[tokio::test]
async fn test_non_streaming_hidden_reasoning_and_zero_usage() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Answer", "reasoning_content": "Why"},
                "finish_reason": "stop"
            }]
        })))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.reasoning_display = ReasoningDisplay::Hidden;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        })))
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "Answer");
    assert_eq!(body["usage"], json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}));
}

#[tokio::test]
async fn test_non_streaming_with_continuation_estimates_usage() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(format!(
            "{}data: [DONE]\n\n",
            sse_chunk(&"c".repeat(400))
        )))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |config| {
        config.continuation.enabled = true;
        config.continuation.min_desired_units = 50;
    });
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "c".repeat(400));
    assert_eq!(body["usage"]["completion_tokens"], 100);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_messages_rejected() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(chat_request(json!({"model": "gpt-4", "messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_json_error() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["code"], 400);
    assert!(body["error"]["message"].as_str().unwrap().len() > 0);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_field_type_is_json_error() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(chat_request(json!({"model": "gpt-4", "messages": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_null_message_content_accepted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": null},
                {"role": "user", "content": "again"}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let assistant = sent["messages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["role"] == "assistant")
        .unwrap();
    assert_eq!(assistant["content"], "");
}

#[tokio::test]
async fn test_non_streaming_keeps_every_choice() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "first"}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": "second"}, "finish_reason": "length"}
            ]
        })))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server, |_| {});
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let choices = body["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[1]["index"], 1);
    assert_eq!(choices[1]["message"]["content"], "second");
    assert_eq!(choices[1]["finish_reason"], "length");
    assert_eq!(body["usage"]["total_tokens"], 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["features"]["reasoning_display"], "suppressed");
    assert_eq!(body["features"]["custom_configs"], 8);
}

#[tokio::test]
async fn test_list_models() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["object"], "list");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 8);

    let coder = data.iter().find(|m| m["id"] == "deepseek-r1-coder").unwrap();
    assert_eq!(coder["owned_by"], "nvidia-nim-proxy");
    assert_eq!(coder["config"]["max_tokens"], 8000);
    assert_eq!(coder["config"]["has_system_prompt"], true);
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(Request::builder().uri("/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["message"], "Endpoint /v1/nope not found");
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(&mock_server, |_| {});

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
