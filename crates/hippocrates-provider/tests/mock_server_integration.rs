use hippocrates_provider::{LlmMessage, LlmProvider, LlmRequest, OpenAiProvider};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_chat_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

#[tokio::test]
async fn chat_sends_bearer_and_parses_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer ollama"))
        .and(header("content-type", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(mock_chat_response("{\"question\":\"Any cough?\"}")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("ollama", server.uri());
    let resp = provider
        .chat(LlmRequest {
            model: "llama3".into(),
            system: Some("be careful".into()),
            messages: vec![LlmMessage::user("sore throat")],
            max_tokens: 128,
            json_mode: false,
            temperature: None,
        })
        .await
        .unwrap();

    assert!(resp.text.contains("Any cough?"));
    assert_eq!(resp.output_tokens, Some(5));
}

#[tokio::test]
async fn json_mode_is_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "response_format": {"type": "json_object"},
            "temperature": 0.1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response("{}")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", server.uri());
    let mut req = LlmRequest::simple("llama3".into(), None, "hi".into());
    req.json_mode = true;
    req.temperature = Some(0.1);
    provider.chat(req).await.unwrap();
}

#[tokio::test]
async fn server_error_is_marked_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": {"type": "overloaded", "message": "model is loading"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", server.uri());
    let err = provider
        .chat(LlmRequest::simple("llama3".into(), None, "hi".into()))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("[retryable]"));
    assert!(text.contains("model is loading"));
}

#[tokio::test]
async fn health_checks_models_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", server.uri());
    assert!(provider.health().await.is_ok());
}
