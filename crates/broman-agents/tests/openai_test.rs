use broman_agents::{
    ChatMessage, LlmProvider, LlmRequest, OpenAiProvider, ReplyFormat, StreamDelta, ToolKind,
};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(tools: bool) -> LlmRequest {
    LlmRequest {
        model: "gpt-4o-mini".to_string(),
        messages: vec![ChatMessage::user("Сколько будет 2+2?")],
        system: Some("You are a helpful assistant.".to_string()),
        max_tokens: Some(400),
        tools: if tools {
            ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
        } else {
            vec![]
        },
        format: ReplyFormat::Text,
    }
}

fn completion_body(content: &str, finish_reason: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason
        }]
    })
}

#[tokio::test]
async fn test_openai_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("4", "stop")))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let completion = provider.complete(&request(false)).await.unwrap();

    assert_eq!(completion.text, "4");
    assert_eq!(completion.model, "gpt-4o-mini");
    assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    assert!(!completion.is_truncated());
}

#[tokio::test]
async fn test_openai_json_mode_and_truncation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(
            json!({ "response_format": { "type": "json_object" } }),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("{\"sentiment\":", "length")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let mut json_request = request(false);
    json_request.format = ReplyFormat::JsonObject;
    let completion = provider.complete(&json_request).await.unwrap();

    assert!(completion.is_truncated());
    assert_eq!(completion.text, "{\"sentiment\":");
}

#[tokio::test]
async fn test_openai_streams_tool_call_fragments() {
    let mock_server = MockServer::start().await;

    let sse = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_abc123\",\"type\":\"function\",\"function\":{\"name\":\"math\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"expr\\\": \\\"2+2\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n\
               data: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "tool_choice": "auto", "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let stream = provider.complete_stream(&request(true)).await.unwrap();
    let deltas: Vec<_> = stream
        .filter_map(|event| async move {
            match event.ok()? {
                StreamDelta::ToolUse(delta) => Some(delta),
                StreamDelta::Text(_) => None,
            }
        })
        .collect()
        .await;

    assert_eq!(deltas.len(), 2);
    assert!(deltas.iter().all(|d| d.index == 0));
    assert_eq!(deltas[0].id.as_deref(), Some("call_abc123"));
    assert_eq!(deltas[0].name.as_deref(), Some("math"));
    let arguments: String = deltas.iter().map(|d| d.input.as_str()).collect();
    assert_eq!(arguments, "{\"expr\": \"2+2\"}");
}

#[tokio::test]
async fn test_openai_streaming_text() {
    let mock_server = MockServer::start().await;

    let sse = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n\
               data: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let stream = provider.complete_stream(&request(false)).await.unwrap();
    let text: String = stream
        .filter_map(|event| async move {
            match event.ok()? {
                StreamDelta::Text(t) => Some(t),
                StreamDelta::ToolUse(_) => None,
            }
        })
        .collect::<Vec<_>>()
        .await
        .concat();

    assert_eq!(text, "Hello");
}

#[tokio::test]
async fn test_openai_error_status_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("bad-key".to_string(), Some(mock_server.uri()));
    let err = match provider.complete_stream(&request(false)).await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e.to_string(),
    };
    assert!(err.contains("status=401"));
    assert!(err.contains("invalid api key"));
}
