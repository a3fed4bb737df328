use std::sync::Arc;

use broman_agents::{
    AgentRuntime, ChatOptions, CompletionGuard, FallbackRouter, GuardOutcome, OpenAiProvider,
    OpenMeteoProvider, Toolbox,
};
use broman_common::Message;
use broman_config::{ShippingConfig, WeatherConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn toolbox() -> Toolbox {
    let weather = OpenMeteoProvider::new(&WeatherConfig::default()).unwrap();
    Toolbox::new(Arc::new(weather), ShippingConfig::default())
}

async fn run_turn(runtime: &AgentRuntime, text: &str) -> (String, GuardOutcome) {
    let conversation = vec![Message::user(text)];
    let router = Arc::new(FallbackRouter::from_toolbox(runtime.toolbox()));
    let upstream = runtime.stream_reply(&conversation, &ChatOptions::default());

    let (mut rx, handle) = CompletionGuard::new(router).spawn(upstream, conversation, 8);
    let mut out = String::new();
    while let Some(fragment) = rx.recv().await {
        out.push_str(&fragment);
    }
    (out, handle.await.unwrap())
}

async fn mount_sse(server: &MockServer, body: &'static str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_model_text_is_forwarded_untouched() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n\
         data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n\
         data: [DONE]\n\n",
    )
    .await;

    let mut runtime = AgentRuntime::new(toolbox());
    runtime.set_provider(Arc::new(OpenAiProvider::new(
        "test-key".to_string(),
        Some(server.uri()),
    )));

    let (out, outcome) = run_turn(&runtime, "2+2").await;
    assert_eq!(out, "Hello");
    assert_eq!(outcome, GuardOutcome::Streamed);
}

#[tokio::test]
async fn test_silent_model_is_answered_by_fallback() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "data: {\"choices\":[{\"delta\":{\"content\":\"\"},\"finish_reason\":\"stop\"}]}\n\n\
         data: [DONE]\n\n",
    )
    .await;

    let mut runtime = AgentRuntime::new(toolbox());
    runtime.set_provider(Arc::new(OpenAiProvider::new(
        "test-key".to_string(),
        Some(server.uri()),
    )));

    let (out, outcome) = run_turn(&runtime, "сколько будет (2+3)*4?").await;
    assert_eq!(out, "Result: 20");
    assert_eq!(outcome, GuardOutcome::FellBack);
}

#[tokio::test]
async fn test_no_provider_still_answers() {
    let runtime = AgentRuntime::new(toolbox());
    let (out, outcome) = run_turn(
        &runtime,
        "доставка откуда=Москва, куда=Париж, basePrice=100, weightKg=10",
    )
    .await;
    assert_eq!(
        out,
        "Shipping Москва → Париж\nTotal: 1000 USD • 920 EUR (rate 0.92)"
    );
    assert_eq!(outcome, GuardOutcome::FellBack);
}

#[tokio::test]
async fn test_provider_error_is_marked_then_answered_by_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let mut runtime = AgentRuntime::new(toolbox());
    runtime.set_provider(Arc::new(OpenAiProvider::new(
        "test-key".to_string(),
        Some(server.uri()),
    )));

    let (out, outcome) = run_turn(&runtime, "2+2").await;
    assert!(out.starts_with("\n[stream error: "), "got {out:?}");
    assert!(out.contains("status=500"));
    assert!(out.ends_with("]Result: 4"), "got {out:?}");
    assert_eq!(out.matches("Result: 4").count(), 1);
    assert_eq!(outcome, GuardOutcome::FellBack);
}
