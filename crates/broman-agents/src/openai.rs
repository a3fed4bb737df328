use crate::providers::{
    ChatMessage, ChatRole, Completion, ContentBlock, LlmProvider, LlmRequest, LlmStream,
    MessagePart, ReplyFormat, StreamDelta, ToolUseDelta,
};
use async_trait::async_trait;
use broman_common::{Error, Result};
use broman_config::LlmConfig;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Build a provider from config; `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        let key = config.api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key.to_string(), config.base_url.clone()))
    }

    async fn post(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "openai API error: status={}, body={}",
                status.as_u16(),
                error_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<Completion> {
        let body = convert_request(request, false)?;
        let response = self.post(&body).await?;

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse openai response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("no choices in openai response".to_string()))?;

        Ok(Completion {
            model: parsed.model,
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = convert_request(request, true)?;
        let response = self.post(&body).await?;
        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }
}

fn convert_request(request: &LlmRequest, stream: bool) -> Result<OpenAiRequest> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system_prompt) = &request.system {
        messages.push(OpenAiMessage::System {
            content: system_prompt.clone(),
        });
    }
    for msg in &request.messages {
        messages.push(convert_message(msg)?);
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function".to_string(),
                    function: OpenAiFunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect(),
        )
    };

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        tool_choice: tools.as_ref().map(|_| "auto".to_string()),
        tools,
        response_format: match request.format {
            ReplyFormat::Text => None,
            ReplyFormat::JsonObject => Some(OpenAiResponseFormat {
                kind: "json_object".to_string(),
            }),
        },
        stream,
    })
}

fn text_of(part: &MessagePart) -> String {
    match part {
        MessagePart::Text(t) => t.clone(),
        MessagePart::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match msg.role {
        ChatRole::User => Ok(OpenAiMessage::User {
            content: text_of(&msg.content),
        }),
        ChatRole::Assistant => {
            let mut tool_calls = Vec::new();
            if let MessagePart::Parts(parts) = &msg.content {
                for part in parts {
                    if let ContentBlock::ToolUse { id, name, input } = part {
                        tool_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input)?,
                            },
                        });
                    }
                }
            }
            let text = text_of(&msg.content);
            Ok(OpenAiMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            })
        }
        ChatRole::Tool => {
            let MessagePart::Parts(parts) = &msg.content else {
                return Err(Error::Agent(
                    "tool message must carry a tool_result block".to_string(),
                ));
            };
            parts
                .iter()
                .find_map(|p| match p {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => Some(OpenAiMessage::Tool {
                        tool_call_id: tool_use_id.clone(),
                        content: content.clone(),
                    }),
                    _ => None,
                })
                .ok_or_else(|| Error::Agent("tool message missing tool_result".to_string()))
        }
    }
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response Types
#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

/// Turns the chat-completions SSE byte stream into [`StreamDelta`] items.
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<StreamDelta>>,
    finished: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Move every complete event in the buffer onto the queue.
    fn drain_events(&mut self) {
        while let Some((end, delimiter)) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end).collect();
            self.buffer.drain(..delimiter);

            // Invalid UTF-8, drop
            let Ok(text) = String::from_utf8(event) else {
                continue;
            };
            for line in text.lines() {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<OpenAiStreamChunk>(data) {
                    Ok(chunk) => push_chunk(&mut self.queue, chunk),
                    Err(e) => self
                        .queue
                        .push_back(Err(Error::Provider(format!("JSON parse error: {e}")))),
                }
            }
        }
    }
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(p) = buffer.windows(2).position(|w| w == b"\n\n") {
        return Some((p, 2));
    }
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4))
}

fn push_chunk(queue: &mut VecDeque<Result<StreamDelta>>, chunk: OpenAiStreamChunk) {
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            queue.push_back(Ok(StreamDelta::Text(content)));
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, input) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            queue.push_back(Ok(StreamDelta::ToolUse(ToolUseDelta {
                index: tc.index,
                id: tc.id,
                name,
                input,
            })));
        }
    }
}

impl Stream for SseParser {
    type Item = Result<StreamDelta>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(Error::Provider(format!("stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // Flush a trailing event that arrived without its blank line.
                    if !self.buffer.is_empty() {
                        self.buffer.extend_from_slice(b"\n\n");
                        self.drain_events();
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn parse(raw: &'static str) -> Vec<StreamDelta> {
        let chunks = futures::stream::iter(vec![Ok(Bytes::from_static(raw.as_bytes()))]);
        let parser = SseParser::new(chunks);
        futures::executor::block_on(parser.map(|r| r.unwrap()).collect::<Vec<_>>())
    }

    fn request(format: ReplyFormat) -> LlmRequest {
        LlmRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![],
            system: Some("be brief".to_string()),
            max_tokens: Some(400),
            tools: vec![],
            format,
        }
    }

    #[test]
    fn parses_text_deltas_and_done_marker() {
        let events = parse(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n\
             data: [DONE]\n\n",
        );
        let texts: Vec<String> = events
            .into_iter()
            .filter_map(|e| match e {
                StreamDelta::Text(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[test]
    fn parses_tool_call_deltas() {
        let events = parse(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"math\",\"arguments\":\"{\\\"expr\\\"\"}}]},\"finish_reason\":null}]}\n\n",
        );
        match &events[0] {
            StreamDelta::ToolUse(delta) => {
                assert_eq!(delta.id.as_deref(), Some("call_1"));
                assert_eq!(delta.name.as_deref(), Some("math"));
                assert_eq!(delta.input, "{\"expr\"");
            }
            other => panic!("expected tool delta, got {other:?}"),
        }
    }

    #[test]
    fn flushes_trailing_event_without_delimiter() {
        let events = parse("data: {\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":\"stop\"}]}");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamDelta::Text(t) if t == "x"));
    }

    #[test]
    fn request_enables_tool_choice_only_with_tools() {
        let body = serde_json::to_value(convert_request(&request(ReplyFormat::Text), true).unwrap())
            .unwrap();
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn json_format_sets_response_format() {
        let body =
            serde_json::to_value(convert_request(&request(ReplyFormat::JsonObject), false).unwrap())
                .unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], false);
    }
}
