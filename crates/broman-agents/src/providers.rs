use std::pin::Pin;

use async_trait::async_trait;
use broman_common::{Message, Result, Role};
use futures::Stream;

/// A chat-completions backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// One-shot completion; used where the whole answer is needed at once.
    async fn complete(&self, request: &LlmRequest) -> Result<Completion>;

    /// Incremental completion: text and tool-call fragments in arrival order.
    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream>;
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub format: ReplyFormat,
}

/// Shape the model is asked to answer in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyFormat {
    #[default]
    Text,
    JsonObject,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessagePart::Text(text.into()),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        Self {
            role,
            content: MessagePart::Text(message.content.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
    /// Carries exactly one `ToolResult` block.
    Tool,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Final text of a non-streaming completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: String,
    pub text: String,
    /// `"length"` means the text was cut at `max_tokens`.
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text(String),
    ToolUse(ToolUseDelta),
}

/// Fragment of a tool call; fragments sharing `index` belong to one call.
#[derive(Debug, Clone)]
pub struct ToolUseDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Partial JSON arguments.
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
