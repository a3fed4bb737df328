use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use broman_common::{Error, Message, Result};
use broman_config::AppConfig;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::guard::TextStream;
use crate::openai::OpenAiProvider;
use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart, ReplyFormat,
    StreamDelta,
};
use crate::structured::{self, TextAnalysis};
use crate::tools::{OpenMeteoProvider, Toolbox};

/// Maximum number of model round-trips in a single turn.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Caller-supplied system prompts are cut to this many characters.
pub const MAX_SYSTEM_PROMPT_CHARS: usize = 4000;

const STREAM_BUFFER: usize = 32;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are BroMan 1.0, a polite assistant. Reply in the user's language. \
For questions about the time use the `time` tool (with an IANA timezone when one is given). \
For the weather use the `weather` tool. \
For calculations use the `math` tool. \
For shipping use the `shippingCost` tool (fromCity, toCity, basePrice, weightKg). \
After using tools always finish with a final text answer.";

/// Per-request overrides sent by the caller.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub system: Option<String>,
    pub model: Option<String>,
}

/// Drives one chat turn against the configured model, answering tool calls
/// from the shared toolbox.
pub struct AgentRuntime {
    provider: Option<Arc<dyn LlmProvider>>,
    toolbox: Arc<Toolbox>,
    system_prompt: String,
    default_model: String,
    max_tokens: u32,
}

impl AgentRuntime {
    pub fn new(toolbox: Toolbox) -> Self {
        Self {
            provider: None,
            toolbox: Arc::new(toolbox),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let weather = Arc::new(OpenMeteoProvider::new(&config.weather)?);
        let mut runtime = Self::new(Toolbox::new(weather, config.shipping.clone()));

        match OpenAiProvider::from_config(&config.llm) {
            Some(provider) => runtime.set_provider(Arc::new(provider)),
            None => warn!("no LLM API key configured, every turn will use the fallback router"),
        }
        if let Some(prompt) = config.llm.system_prompt.as_deref() {
            runtime.set_system_prompt(prompt);
        }
        runtime.set_default_model(&config.llm.model);
        runtime.set_max_tokens(config.llm.max_tokens);
        Ok(runtime)
    }

    pub fn set_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        info!("registered LLM provider: {}", provider.provider_id());
        self.provider = Some(provider);
    }

    pub fn set_system_prompt(&mut self, prompt: &str) {
        if !prompt.trim().is_empty() {
            self.system_prompt = prompt.to_string();
        }
    }

    pub fn set_default_model(&mut self, model: &str) {
        if !model.trim().is_empty() {
            self.default_model = model.trim().to_string();
        }
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = max_tokens;
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    /// The caller's model when given, otherwise the configured default.
    pub fn resolve_model(&self, options: &ChatOptions) -> String {
        options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }

    /// Build the model request for a conversation. Blank assistant turns are
    /// dropped; a system override is capped at [`MAX_SYSTEM_PROMPT_CHARS`].
    pub fn prepare_request(&self, conversation: &[Message], options: &ChatOptions) -> LlmRequest {
        let system = options
            .system
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.chars().take(MAX_SYSTEM_PROMPT_CHARS).collect::<String>())
            .unwrap_or_else(|| self.system_prompt.clone());

        let messages = conversation
            .iter()
            .filter(|m| !m.is_blank_assistant())
            .map(ChatMessage::from)
            .collect();

        LlmRequest {
            model: self.resolve_model(options),
            messages,
            system: Some(system),
            max_tokens: Some(self.max_tokens),
            tools: self.toolbox.definitions(),
            format: ReplyFormat::Text,
        }
    }

    /// Start a turn and return its text fragments as they are generated.
    ///
    /// Without a provider the stream is empty. Provider failures arrive as an
    /// `Err` item and end the stream. Dropping the stream aborts the turn,
    /// including any model round or tool call in flight.
    #[instrument(skip(self, conversation, options), fields(messages = conversation.len()))]
    pub fn stream_reply(&self, conversation: &[Message], options: &ChatOptions) -> TextStream {
        let Some(provider) = self.provider.clone() else {
            debug!("no provider configured, returning an empty stream");
            return Box::pin(futures::stream::empty());
        };

        let request = self.prepare_request(conversation, options);
        let toolbox = Arc::clone(&self.toolbox);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let task = tokio::spawn(async move {
            if let Err(e) = run_tool_loop(provider.as_ref(), &toolbox, request, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(TurnStream {
            inner: ReceiverStream::new(rx),
            task,
        })
    }

    /// Ask the model for a sentiment, summary and keywords of `query`.
    #[instrument(skip_all, fields(chars = query.chars().count()))]
    pub async fn analyze(&self, query: &str) -> Result<TextAnalysis> {
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is missing".to_string()))?;
        structured::analyze(provider, &self.default_model, query).await
    }
}

/// Fragments of one turn; dropping it aborts the task producing them.
struct TurnStream {
    inner: ReceiverStream<Result<String>>,
    task: JoinHandle<()>,
}

impl Stream for TurnStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Stream model output into `tx`, executing requested tools between rounds.
/// Returns early without error once the receiver is gone.
async fn run_tool_loop(
    provider: &dyn LlmProvider,
    toolbox: &Toolbox,
    mut request: LlmRequest,
    tx: &mpsc::Sender<Result<String>>,
) -> Result<()> {
    for iteration in 0..MAX_TOOL_ITERATIONS {
        let mut stream = provider.complete_stream(&request).await?;
        let mut response_text = String::new();
        let mut calls: BTreeMap<u32, PendingCall> = BTreeMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamDelta::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    response_text.push_str(&text);
                    if tx.send(Ok(text)).await.is_err() {
                        debug!("reply receiver dropped, stopping generation");
                        return Ok(());
                    }
                }
                StreamDelta::ToolUse(delta) => {
                    let call = calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        call.id = id;
                    }
                    if let Some(name) = delta.name {
                        call.name = name;
                    }
                    call.arguments.push_str(&delta.input);
                }
            }
        }

        if calls.is_empty() {
            return Ok(());
        }
        debug!(iteration, tools = calls.len(), "model requested tools");

        let calls: Vec<(String, String, serde_json::Value)> = calls
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                let input = serde_json::from_str(&call.arguments).unwrap_or_default();
                (id, call.name, input)
            })
            .collect();

        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !response_text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: response_text.clone(),
            });
        }
        blocks.extend(calls.iter().map(|(id, name, input)| ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        }));
        request.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: MessagePart::Parts(blocks),
        });

        for (id, name, input) in calls {
            let output = toolbox.execute_named(&name, input).await;
            if output.is_error {
                warn!("tool '{name}' failed: {}", output.content);
            }
            request.messages.push(ChatMessage {
                role: ChatRole::Tool,
                content: MessagePart::Parts(vec![ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: output.content,
                }]),
            });
        }

        if !response_text.is_empty() && tx.send(Ok("\n\n".to_string())).await.is_err() {
            return Ok(());
        }
    }

    Err(Error::Agent(format!(
        "tool loop exceeded maximum of {MAX_TOOL_ITERATIONS} iterations"
    )))
}
