pub mod calc;
pub mod fallback;
pub mod forecast;
pub mod guard;
pub mod normalize;
pub mod openai;
pub mod providers;
pub mod runtime;
pub mod structured;
pub mod tools;

pub use calc::{ExprError, evaluate};
pub use fallback::{Fallback, FallbackRouter, Intent};
pub use forecast::{
    Engine, ForecastEngine, ForecastResult, Metric, RemotePredictor, SeriesWindow, clamp_horizon,
};
pub use guard::{CompletionGuard, GuardOutcome, GuardState, TextStream};
pub use normalize::normalize_city;
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, Completion, ContentBlock, LlmProvider, LlmRequest, LlmStream,
    MessagePart, ReplyFormat, StreamDelta, ToolDefinition, ToolUseDelta,
};
pub use runtime::{AgentRuntime, ChatOptions};
pub use structured::{Sentiment, TextAnalysis};
pub use tools::{OpenMeteoProvider, ToolCall, ToolKind, ToolOutput, Toolbox, WeatherProvider};
