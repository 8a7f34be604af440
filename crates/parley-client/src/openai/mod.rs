//! Wire types for the OpenAI-compatible chat-completions API.
//!
//! GLM endpoints speak this format with two additions: a top-level
//! `thinking` object that switches reasoning output on or off, and a
//! `reasoning_content` field on messages and stream deltas.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use typed_builder::TypedBuilder;

use parley_common::chat::{Message, MessageRole};
use parley_common::client::{ChatRequest, Config, ResponseFormat, Usage};
use parley_common::features::ThinkingMode;
use parley_common::tools::{FunctionCall, Tool, ToolCall};

pub mod client;
pub use client::{OpenAIClient, convert_chunk_to_chat_chunk};

/// A single choice from a chat completion response.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: OpenAIMessage,
    /// `stop`, `length`, `tool_calls`, `sensitive` and so on.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A message in wire form.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct OpenAIMessage {
    pub role: MessageRole,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Read from responses, never sent back to the provider.
    #[builder(default)]
    #[serde(default, skip_serializing)]
    pub reasoning_content: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<SmallVec<[OpenAIToolCall; 2]>>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for OpenAIMessage {
    fn from(message: &Message) -> Self {
        let tool_calls: Option<SmallVec<[OpenAIToolCall; 2]>> = message
            .has_tool_calls()
            .then(|| message.tool_calls.iter().map(OpenAIToolCall::from).collect());

        // Assistant turns that only call tools go out without content.
        let content = message
            .content
            .clone()
            .filter(|c| !(c.is_empty() && tool_calls.is_some()));

        Self::builder()
            .role(message.role)
            .content(content)
            .name(message.name.clone())
            .tool_calls(tool_calls)
            .tool_call_id(message.tool_call_id.clone())
            .build()
    }
}

impl OpenAIMessage {
    /// Converts a response message into the common form.
    ///
    /// Argument text is parsed here; text that is not JSON is kept as a
    /// JSON string so the tool can report on it.
    #[must_use]
    pub fn into_message(self) -> Message {
        let tool_calls: SmallVec<[ToolCall; 2]> = self
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(ToolCall::from)
            .collect();

        Message::builder()
            .role(self.role)
            .content(self.content)
            .reasoning_content(self.reasoning_content.filter(|r| !r.is_empty()))
            .tool_calls(tool_calls)
            .tool_call_id(self.tool_call_id)
            .name(self.name)
            .build()
    }
}

/// A tool call in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub r#type: String,
    pub function: OpenAIFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

impl From<&ToolCall> for OpenAIToolCall {
    fn from(tool_call: &ToolCall) -> Self {
        Self {
            id: tool_call.id.clone(),
            r#type: tool_call.call_type.clone(),
            function: OpenAIFunction::from(&tool_call.function),
        }
    }
}

impl From<OpenAIToolCall> for ToolCall {
    fn from(wire: OpenAIToolCall) -> Self {
        Self {
            id: wire.id,
            function: FunctionCall::from_raw(wire.function.name, &wire.function.arguments),
            call_type: wire.r#type,
        }
    }
}

/// Function name plus arguments as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl From<&FunctionCall> for OpenAIFunction {
    fn from(function_call: &FunctionCall) -> Self {
        Self {
            name: function_call.name.clone(),
            arguments: function_call.arguments_json(),
        }
    }
}

/// GLM's `thinking` switch: `{"type": "enabled"}` or `{"type": "disabled"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ThinkingConfig {
    #[must_use]
    pub fn for_mode(mode: ThinkingMode) -> Option<Self> {
        mode.wire_type().map(|kind| Self {
            kind: kind.to_string(),
        })
    }
}

/// Request body for `POST {base}/chat/completions`.
///
/// ```
/// use parley_client::openai::{ChatCompletionRequest, OpenAIMessage};
/// use parley_common::MessageRole;
///
/// let request = ChatCompletionRequest::builder()
///     .model("glm-4.7-flash".to_string())
///     .messages(vec![
///         OpenAIMessage::builder()
///             .role(MessageRole::User)
///             .content(Some("Hello".to_string()))
///             .build(),
///     ])
///     .temperature(Some(0.7))
///     .build();
/// assert_eq!(request.stream, Some(false));
/// ```
#[derive(Debug, Clone, Serialize, TypedBuilder)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[builder(default = Some(false))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    /// Vendor fields merged into the top level of the body.
    #[builder(default)]
    #[serde(flatten)]
    pub extra_body: Map<String, Value>,
}

impl From<(&ChatRequest, &Config)> for ChatCompletionRequest {
    fn from((request, config): (&ChatRequest, &Config)) -> Self {
        let messages = request.messages.iter().map(OpenAIMessage::from).collect();

        // `text` is the provider default; only a non-default format is sent.
        let response_format = request
            .response_format
            .filter(|format| *format != ResponseFormat::Text);

        Self::builder()
            .model(
                request
                    .model
                    .clone()
                    .unwrap_or_else(|| config.model.clone()),
            )
            .messages(messages)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .top_p(request.top_p)
            .stop(request.stop.clone())
            .stream(Some(request.stream))
            .tools(request.tools.clone().filter(|tools| !tools.is_empty()))
            .tool_choice(request.tool_choice.clone().map(Into::into))
            .response_format(response_format)
            .thinking(ThinkingConfig::for_mode(request.thinking))
            .extra_body(request.extra_body.clone())
            .build()
    }
}

/// Response body of a non-streamed completion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A single choice from a streaming chunk.
#[derive(Debug, Deserialize)]
pub struct ChatStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: OpenAIMessageDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message update carried by one SSE event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAIMessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<SmallVec<[OpenAIToolCallDelta; 2]>>,
}

/// Tool call fragment; fragments with the same `index` form one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatStreamChoice>,
    /// Usually only on the final chunk.
    #[serde(default)]
    pub usage: Option<Usage>,
}
