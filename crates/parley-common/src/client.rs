//! Client configuration plus the request, response and streaming chunk types.
//!
//! [`Config`] holds connection settings and model defaults. A [`ChatRequest`]
//! is built from a transcript snapshot and per-call [`RequestOptions`]; the
//! provider answers with a [`ChatResponse`] or a stream of [`ChatChunk`]s.
//!
//! # Example
//!
//! ```
//! use parley_common::chat::Message;
//! use parley_common::client::{ChatRequest, Config, RequestOptions, ResponseFormat};
//!
//! let config = Config::default().with_api_key("key").with_temperature(0.7);
//! let options = RequestOptions::new()
//!     .with_max_tokens(2000)
//!     .with_response_format(ResponseFormat::JsonObject);
//!
//! let request = ChatRequest::from((&config, vec![Message::user("Describe Go as JSON")]))
//!     .with_options(&options);
//! assert_eq!(request.temperature, Some(0.7));
//! assert_eq!(request.max_tokens, Some(2000));
//! assert!(request.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{Message, MessageRole};
use crate::features::ThinkingMode;
use crate::tools::{Tool, ToolCallDelta};

/// Provider name used when none is configured.
pub const DEFAULT_PROVIDER: &str = "zai";
/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "glm-4.7-flash";
/// Z.AI chat endpoint root. The OpenAI-compatible form with a trailing
/// slash resolves to the same place.
pub const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/paas/v4";
/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ZHIPU_API_KEY";

/// Request body keys that `extra_body` may not overwrite.
const RESERVED_BODY_KEYS: [&str; 3] = ["model", "messages", "stream"];

/// How the model may pick tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum ToolChoice {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "required")]
    Required,
    Function {
        name: String,
    },
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::None => write!(f, "none"),
            Self::Required => write!(f, "required"),
            Self::Function { name } => write!(f, "{name}"),
        }
    }
}

impl From<ToolChoice> for Value {
    fn from(tool_choice: ToolChoice) -> Self {
        match tool_choice {
            ToolChoice::Auto => Self::String("auto".to_string()),
            ToolChoice::None => Self::String("none".to_string()),
            ToolChoice::Required => Self::String("required".to_string()),
            ToolChoice::Function { name } => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Copy)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    /// Also reported by GLM as `sensitive`.
    ContentFilter,
    NetworkError,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ToolCalls => write!(f, "tool_calls"),
            Self::ContentFilter => write!(f, "content_filter"),
            Self::NetworkError => write!(f, "network_error"),
        }
    }
}

impl FromStr for FinishReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(Self::Stop),
            "length" => Ok(Self::Length),
            "tool_calls" => Ok(Self::ToolCalls),
            "content_filter" | "sensitive" => Ok(Self::ContentFilter),
            "network_error" => Ok(Self::NetworkError),
            _ => anyhow::bail!("Unknown finish reason: {s}"),
        }
    }
}

/// Output format constraint.
///
/// `JsonObject` serializes to `{"type": "json_object"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// Transport-level retry settings for non-streaming requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// No transport retries at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Per-call knobs for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    /// Ask for an incremental fragment stream instead of one message.
    pub stream: bool,
    pub thinking: ThinkingMode,
    /// Extra top-level body fields, passed through verbatim.
    pub extra_body: serde_json::Map<String, Value>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub const fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = Some(response_format);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    #[must_use]
    pub const fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub const fn with_thinking(mut self, thinking: ThinkingMode) -> Self {
        self.thinking = thinking;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_body.insert(key.into(), value);
        self
    }
}

/// A fully specified chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Arc<[Message]>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
    pub thinking: ThinkingMode,
    pub stream: bool,
    pub extra_body: serde_json::Map<String, Value>,
}

impl fmt::Display for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "Error serializing ChatRequest to JSON"),
        }
    }
}

impl ChatRequest {
    pub fn new(messages: impl Into<Arc<[Message]>>) -> Self {
        Self {
            messages: messages.into(),
            model: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            thinking: ThinkingMode::Default,
            stream: false,
            extra_body: serde_json::Map::new(),
        }
    }

    /// Layers per-call options over whatever defaults the request holds.
    #[must_use]
    pub fn with_options(mut self, options: &RequestOptions) -> Self {
        if options.temperature.is_some() {
            self.temperature = options.temperature;
        }
        if options.max_tokens.is_some() {
            self.max_tokens = options.max_tokens;
        }
        if options.top_p.is_some() {
            self.top_p = options.top_p;
        }
        if options.response_format.is_some() {
            self.response_format = options.response_format;
        }
        if !options.tools.is_empty() {
            self.tools = Some(options.tools.clone());
        }
        if options.tool_choice.is_some() {
            self.tool_choice.clone_from(&options.tool_choice);
        }
        if options.thinking != ThinkingMode::Default {
            self.thinking = options.thinking;
        }
        self.stream = options.stream;
        self.extra_body
            .extend(options.extra_body.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    #[must_use]
    pub const fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = Some(response_format);
        self
    }

    #[must_use]
    pub const fn with_thinking(mut self, thinking: ThinkingMode) -> Self {
        self.thinking = thinking;
        self
    }

    #[must_use]
    pub const fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the request has no messages.
    pub fn validate_has_messages(&self) -> anyhow::Result<()> {
        if self.messages.is_empty() {
            anyhow::bail!("Chat request must have at least one message");
        }
        Ok(())
    }

    /// Checks parameter ranges before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first out-of-range parameter.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_has_messages()?;

        if let Some(temp) = self.temperature
            && !(0.0..=2.0).contains(&temp)
        {
            anyhow::bail!("Temperature must be between 0.0 and 2.0, got {temp}");
        }

        if let Some(top_p) = self.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            anyhow::bail!("top_p must be between 0.0 and 1.0, got {top_p}");
        }

        if self.max_tokens == Some(0) {
            anyhow::bail!("max_tokens must be at least 1");
        }

        if let Some(ToolChoice::Function { name }) = &self.tool_choice
            && !self
                .tools
                .iter()
                .flatten()
                .any(|tool| tool.function.name == *name)
        {
            anyhow::bail!("tool_choice names '{name}', which is not among the request's tools");
        }

        if let Some(key) = RESERVED_BODY_KEYS
            .iter()
            .find(|key| self.extra_body.contains_key(**key))
        {
            anyhow::bail!("extra_body may not override '{key}'");
        }

        Ok(())
    }

    #[must_use]
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.stream
    }
}

impl From<(&Config, Arc<[Message]>)> for ChatRequest {
    fn from((config, messages): (&Config, Arc<[Message]>)) -> Self {
        Self {
            model: Some(config.model.clone()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop_sequences.clone(),
            ..Self::new(messages)
        }
    }
}

impl From<(&Config, Vec<Message>)> for ChatRequest {
    fn from((config, messages): (&Config, Vec<Message>)) -> Self {
        (config, Arc::<[Message]>::from(messages)).into()
    }
}

/// A complete, non-streamed answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    pub model: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub created_at: DateTime<Utc>,
    pub response_id: Option<String>,
}

impl fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "Error serializing ChatResponse to JSON"),
        }
    }
}

impl ChatResponse {
    #[must_use]
    pub fn content(&self) -> &str {
        self.message.text()
    }

    #[must_use]
    pub fn reasoning_content(&self) -> Option<&str> {
        self.message.reasoning_content.as_deref()
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }

    /// Decodes a JSON-mode answer. A surrounding Markdown code fence is
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid JSON for `T`.
    pub fn parse_content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(strip_code_fence(self.content()))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end().strip_suffix("```").unwrap_or(rest);

    // An info string such as `json` sits directly after the opening fence.
    let tag_len = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    let (tag, body) = rest.split_at(tag_len);
    if tag.is_empty() || body.trim().is_empty() {
        rest.trim()
    } else {
        body.trim()
    }
}

/// One streamed fragment.
///
/// `delta_content` and `delta_reasoning_content` are the answer and
/// reasoning channels; either, both or neither may be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub model: String,
    pub delta_role: Option<MessageRole>,
    pub delta_content: Option<String>,
    pub delta_reasoning_content: Option<String>,
    pub delta_tool_calls: Option<Vec<ToolCallDelta>>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub response_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatChunk {
    /// A bare chunk for `model` with no deltas.
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            delta_role: None,
            delta_content: None,
            delta_reasoning_content: None,
            delta_tool_calls: None,
            finish_reason: None,
            usage: None,
            response_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.delta_content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.delta_reasoning_content = Some(reasoning.into());
        self
    }
}

/// Connection settings and model defaults for a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    #[serde(skip_serializing, default)]
    pub api_key: Option<SecretString>,
    pub timeout_seconds: Option<u64>,
    #[serde(skip)]
    pub retry_config: RetryConfig,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            timeout_seconds: None,
            retry_config: RetryConfig::default(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop_sequences: None,
        }
    }
}

impl Config {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into().into()));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub fn with_stop_sequences(
        mut self,
        stop_sequences: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.stop_sequences = Some(stop_sequences.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub const fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// True when a non-blank API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
    }

    /// The endpoint root with any trailing slashes removed.
    #[must_use]
    pub fn endpoint_base(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// # Errors
    ///
    /// Returns an error if a sampling default is out of range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("Model name cannot be empty");
        }

        if let Some(temp) = self.temperature
            && !(0.0..=2.0).contains(&temp)
        {
            anyhow::bail!("Temperature must be between 0.0 and 2.0, got {temp}");
        }

        if let Some(top_p) = self.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            anyhow::bail!("top_p must be between 0.0 and 1.0, got {top_p}");
        }

        Ok(())
    }
}
