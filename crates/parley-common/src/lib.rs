//! # parley-common
//!
//! Shared data model for talking to GLM chat-completion endpoints.
//!
//! This crate carries the types every other parley crate exchanges:
//! - Messages, roles and the append-only [`Transcript`]
//! - Tool definitions, tool calls and streamed tool-call fragments
//! - Request/response/chunk types and client [`Config`]
//! - TOML provider profiles ([`ProviderProfile`])
//!
//! ## Example
//!
//! ```
//! use parley_common::{Message, ToolCall, Transcript};
//! use serde_json::json;
//!
//! let mut transcript = Transcript::new();
//! transcript.push(Message::user("What is the 10th Fibonacci number?")).unwrap();
//!
//! let call = ToolCall::new("calculate_fibonacci", json!({"n": 10}));
//! let call_id = call.id.clone();
//! let assistant = Message::assistant_tool_calls(vec![call]);
//! transcript.push(assistant).unwrap();
//!
//! let result = Message::tool(r#"{"result": 55}"#, call_id, "calculate_fibonacci").unwrap();
//! transcript.push(result).unwrap();
//! assert_eq!(transcript.len(), 3);
//! ```

/// Messages, roles and the append-only transcript.
pub mod chat;
/// Client configuration and request/response types.
pub mod client;
/// Provider feature switches (thinking mode, system prompt presets).
pub mod features;
/// TOML provider profiles and credential resolution.
pub mod profile;
/// Tool definitions and tool calls.
pub mod tools;

pub use chat::{Message, MessageRole, Transcript, TranscriptError};
pub use client::{
    API_KEY_ENV, ChatChunk, ChatRequest, ChatResponse, Config, DEFAULT_BASE_URL, DEFAULT_MODEL,
    DEFAULT_PROVIDER, FinishReason, RequestOptions, ResponseFormat, RetryConfig, ToolChoice, Usage,
};
pub use features::{SystemPrompt, ThinkingMode};
pub use profile::ProviderProfile;
pub use tools::{
    Function, FunctionCall, Parameters, Property, Tool, ToolCall, ToolCallAssembler, ToolCallDelta,
};
