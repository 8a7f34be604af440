//! Messages and the append-only conversation transcript.
//!
//! # Overview
//!
//! - [`Message`]: one turn, tagged with a [`MessageRole`]
//! - [`Transcript`]: the ordered history sent with every request
//!
//! The transcript only grows. [`Transcript::push`] enforces the tool-call
//! pairing rule: a `tool` message must answer a call made by the assistant
//! message it follows, with nothing but other tool results in between, and
//! each call is answered at most once.
//!
//! # Example
//!
//! ```
//! use parley_common::chat::{Message, Transcript, TranscriptError};
//!
//! let mut transcript = Transcript::new();
//! transcript.push(Message::system("You are a friendly coding assistant.")).unwrap();
//! transcript.push(Message::user("What is a list comprehension?")).unwrap();
//!
//! // A tool result with nothing to answer is rejected and not appended.
//! let orphan = Message::tool("{}", "call_1", "get_weather").unwrap();
//! assert!(matches!(
//!     transcript.push(orphan),
//!     Err(TranscriptError::UnmatchedToolCall { .. })
//! ));
//! assert_eq!(transcript.len(), 2);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::tools::ToolCall;

/// Who produced a message.
///
/// Serializes to the lowercase names used on the wire.
///
/// ```
/// use parley_common::chat::MessageRole;
///
/// let json = serde_json::to_string(&MessageRole::Tool).unwrap();
/// assert_eq!(json, "\"tool\"");
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum MessageRole {
    /// Instructions that steer the model.
    System,
    /// Input from the person driving the session.
    User,
    /// Model output, possibly requesting tool calls.
    Assistant,
    /// The result of running one tool call.
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a transcript.
///
/// `content` is `None` when the model answered only with tool calls.
/// `reasoning_content` holds the model's thinking output when the provider
/// streams or returns one; it is kept for display and never sent back.
///
/// ```
/// use parley_common::chat::{Message, MessageRole};
///
/// let msg = Message::builder()
///     .role(MessageRole::User)
///     .content(Some("Hello!".to_string()))
///     .build();
/// assert_eq!(msg.text(), "Hello!");
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, TypedBuilder)]
pub struct Message {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub role: MessageRole,

    #[builder(default)]
    pub content: Option<String>,

    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,

    /// Calls requested by an assistant message, in provider order.
    #[builder(default)]
    #[serde(default)]
    pub tool_calls: SmallVec<[ToolCall; 2]>,

    /// The call a tool message answers.
    #[builder(default)]
    #[serde(default)]
    pub tool_call_id: Option<String>,

    /// Function name for tool messages.
    #[builder(default)]
    #[serde(default)]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: Some(content.into()),
            reasoning_content: None,
            timestamp: Utc::now(),
            tool_calls: SmallVec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// An assistant message that carries only tool calls.
    pub fn assistant_tool_calls(tool_calls: impl Into<SmallVec<[ToolCall; 2]>>) -> Self {
        Self {
            content: None,
            tool_calls: tool_calls.into(),
            ..Self::new(MessageRole::Assistant, String::new())
        }
    }

    /// A tool result answering `tool_call_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call id or function name is empty.
    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        function_name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let tool_call_id = tool_call_id.into();
        let function_name = function_name.into();
        if tool_call_id.is_empty() {
            anyhow::bail!("Tool call ID cannot be empty");
        }
        if function_name.is_empty() {
            anyhow::bail!("Function name cannot be empty for tool messages");
        }
        let mut msg = Self::new(MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id);
        msg.name = Some(function_name);
        Ok(msg)
    }

    /// Attaches tool calls.
    ///
    /// # Errors
    ///
    /// Returns an error unless this is an assistant message.
    pub fn with_tool_calls(
        mut self,
        tool_calls: impl Into<SmallVec<[ToolCall; 2]>>,
    ) -> anyhow::Result<Self> {
        if self.role != MessageRole::Assistant {
            anyhow::bail!(
                "Tool calls can only be added to assistant messages, found {}",
                self.role
            );
        }
        self.tool_calls = tool_calls.into();
        Ok(self)
    }

    #[must_use]
    pub fn with_reasoning_content(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = Some(reasoning.into());
        self
    }

    /// The text content, or `""` when there is none.
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Why a message could not be appended to a [`Transcript`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TranscriptError {
    #[error("tool messages must carry a tool_call_id")]
    MissingToolCallId,

    #[error(
        "tool message answers '{tool_call_id}', which the preceding assistant message did not request"
    )]
    UnmatchedToolCall { tool_call_id: String },

    #[error("tool call '{tool_call_id}' has already been answered")]
    DuplicateToolResult { tool_call_id: String },

    #[error("only assistant messages may carry tool calls, found {role}")]
    ToolCallsOnNonAssistant { role: MessageRole },
}

/// Ordered, append-only message history owned by one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Appends `message` after checking the tool-call pairing rule.
    ///
    /// # Errors
    ///
    /// Returns a [`TranscriptError`] and leaves the transcript untouched when
    /// a tool result does not answer an open call of the preceding assistant
    /// message, or tool calls sit on a non-assistant message.
    pub fn push(&mut self, message: Message) -> Result<(), TranscriptError> {
        if message.has_tool_calls() && message.role != MessageRole::Assistant {
            return Err(TranscriptError::ToolCallsOnNonAssistant { role: message.role });
        }

        if message.role == MessageRole::Tool {
            let tool_call_id = message
                .tool_call_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or(TranscriptError::MissingToolCallId)?;
            self.check_tool_result(tool_call_id)?;
        }

        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn check_tool_result(&self, tool_call_id: &str) -> Result<(), TranscriptError> {
        let Some((assistant, answered)) = self.open_tool_turn() else {
            return Err(TranscriptError::UnmatchedToolCall {
                tool_call_id: tool_call_id.to_string(),
            });
        };

        if !assistant.tool_calls.iter().any(|tc| tc.id == tool_call_id) {
            return Err(TranscriptError::UnmatchedToolCall {
                tool_call_id: tool_call_id.to_string(),
            });
        }

        if answered
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some(tool_call_id))
        {
            return Err(TranscriptError::DuplicateToolResult {
                tool_call_id: tool_call_id.to_string(),
            });
        }

        Ok(())
    }

    /// The last non-tool message when it is an assistant message, plus the
    /// tool results that follow it.
    fn open_tool_turn(&self) -> Option<(&Message, &[Message])> {
        let start = self
            .messages
            .iter()
            .rposition(|m| m.role != MessageRole::Tool)?;
        let assistant = &self.messages[start];
        (assistant.role == MessageRole::Assistant)
            .then(|| (assistant, &self.messages[start + 1..]))
    }

    /// Calls of the most recent assistant message that have no result yet.
    #[must_use]
    pub fn pending_tool_calls(&self) -> Vec<&ToolCall> {
        self.open_tool_turn()
            .map(|(assistant, answered)| {
                assistant
                    .tool_calls
                    .iter()
                    .filter(|tc| {
                        !answered
                            .iter()
                            .any(|m| m.tool_call_id.as_deref() == Some(tc.id.as_str()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
