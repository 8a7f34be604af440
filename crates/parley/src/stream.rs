//! Streaming replies.
//!
//! A [`ResponseStream`] hands fragments to the caller as the provider sends
//! them and, once the provider finishes, appends the rebuilt assistant
//! message to the session transcript. [`PhaseTracker`] is the display
//! helper for the reasoning and answer channels.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use log::{debug, error, warn};

use parley_client::{ChunkStream, ClientError};
use parley_common::chat::{Message, MessageRole, Transcript};
use parley_common::client::{ChatChunk, ChatResponse, FinishReason, Usage};
use parley_common::tools::ToolCallAssembler;

use crate::error::SessionError;
use crate::session::SessionState;

/// Folds fragments into one assistant message.
#[derive(Debug, Default)]
struct ResponseAccumulator {
    chunks: usize,
    role: Option<MessageRole>,
    content: String,
    reasoning: String,
    tool_calls: ToolCallAssembler,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    model: String,
    response_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl ResponseAccumulator {
    fn push(&mut self, chunk: &ChatChunk) {
        self.chunks += 1;

        if self.role.is_none() {
            self.role = chunk.delta_role;
        }
        if let Some(content) = &chunk.delta_content {
            self.content.push_str(content);
        }
        if let Some(reasoning) = &chunk.delta_reasoning_content {
            self.reasoning.push_str(reasoning);
        }
        if let Some(deltas) = &chunk.delta_tool_calls {
            debug!("Received {} tool call delta(s)", deltas.len());
            self.tool_calls.extend(deltas);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
        if chunk.usage.is_some() {
            self.usage.clone_from(&chunk.usage);
        }
        if !chunk.model.is_empty() {
            self.model.clone_from(&chunk.model);
        }
        if self.response_id.is_none() {
            self.response_id.clone_from(&chunk.response_id);
        }
        self.created_at.get_or_insert(chunk.created_at);
    }

    fn into_response(self) -> ChatResponse {
        let tool_calls = self.tool_calls.finish();
        let content = (!self.content.is_empty() || tool_calls.is_empty()).then_some(self.content);

        let message = Message::builder()
            .role(self.role.unwrap_or(MessageRole::Assistant))
            .content(content)
            .reasoning_content((!self.reasoning.is_empty()).then_some(self.reasoning))
            .tool_calls(tool_calls)
            .build();

        ChatResponse {
            message,
            model: self.model,
            usage: self.usage,
            finish_reason: self.finish_reason,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            response_id: self.response_id,
        }
    }
}

/// A live streamed reply.
///
/// Yields every fragment the provider sends. When the provider ends the
/// stream the reconstructed message is appended to the transcript and the
/// stream yields `None`. An error ends the stream and fails the session.
/// Dropping the stream early releases the connection, appends nothing and
/// leaves the session `Failed`.
#[must_use = "streams do nothing unless polled"]
pub struct ResponseStream<'a> {
    inner: ChunkStream,
    transcript: &'a mut Transcript,
    state: &'a mut SessionState,
    accumulator: ResponseAccumulator,
    done: bool,
    response: Option<ChatResponse>,
}

impl<'a> ResponseStream<'a> {
    pub(crate) fn new(
        inner: ChunkStream,
        transcript: &'a mut Transcript,
        state: &'a mut SessionState,
    ) -> Self {
        Self {
            inner,
            transcript,
            state,
            accumulator: ResponseAccumulator::default(),
            done: false,
            response: None,
        }
    }

    /// Answer text received so far.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.accumulator.content
    }

    /// Reasoning text received so far.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.accumulator.reasoning
    }

    /// The full reply, once the stream has ended successfully.
    #[must_use]
    pub const fn response(&self) -> Option<&ChatResponse> {
        self.response.as_ref()
    }

    /// Drains the remaining fragments and returns the full reply.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream produced.
    pub async fn collect_response(mut self) -> Result<ChatResponse, SessionError> {
        while let Some(item) = self.next().await {
            item?;
        }
        self.response.take().ok_or_else(|| {
            SessionError::InvalidState("stream ended without a response".to_string())
        })
    }

    fn fail(&mut self, error: ClientError) -> SessionError {
        self.done = true;
        *self.state = SessionState::Failed;

        if error.is_transport_error() {
            error!("Stream interrupted after {} fragment(s): {error}", self.accumulator.chunks);
            SessionError::StreamInterrupted(error)
        } else {
            error!("Stream failed: {error}");
            SessionError::from(error)
        }
    }

    fn finish(&mut self) -> Result<(), SessionError> {
        self.done = true;

        if self.accumulator.chunks == 0 {
            *self.state = SessionState::Failed;
            return Err(SessionError::Provider(ClientError::InvalidResponse(
                "stream ended without any chunks".to_string(),
            )));
        }

        let response = std::mem::take(&mut self.accumulator).into_response();
        if response.message.role != MessageRole::Assistant {
            *self.state = SessionState::Failed;
            return Err(SessionError::Provider(ClientError::InvalidResponse(format!(
                "expected an assistant reply, got role {}",
                response.message.role
            ))));
        }
        if let Err(e) = self.transcript.push(response.message.clone()) {
            *self.state = SessionState::Failed;
            return Err(e.into());
        }

        *self.state = SessionState::after_reply(&response.message);
        debug!(
            "Stream completed: {} chars of content, {} tool call(s), finish reason {:?}",
            response.content().len(),
            response.message.tool_calls.len(),
            response.finish_reason
        );
        self.response = Some(response);
        Ok(())
    }
}

impl Stream for ResponseStream<'_> {
    type Item = Result<ChatChunk, SessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.accumulator.push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(this.fail(e)))),
            Poll::Ready(None) => match this.finish() {
                Ok(()) => Poll::Ready(None),
                Err(e) => Poll::Ready(Some(Err(e))),
            },
        }
    }
}

impl Drop for ResponseStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                "Stream dropped after {} fragment(s) before the provider finished",
                self.accumulator.chunks
            );
            *self.state = SessionState::Failed;
        }
    }
}

/// Which channel a streamed reply is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    /// Nothing shown yet.
    #[default]
    Waiting,
    Reasoning,
    Answer,
}

/// Tracks the reasoning → answer switch for display.
///
/// The phase only moves forward. Reasoning that arrives after the answer
/// has started is counted in [`PhaseTracker::late_reasoning`] and logged,
/// but does not switch the display back.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phase: StreamPhase,
    late_reasoning: usize,
}

impl PhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Number of reasoning fragments seen after the answer began.
    #[must_use]
    pub const fn late_reasoning(&self) -> usize {
        self.late_reasoning
    }

    /// Feeds one fragment; returns the new phase when it changes.
    ///
    /// Empty strings do not count as the channel being present.
    pub fn observe(&mut self, chunk: &ChatChunk) -> Option<StreamPhase> {
        let has_reasoning = chunk
            .delta_reasoning_content
            .as_deref()
            .is_some_and(|r| !r.is_empty());
        let has_content = chunk
            .delta_content
            .as_deref()
            .is_some_and(|c| !c.is_empty());

        let previous = self.phase;
        match self.phase {
            StreamPhase::Waiting | StreamPhase::Reasoning if has_content => {
                self.phase = StreamPhase::Answer;
            }
            StreamPhase::Waiting if has_reasoning => {
                self.phase = StreamPhase::Reasoning;
            }
            StreamPhase::Answer if has_reasoning => {
                self.late_reasoning += 1;
                warn!("Reasoning fragment arrived after the answer started");
            }
            _ => {}
        }

        (self.phase != previous).then_some(self.phase)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn content(text: &str) -> ChatChunk {
        ChatChunk::empty("glm-4.7-flash").with_content(text)
    }

    fn reasoning(text: &str) -> ChatChunk {
        ChatChunk::empty("glm-4.7-flash").with_reasoning(text)
    }

    #[test]
    fn test_phase_reasoning_then_answer() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), StreamPhase::Waiting);

        assert_eq!(tracker.observe(&reasoning("Let me")), Some(StreamPhase::Reasoning));
        assert_eq!(tracker.observe(&reasoning(" think")), None);
        assert_eq!(tracker.observe(&content("Hello")), Some(StreamPhase::Answer));
        assert_eq!(tracker.observe(&content(", world")), None);
        assert_eq!(tracker.late_reasoning(), 0);
    }

    #[test]
    fn test_phase_answer_without_reasoning() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.observe(&content("Hi")), Some(StreamPhase::Answer));
    }

    #[test]
    fn test_phase_ignores_empty_fragments() {
        let mut tracker = PhaseTracker::new();
        let chunk = reasoning("Hmm").with_content("");
        assert_eq!(tracker.observe(&chunk), Some(StreamPhase::Reasoning));
        assert_eq!(tracker.observe(&reasoning("")), None);
    }

    #[test]
    fn test_phase_late_reasoning_is_flagged_not_reverted() {
        let mut tracker = PhaseTracker::new();
        tracker.observe(&reasoning("first"));
        tracker.observe(&content("answer"));

        assert_eq!(tracker.observe(&reasoning("second thoughts")), None);
        assert_eq!(tracker.phase(), StreamPhase::Answer);
        assert_eq!(tracker.late_reasoning(), 1);
    }

    #[test]
    fn test_accumulator_rebuilds_message() {
        let mut acc = ResponseAccumulator::default();
        for chunk in [
            reasoning("a"),
            reasoning("b"),
            content("Hel"),
            content("lo, "),
            content("world"),
        ] {
            acc.push(&chunk);
        }
        let mut last = ChatChunk::empty("glm-4.7-flash");
        last.finish_reason = Some(FinishReason::Stop);
        acc.push(&last);

        let response = acc.into_response();
        assert_eq!(response.content(), "Hello, world");
        assert_eq!(response.reasoning_content(), Some("ab"));
        assert_eq!(response.message.role, MessageRole::Assistant);
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert!(!response.has_tool_calls());
    }
}
