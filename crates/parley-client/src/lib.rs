//! # parley-client
//!
//! Client library for GLM chat-completion endpoints.
//!
//! The [`LLMClient`] trait is the seam the conversation session talks to.
//! [`OpenAIClient`] implements it for Z.AI and any other endpoint that
//! speaks the OpenAI chat-completions wire format, including SSE streaming
//! with separate reasoning and answer channels.
//!
//! ## Example
//!
//! ```no_run
//! use parley_client::{LLMClient, OpenAIClient};
//! use parley_common::{ChatRequest, Config, Message};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default()
//!     .with_api_key(std::env::var("ZHIPU_API_KEY")?)
//!     .with_temperature(0.7)
//!     .with_max_tokens(2000);
//!
//! let client = OpenAIClient::new(config)?;
//!
//! let messages = vec![
//!     Message::system("You are a friendly AI coding assistant."),
//!     Message::user("Write a Fibonacci function in Python."),
//! ];
//! let request = ChatRequest::from((client.config(), messages));
//!
//! let response = client.chat(&request).await?;
//! println!("{}", response.content());
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest_eventsource::retry::RetryPolicy;

use parley_common::{ChatChunk, ChatRequest, ChatResponse, Config};

pub mod error;
pub mod openai;

pub use error::ClientError;
pub use openai::OpenAIClient;

/// Stream of fragments produced by [`LLMClient::chat_stream`].
///
/// The stream is lazy and cannot be restarted; it ends when the provider
/// finishes or after the first error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, ClientError>> + Send>>;

/// A chat-completion provider.
#[must_use = "LLMClient must be used to make requests"]
#[async_trait]
pub trait LLMClient: Send + Sync {
    fn config(&self) -> &Config;

    /// Sends `request` and waits for the whole answer.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;

    /// Sends `request` and returns the answer as a fragment stream.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ClientError>;

    fn supports_tools(&self) -> bool;

    fn supports_streaming(&self) -> bool;

    /// Rejects requests this client cannot or should not send.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRequest`] for out-of-range parameters,
    /// or the matching `*NotSupported` variant.
    fn validate_request(&self, request: &ChatRequest) -> Result<(), ClientError> {
        request
            .validate()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        if !self.supports_tools() && request.has_tools() {
            return Err(ClientError::ToolsNotSupported);
        }

        if !self.supports_streaming() && request.is_streaming() {
            return Err(ClientError::StreamingNotSupported);
        }

        Ok(())
    }
}

/// Event-source retry policy that never reconnects.
///
/// A reconnect would replay the request and duplicate fragments the caller
/// already consumed.
pub(crate) struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn retry(
        &self,
        _error: &reqwest_eventsource::Error,
        _last_retry: Option<(usize, Duration)>,
    ) -> Option<Duration> {
        None
    }

    fn set_reconnection_time(&mut self, _duration: Duration) {}
}
