//! OpenAI-compatible client for GLM chat completions.
//!
//! # Features
//!
//! - **Chat Completions**: `POST {base}/chat/completions` with Bearer auth
//! - **Streaming**: SSE with separate `reasoning_content` and `content` channels
//! - **Tool Calling**: tool definitions out, tool calls and their fragments back
//! - **Transport Retries**: exponential backoff for non-streamed requests only
//! - **Secure API Keys**: the key lives in a [`SecretString`] and is redacted from `Debug`
//!
//! # Examples
//!
//! ```no_run
//! use futures::StreamExt;
//! use parley_client::{LLMClient, OpenAIClient};
//! use parley_common::{ChatRequest, Config, Message, ThinkingMode};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = OpenAIClient::new(Config::default().with_api_key("your-key"))?;
//!
//! let request = ChatRequest::from((client.config(), vec![Message::user("Explain recursion")]))
//!     .with_thinking(ThinkingMode::Enabled)
//!     .with_streaming(true);
//!
//! let mut stream = client.chat_stream(&request).await?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     if let Some(reasoning) = chunk.delta_reasoning_content {
//!         print!("{reasoning}");
//!     }
//!     if let Some(content) = chunk.delta_content {
//!         print!("{content}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! - **Missing key or bad base URL**: [`ClientError::ConfigurationError`] from [`OpenAIClient::new`]
//! - **401/403**: [`ClientError::AuthenticationError`]
//! - **429**: [`ClientError::RateLimitError`], with `Retry-After` when the provider sends one
//! - **5xx**: [`ClientError::ServiceUnavailable`]
//! - **Empty choice list**: [`ClientError::InvalidResponse`]
//! - **Connection lost mid-stream**: [`ClientError::EventSourceError`]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use log::{debug, error, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest_eventsource::{Event, EventSource};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_retry_after::RetryAfterMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use parley_common::chat::MessageRole;
use parley_common::client::{ChatChunk, ChatRequest, ChatResponse, Config};
use parley_common::tools::ToolCallDelta;

use crate::error::{ClientError, extract_error_message};
use crate::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::{ChunkStream, LLMClient, NoRetryPolicy};

const CHAT_COMPLETIONS: &str = "chat/completions";

/// Client for GLM and other OpenAI-compatible endpoints.
///
/// Cloning is cheap; clones share connection pools and configuration.
#[derive(Clone)]
pub struct OpenAIClient {
    client: ClientWithMiddleware,
    streaming_client: reqwest::Client,
    api_key: Arc<SecretString>,
    base_url: String,
    config: Arc<Config>,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Converts one wire chunk into the common fragment type.
#[must_use]
pub fn convert_chunk_to_chat_chunk(chunk: &ChatCompletionChunk) -> ChatChunk {
    let choice = chunk.choices.first();

    let delta_content = choice.and_then(|c| c.delta.content.clone());
    let delta_reasoning_content = choice.and_then(|c| c.delta.reasoning_content.clone());
    let delta_role = choice.and_then(|c| c.delta.role);
    let finish_reason = choice
        .and_then(|c| c.finish_reason.as_ref())
        .and_then(|reason| reason.parse().ok());

    let delta_tool_calls = choice
        .and_then(|c| c.delta.tool_calls.as_ref())
        .map(|deltas| {
            deltas
                .iter()
                .map(|delta| ToolCallDelta {
                    index: delta.index,
                    id: delta.id.clone(),
                    call_type: delta.r#type.clone(),
                    name: delta.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: delta.function.as_ref().and_then(|f| f.arguments.clone()),
                })
                .collect()
        });

    ChatChunk {
        model: chunk.model.clone(),
        delta_role,
        delta_content,
        delta_reasoning_content,
        delta_tool_calls,
        finish_reason,
        usage: chunk.usage.clone(),
        response_id: (!chunk.id.is_empty()).then(|| chunk.id.clone()),
        created_at: timestamp(chunk.created),
    }
}

fn timestamp(created: u64) -> DateTime<Utc> {
    i64::try_from(created)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl OpenAIClient {
    /// Creates a client from `config`.
    ///
    /// ```no_run
    /// use parley_client::OpenAIClient;
    /// use parley_common::Config;
    ///
    /// let config = Config::default()
    ///     .with_api_key("your-key")
    ///     .with_base_url("https://open.bigmodel.cn/api/paas/v4/");
    ///
    /// let client = OpenAIClient::new(config)?;
    /// # Ok::<(), parley_client::ClientError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigurationError`] if the API key is missing
    /// or blank, a sampling default is out of range, or the base URL does not
    /// parse. Nothing is sent over the network.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                ClientError::ConfigurationError(
                    "API key is required but was missing or empty".to_string(),
                )
            })?;

        config
            .validate()
            .map_err(|e| ClientError::ConfigurationError(e.to_string()))?;

        let base_url = config.endpoint_base().to_string();
        url::Url::parse(&base_url).map_err(|e| {
            ClientError::ConfigurationError(format!("Invalid base URL '{base_url}': {e}"))
        })?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(
                config.retry_config.initial_delay,
                config.retry_config.max_delay,
            )
            .build_with_max_retries(config.retry_config.max_retries);

        // A total timeout would cut long streams off, so the streaming
        // client only bounds the connect phase.
        let (reqwest_client, streaming_client) = match config.timeout_seconds {
            Some(timeout) => (
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(timeout))
                    .build()?,
                reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(timeout))
                    .build()?,
            ),
            None => {
                let client = reqwest::Client::builder().build()?;
                (client.clone(), client)
            }
        };

        // RetryAfterMiddleware goes first so Retry-After wins over backoff.
        let client = reqwest_middleware::ClientBuilder::new(reqwest_client)
            .with(RetryAfterMiddleware::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        debug!(
            "Created {} client for model {} at {}",
            config.provider, config.model, base_url
        );

        Ok(Self {
            client,
            streaming_client,
            api_key: Arc::new(api_key),
            base_url,
            config: Arc::new(config),
        })
    }

    /// Overrides the model used when a request does not name one.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }

    async fn make_request<T: for<'de> Deserialize<'de>, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = self.endpoint(path);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let error_text = response.text().await.map_err(|e| {
                warn!("Failed to read error response body: {e}");
                ClientError::NetworkError(e)
            })?;
            let error_message = extract_error_message(&error_text);

            error!(
                "API request failed with status {}: {}",
                status.as_u16(),
                error_message
            );

            return Err(ClientError::from_status(
                status.as_u16(),
                error_message,
                retry_after,
            ));
        }

        let response_text = response.text().await?;
        debug!("Raw API response: {response_text}");
        Ok(serde_json::from_str(&response_text)?)
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    fn config(&self) -> &Config {
        &self.config
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        self.validate_request(request)?;

        let mut openai_request = ChatCompletionRequest::from((request, self.config.as_ref()));
        openai_request.stream = Some(false);

        let response: ChatCompletionResponse =
            self.make_request(CHAT_COMPLETIONS, &openai_request).await?;

        let Some(choice) = response.choices.into_iter().next() else {
            warn!(
                "Received empty choices array from API. Response ID: {}, Model: {}",
                response.id, response.model
            );
            return Err(ClientError::InvalidResponse(
                "API returned no choices in response".to_string(),
            ));
        };

        let finish_reason = choice
            .finish_reason
            .as_ref()
            .and_then(|reason| reason.parse().ok());

        let model = if response.model.is_empty() {
            openai_request.model
        } else {
            response.model
        };

        let message = choice.message.into_message();
        if message.role != MessageRole::Assistant {
            error!("Expected an assistant reply, got role {}", message.role);
            return Err(ClientError::InvalidResponse(format!(
                "expected an assistant reply, got role {}",
                message.role
            )));
        }

        Ok(ChatResponse {
            message,
            model,
            usage: response.usage,
            finish_reason,
            created_at: timestamp(response.created),
            response_id: (!response.id.is_empty()).then_some(response.id),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ClientError> {
        self.validate_request(request)?;

        let mut openai_request = ChatCompletionRequest::from((request, self.config.as_ref()));
        openai_request.stream = Some(true);

        // No retry middleware here: a replayed request would duplicate
        // fragments the caller has already seen.
        let request_builder = self
            .streaming_client
            .post(self.endpoint(CHAT_COMPLETIONS))
            .header(AUTHORIZATION, self.bearer())
            .json(&openai_request);

        let mut event_source = EventSource::new(request_builder).map_err(|e| {
            ClientError::ConfigurationError(format!("Failed to create event source: {e}"))
        })?;
        event_source.set_retry_policy(Box::new(NoRetryPolicy));

        // Set once the provider signals a proper end, so a bare connection
        // close can be told apart from a finished answer.
        let finished = Arc::new(AtomicBool::new(false));

        let stream = event_source.filter_map(move |event| {
            let finished = Arc::clone(&finished);
            async move {
                match event {
                    Ok(Event::Open) => {
                        debug!("Stream connection opened");
                        None
                    }
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == "[DONE]" {
                            debug!("Stream completed with [DONE] marker");
                            finished.store(true, Ordering::Relaxed);
                            return None;
                        }

                        match serde_json::from_str::<ChatCompletionChunk>(&message.data) {
                            Ok(chunk) => {
                                let chat_chunk = convert_chunk_to_chat_chunk(&chunk);
                                if chat_chunk.finish_reason.is_some() {
                                    finished.store(true, Ordering::Relaxed);
                                }
                                Some(Ok(chat_chunk))
                            }
                            Err(e) => {
                                warn!("Failed to parse streaming chunk: {e}");
                                debug!("Problematic chunk data: {}", message.data);
                                Some(Err(ClientError::SerializationError(e)))
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded)
                        if finished.load(Ordering::Relaxed) =>
                    {
                        debug!("Stream ended normally");
                        None
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => {
                        error!("Stream closed before the provider finished its answer");
                        Some(Err(ClientError::EventSourceError(
                            reqwest_eventsource::Error::StreamEnded,
                        )))
                    }
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let retry_after = retry_after_header(response.headers());
                        let body = response.text().await.unwrap_or_default();
                        let message = extract_error_message(&body);
                        error!(
                            "Streaming request failed with status {}: {}",
                            status.as_u16(),
                            message
                        );
                        Some(Err(ClientError::from_status(
                            status.as_u16(),
                            message,
                            retry_after,
                        )))
                    }
                    Err(reqwest_eventsource::Error::InvalidContentType(content_type, _)) => {
                        error!("Unexpected stream content type: {content_type:?}");
                        Some(Err(ClientError::InvalidResponse(format!(
                            "expected text/event-stream, got {content_type:?}"
                        ))))
                    }
                    Err(e) => {
                        error!("Stream error: {e}");
                        Some(Err(ClientError::EventSourceError(e)))
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use futures::TryStreamExt;
    use parley_common::chat::{Message, MessageRole};
    use parley_common::client::{FinishReason, RetryConfig};
    use parley_common::features::ThinkingMode;
    use parley_common::tools::{Parameters, Tool, ToolCallAssembler};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: &str) -> Config {
        Config::default()
            .with_api_key("test-key")
            .with_base_url(base_url)
            .with_retry_config(RetryConfig::disabled())
    }

    fn create_test_request() -> ChatRequest {
        ChatRequest::new(vec![
            Message::system("You are a friendly AI coding assistant."),
            Message::user("Hello"),
        ])
    }

    fn sse_body(events: &[serde_json::Value], done: bool) -> String {
        let mut body: String = events
            .iter()
            .map(|event| format!("data: {event}\n\n"))
            .collect();
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        body
    }

    fn delta_event(delta: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
        json!({
            "id": "chatcmpl-stream",
            "created": 1_700_000_000,
            "model": "glm-4.7-flash",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        })
    }

    #[test]
    fn test_new_requires_api_key() {
        let err = OpenAIClient::new(Config::default()).unwrap_err();
        assert!(err.is_configuration_error());

        let err = OpenAIClient::new(Config::default().with_api_key("   ")).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let config = Config::default()
            .with_api_key("k")
            .with_base_url("not a url");
        assert!(OpenAIClient::new(config).unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = OpenAIClient::new(Config::default().with_api_key("super-secret")).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_trailing_slash_base_url_normalized() {
        let client = OpenAIClient::new(create_test_config("https://api.z.ai/api/paas/v4/")).unwrap();
        assert_eq!(client.base_url(), "https://api.z.ai/api/paas/v4");
        assert_eq!(
            client.endpoint(CHAT_COMPLETIONS),
            "https://api.z.ai/api/paas/v4/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_successful_chat_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"model": "glm-4.7-flash", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "created": 1_700_000_000,
                "model": "glm-4.7-flash",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "Hello! How can I help you today?"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 20,
                    "total_tokens": 30
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let response = client.chat(&create_test_request()).await.unwrap();

        assert_eq!(response.model, "glm-4.7-flash");
        assert_eq!(response.content(), "Hello! How can I help you today?");
        assert_eq!(response.message.role, MessageRole::Assistant);
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.response_id.as_deref(), Some("chatcmpl-123"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 30);
    }

    #[tokio::test]
    async fn test_chat_completion_with_reasoning_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"thinking": {"type": "enabled"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-think",
                "created": 1_700_000_000,
                "model": "glm-4.7-flash",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "42",
                        "reasoning_content": "Six times seven."
                    },
                    "finish_reason": "stop"
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let request = create_test_request().with_thinking(ThinkingMode::Enabled);
        let response = client.chat(&request).await.unwrap();

        assert_eq!(response.content(), "42");
        assert_eq!(response.reasoning_content(), Some("Six times seven."));
    }

    #[tokio::test]
    async fn test_chat_completion_with_tool_calls() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"tools": [{"type": "function"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-tools",
                "created": 1_700_000_000,
                "model": "glm-4.7-flash",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc123",
                            "type": "function",
                            "function": {
                                "name": "get_weather",
                                "arguments": "{\"location\": \"Beijing\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let tool = Tool::function("get_weather", "Get the weather", Parameters::empty());
        let request = create_test_request().with_tools(vec![tool]);
        let response = client.chat(&request).await.unwrap();

        assert!(response.has_tool_calls());
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        let call = &response.message.tool_calls[0];
        assert_eq!(call.id, "call_abc123");
        assert_eq!(call.name(), "get_weather");
        assert_eq!(call.function.arguments, json!({"location": "Beijing"}));
    }

    #[tokio::test]
    async fn test_authentication_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "1000", "message": "Invalid API key"}
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(err.is_authentication_error());
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[tokio::test]
    async fn test_rate_limit_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "1302", "message": "Rate limit reached"}
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::RateLimitError { .. }));
        assert!(err.to_string().contains("Rate limit"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::ServiceUnavailable(ref m) if m == "upstream exploded"));
    }

    #[tokio::test]
    async fn test_bad_request_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "1214", "message": "messages parameter invalid"}
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::RequestError { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_empty_choices_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-empty",
                "created": 1_700_000_000,
                "model": "glm-4.7-flash",
                "choices": []
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidResponse(_)));
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn test_non_assistant_reply_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-tool",
                "created": 1_700_000_000,
                "model": "glm-4.7-flash",
                "choices": [{
                    "index": 0,
                    "message": {"role": "tool", "content": "55"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidResponse(_)));
        assert!(err.to_string().contains("role tool"));
    }

    #[tokio::test]
    async fn test_malformed_json_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let err = client.chat(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, ClientError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_never_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let request = create_test_request().with_temperature(5.0);
        let err = client.chat(&request).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_streaming_reasoning_then_content() {
        let mock_server = MockServer::start().await;

        let body = sse_body(
            &[
                delta_event(json!({"role": "assistant", "reasoning_content": "Let me "}), None),
                delta_event(json!({"reasoning_content": "think."}), None),
                delta_event(json!({"content": "Hello"}), None),
                delta_event(json!({"content": ", world"}), Some("stop")),
            ],
            true,
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let request = create_test_request().with_streaming(true);
        let chunks: Vec<ChatChunk> = client
            .chat_stream(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].delta_role, Some(MessageRole::Assistant));

        let reasoning: String = chunks
            .iter()
            .filter_map(|c| c.delta_reasoning_content.as_deref())
            .collect();
        let content: String = chunks
            .iter()
            .filter_map(|c| c.delta_content.as_deref())
            .collect();
        assert_eq!(reasoning, "Let me think.");
        assert_eq!(content, "Hello, world");
        assert_eq!(chunks[3].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_streaming_tool_call_fragments() {
        let mock_server = MockServer::start().await;

        let body = sse_body(
            &[
                delta_event(
                    json!({"tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculate_fibonacci", "arguments": "{\"n\":"}
                    }]}),
                    None,
                ),
                delta_event(
                    json!({"tool_calls": [{"index": 0, "function": {"arguments": " 10}"}}]}),
                    Some("tool_calls"),
                ),
            ],
            true,
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let chunks: Vec<ChatChunk> = client
            .chat_stream(&create_test_request().with_streaming(true))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let mut assembler = ToolCallAssembler::new();
        for chunk in &chunks {
            if let Some(deltas) = &chunk.delta_tool_calls {
                assembler.extend(deltas);
            }
        }
        let calls = assembler.finish();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name(), "calculate_fibonacci");
        assert_eq!(calls[0].function.arguments, json!({"n": 10}));
    }

    #[tokio::test]
    async fn test_streaming_connection_drop_is_error() {
        let mock_server = MockServer::start().await;

        let body = sse_body(&[delta_event(json!({"content": "Partial"}), None)], false);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let results: Vec<Result<ChatChunk, ClientError>> = client
            .chat_stream(&create_test_request().with_streaming(true))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].as_ref().unwrap().delta_content.as_deref(),
            Some("Partial")
        );
        let err = results[1].as_ref().unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_streaming_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "1000", "message": "Invalid API key"}
            })))
            .mount(&mock_server)
            .await;

        let client = OpenAIClient::new(create_test_config(&mock_server.uri())).unwrap();
        let results: Vec<Result<ChatChunk, ClientError>> = client
            .chat_stream(&create_test_request().with_streaming(true))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert!(err.is_authentication_error());
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[test]
    fn test_convert_chunk_without_choices() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "chatcmpl-usage",
            "created": 1_700_000_000,
            "model": "glm-4.7-flash",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }))
        .unwrap();

        let converted = convert_chunk_to_chat_chunk(&chunk);
        assert!(converted.delta_content.is_none());
        assert!(converted.finish_reason.is_none());
        assert_eq!(converted.usage.unwrap().total_tokens, 12);
        assert_eq!(converted.response_id.as_deref(), Some("chatcmpl-usage"));
    }
}
