//! The conversation session: transcript ownership and the two-phase
//! ask → run tools → resume protocol.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use parley_client::{ClientError, LLMClient, OpenAIClient};
use parley_common::chat::{Message, MessageRole, Transcript};
use parley_common::client::{API_KEY_ENV, ChatRequest, ChatResponse, Config, RequestOptions};
use parley_common::profile::ProviderProfile;
use parley_common::tools::ToolCall;
use parley_tools::ToolExecutor;

use crate::error::SessionError;
use crate::stream::ResponseStream;

/// Tool rounds [`ConversationSession::run`] allows before giving up.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Where a session is in the request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingResponse,
    /// The last reply was a final answer.
    Completed,
    /// The last reply asked for tools that have not all been answered.
    ToolCallPending,
    ExecutingTools,
    Failed,
}

impl SessionState {
    /// State a reply moves the session into.
    #[must_use]
    pub fn after_reply(message: &Message) -> Self {
        if message.has_tool_calls() {
            Self::ToolCallPending
        } else {
            Self::Completed
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingResponse => write!(f, "awaiting response"),
            Self::Completed => write!(f, "completed"),
            Self::ToolCallPending => write!(f, "tool call pending"),
            Self::ExecutingTools => write!(f, "executing tools"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What [`ConversationSession::request`] hands back.
#[must_use]
pub enum Reply<'a> {
    /// A non-streamed answer, already appended to the transcript.
    Complete(ChatResponse),
    /// A live stream; the answer is appended once it is drained.
    Streaming(ResponseStream<'a>),
}

impl Reply<'_> {
    /// Waits for the whole answer, draining the stream if there is one.
    ///
    /// # Errors
    ///
    /// Returns the stream's error if it fails part-way.
    pub async fn into_response(self) -> Result<ChatResponse, SessionError> {
        match self {
            Self::Complete(response) => Ok(response),
            Self::Streaming(stream) => stream.collect_response().await,
        }
    }
}

/// One conversation with a completion provider.
///
/// The session owns the transcript; callers append to it and read it but
/// never edit it in place.
///
/// ```no_run
/// use parley::{ConversationSession, SystemPrompt, ToolExecutor};
///
/// # async fn example() -> Result<(), parley::SessionError> {
/// let mut session = ConversationSession::from_env()?
///     .with_system_prompt(SystemPrompt::FriendlyAssistant.text())?;
///
/// session.append(parley::Message::user("What is the 10th Fibonacci number?"))?;
/// let answer = session.run(&ToolExecutor::with_builtin_tools()).await?;
/// println!("{}", answer.content());
/// # Ok(())
/// # }
/// ```
pub struct ConversationSession<C: LLMClient> {
    client: C,
    transcript: Transcript,
    state: SessionState,
    options: RequestOptions,
    max_turns: u32,
}

impl<C: LLMClient> fmt::Debug for ConversationSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("transcript", &self.transcript.id)
            .field("messages", &self.transcript.len())
            .field("state", &self.state)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

impl ConversationSession<OpenAIClient> {
    /// Connects to the endpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the key is missing or empty or
    /// the base URL is unusable. Nothing is sent over the network.
    pub fn connect(config: Config) -> Result<Self, SessionError> {
        Ok(Self::new(OpenAIClient::new(config)?))
    }

    /// Connects to the default endpoint with the key from `ZHIPU_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self, SessionError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            SessionError::Config(format!("environment variable {API_KEY_ENV} is not set"))
        })?;
        Self::connect(Config::default().with_api_key(api_key))
    }

    /// Connects using a TOML provider profile.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the profile's key variable is
    /// unset or the resulting configuration is invalid.
    pub fn from_profile(profile: ProviderProfile) -> Result<Self, SessionError> {
        let config = profile
            .into_config()
            .map_err(|e| SessionError::Config(e.to_string()))?;
        Self::connect(config)
    }
}

impl<C: LLMClient> ConversationSession<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            transcript: Transcript::new(),
            state: SessionState::Idle,
            options: RequestOptions::default(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Starts the transcript with a system message.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh session; the `Result` mirrors [`Self::append`].
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Result<Self, SessionError> {
        self.append(Message::system(prompt))?;
        Ok(self)
    }

    pub const fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Options for subsequent requests.
    pub const fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.options
    }

    #[must_use]
    pub fn last_assistant(&self) -> Option<&Message> {
        self.transcript.last_assistant()
    }

    /// Adds a message to the end of the transcript.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTranscript`] if a tool message does not
    /// answer an open call of the preceding assistant message. The
    /// transcript is left untouched.
    pub fn append(&mut self, message: Message) -> Result<(), SessionError> {
        let calls_tools = message.role == MessageRole::Assistant && message.has_tool_calls();
        self.transcript.push(message)?;
        if calls_tools {
            self.state = SessionState::ToolCallPending;
        }
        Ok(())
    }

    /// Appends every message or none of them.
    fn append_all(&mut self, messages: Vec<Message>) -> Result<(), SessionError> {
        let mut staged = self.transcript.clone();
        for message in messages {
            staged.push(message)?;
        }
        self.transcript = staged;
        Ok(())
    }

    /// Appends a user message and requests a reply.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::request`]; nothing is appended when tool calls
    /// are still unanswered.
    pub async fn send_user(&mut self, text: impl Into<String>) -> Result<Reply<'_>, SessionError> {
        self.ensure_no_pending("send a user message")?;
        self.append(Message::user(text))?;
        self.request().await
    }

    fn ensure_no_pending(&self, operation: &str) -> Result<(), SessionError> {
        let pending = self.transcript.pending_tool_calls();
        if pending.is_empty() {
            return Ok(());
        }
        Err(SessionError::InvalidState(format!(
            "cannot {operation} while {} tool call(s) are unanswered ({})",
            pending.len(),
            self.state
        )))
    }

    fn build_request(&self) -> ChatRequest {
        let messages: Arc<[Message]> = Arc::from(self.transcript.messages());
        ChatRequest::from((self.client.config(), messages)).with_options(&self.options)
    }

    fn record_failure(&mut self, error: ClientError) -> SessionError {
        self.state = SessionState::Failed;
        warn!("Request failed: {error}");
        error.into()
    }

    /// Sends the whole transcript and returns the provider's reply.
    ///
    /// Non-streamed answers are appended before this returns; streamed ones
    /// when the stream is drained.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] while tool calls are unanswered
    /// - [`SessionError::Config`] for credential problems
    /// - [`SessionError::Provider`] for a non-2xx status, malformed body or
    ///   empty choice list
    pub async fn request(&mut self) -> Result<Reply<'_>, SessionError> {
        self.ensure_no_pending("request a reply")?;

        let request = self.build_request();
        self.state = SessionState::AwaitingResponse;
        info!(
            "Requesting {} reply for {} message(s)",
            if request.is_streaming() { "streamed" } else { "complete" },
            request.messages.len()
        );
        debug!("Chat request: {request}");

        if request.is_streaming() {
            return match self.client.chat_stream(&request).await {
                Ok(stream) => Ok(Reply::Streaming(ResponseStream::new(
                    stream,
                    &mut self.transcript,
                    &mut self.state,
                ))),
                Err(e) => Err(self.record_failure(e)),
            };
        }

        let response = self.client.chat(&request).await;
        let response = response.map_err(|e| self.record_failure(e))?;
        debug!("Assistant response: {response}");

        if response.message.role != MessageRole::Assistant {
            return Err(self.record_failure(ClientError::InvalidResponse(format!(
                "expected an assistant reply, got role {}",
                response.message.role
            ))));
        }
        if let Err(e) = self.transcript.push(response.message.clone()) {
            self.state = SessionState::Failed;
            warn!("Reply rejected by transcript: {e}");
            return Err(e.into());
        }
        self.state = SessionState::after_reply(&response.message);
        Ok(Reply::Complete(response))
    }

    /// A tool message reporting that `call` failed.
    #[must_use]
    pub fn tool_error_message(call: &ToolCall, error: impl fmt::Display) -> Message {
        Self::tool_message(call, format!("Tool execution failed: {error}"))
    }

    fn tool_message(call: &ToolCall, content: String) -> Message {
        Message::builder()
            .role(MessageRole::Tool)
            .content(Some(content))
            .tool_call_id(Some(call.id.clone()))
            .name(Some(call.function.name.clone()))
            .build()
    }

    /// Runs every tool call of `message` and returns one tool message per
    /// call, in call order. The results are not appended; pass them to
    /// [`Self::continue_with`].
    ///
    /// A tool that runs and fails yields a `"Tool execution failed: …"`
    /// message rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTool`] before anything runs if any
    /// call names a tool `executor` does not have. The session stays in
    /// [`SessionState::ToolCallPending`].
    pub async fn resolve_tool_calls(
        &mut self,
        message: &Message,
        executor: &ToolExecutor,
    ) -> Result<Vec<Message>, SessionError> {
        if !message.has_tool_calls() {
            return Ok(Vec::new());
        }

        if let Some(unknown) = message
            .tool_calls
            .iter()
            .find(|call| !executor.has_tool(call.name()))
        {
            warn!(
                "Provider requested unknown tool '{}' (call {})",
                unknown.name(),
                unknown.id
            );
            return Err(SessionError::UnknownTool {
                name: unknown.name().to_string(),
                call_id: unknown.id.clone(),
            });
        }

        self.state = SessionState::ExecutingTools;
        let mut results = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            debug!("Tool Name: {} (id: {})", call.name(), call.id);
            debug!("Tool Arguments: {}", call.function.arguments);

            let result = match executor.execute_tool(call).await {
                Ok(output) => {
                    debug!("Tool {} executed successfully: {output}", call.name());
                    Self::tool_message(call, output)
                }
                Err(e) => {
                    warn!("Tool {} execution failed: {e}", call.name());
                    Self::tool_error_message(call, e)
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    /// Appends tool results and asks for the next reply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTranscript`] and appends nothing if a
    /// result does not answer an open call; otherwise fails like
    /// [`Self::request`].
    pub async fn continue_with(
        &mut self,
        tool_messages: Vec<Message>,
    ) -> Result<Reply<'_>, SessionError> {
        debug!("Continuing with {} tool result(s)", tool_messages.len());
        self.append_all(tool_messages)?;
        self.request().await
    }

    /// Drives request → tools → resume until the provider gives a final
    /// answer. Always uses non-streamed requests.
    ///
    /// When no tools are configured in the session options, the executor's
    /// definitions are offered.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MaxTurnsExceeded`] once the provider asks
    /// for tools more than `max_turns` times, or any error from the steps.
    pub async fn run(&mut self, executor: &ToolExecutor) -> Result<ChatResponse, SessionError> {
        if self.options.tools.is_empty() {
            self.options.tools = executor.get_all_tools();
        }
        let streaming = std::mem::replace(&mut self.options.stream, false);
        let outcome = self.run_turns(executor).await;
        self.options.stream = streaming;
        outcome
    }

    async fn run_turns(&mut self, executor: &ToolExecutor) -> Result<ChatResponse, SessionError> {
        let mut turns = 0;
        let mut response = self.request().await?.into_response().await?;

        loop {
            if !response.has_tool_calls() {
                debug!("No tool calls in response, completed after {turns} tool round(s)");
                return Ok(response);
            }

            if turns >= self.max_turns {
                self.state = SessionState::Failed;
                return Err(SessionError::MaxTurnsExceeded(self.max_turns));
            }
            turns += 1;

            info!(
                "Executing tool round ({turns}/{}) with {} call(s)",
                self.max_turns,
                response.message.tool_calls.len()
            );
            let results = self.resolve_tool_calls(&response.message, executor).await?;
            response = self.continue_with(results).await?.into_response().await?;
        }
    }
}
