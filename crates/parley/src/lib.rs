//! # parley
//!
//! Multi-turn conversations with GLM chat-completion endpoints.
//!
//! A [`ConversationSession`] owns the transcript and drives the two-phase
//! tool protocol: the model asks for tool calls, the caller runs them, and
//! the session resumes with the results.
//!
//! ## Quick Start
//!
//! ```no_run
//! use parley::{ConversationSession, Message};
//!
//! # async fn example() -> Result<(), parley::SessionError> {
//! let mut session = ConversationSession::from_env()?;
//!
//! let reply = session.send_user("Hello!").await?.into_response().await?;
//! println!("{}", reply.content());
//!
//! assert_eq!(session.transcript().len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Transcript**: append-only history with tool-call pairing checks
//! - **Streaming**: fragments as they arrive on separate answer and reasoning channels
//! - **Tool Calling**: resolve calls against a [`ToolExecutor`] and resume
//! - **Provider Options**: thinking mode, JSON output and pass-through fields

pub mod error;
pub mod session;
pub mod stream;

pub use parley_client::*;
pub use parley_common::*;
pub use parley_tools::*;

pub use error::SessionError;
pub use session::{ConversationSession, DEFAULT_MAX_TURNS, Reply, SessionState};
pub use stream::{PhaseTracker, ResponseStream, StreamPhase};
