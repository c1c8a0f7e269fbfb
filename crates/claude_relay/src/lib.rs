//! Chat front end for the Claude CLI.
//!
//! [`ConversationDispatcher`] turns inbound chat messages into `stop`/`reset`/help replies or
//! into a CLI run whose growing output is written into a single chat message through a
//! [`ThrottledUpdater`]. The process side lives in [`runtime`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use claude_relay::runtime::{ClaudeRunner, RunnerConfig};
//! use claude_relay::{ChatEvent, ConversationDispatcher, SlackConfig, SlackWebApi};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = ClaudeRunner::new(RunnerConfig::from_env()?)?;
//! let slack = SlackWebApi::new(SlackConfig::from_env()?)?;
//! let dispatcher = ConversationDispatcher::new(Arc::new(runner), Arc::new(slack));
//!
//! let event = ChatEvent::new("<@UBOT> summarize the README", "C1", "1700.01", "U1");
//! let outcome = dispatcher.handle(&event).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod dispatcher;
pub mod render;
pub mod slack;
pub mod throttle;

pub use claude_relay_runtime as runtime;

pub use chat::{strip_mentions, ChatError, ChatEvent, ChatFuture, ChatSurface, PostedMessage};
pub use dispatcher::{
    ConversationDispatcher, DispatchError, DispatchOutcome, DispatcherConfig, Route,
};
pub use render::{help_text, render_error_block, truncate_for_chat, DEFAULT_MAX_MESSAGE_CHARS};
pub use slack::{SlackConfig, SlackWebApi};
pub use throttle::{ThrottledUpdater, UpdateTarget, DEFAULT_UPDATE_INTERVAL};
