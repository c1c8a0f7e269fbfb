use std::sync::Arc;
use std::time::Duration;

use claude_relay_runtime::{PromptBackend, PromptRequest, RunnerError};
use thiserror::Error;

use crate::chat::{strip_mentions, ChatError, ChatEvent, ChatFuture, ChatSurface, PostedMessage};
use crate::render::{help_text, render_error_block, truncate_for_chat, DEFAULT_MAX_MESSAGE_CHARS};
use crate::throttle::{ThrottledUpdater, UpdateTarget, DEFAULT_UPDATE_INTERVAL};

pub const DEFAULT_PLACEHOLDER_TEXT: &str = ":hourglass_flowing_sand: Working on it...";
pub const STOPPED_REPLY: &str = "Stopped the running task.";
pub const NOTHING_TO_STOP_REPLY: &str = "Nothing is running in this thread.";
pub const RESET_REPLY: &str = "Session reset. The next message starts a new conversation.";
pub const NOTHING_TO_RESET_REPLY: &str = "No session to reset in this thread.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub update_interval: Duration,
    pub max_message_chars: usize,
    pub placeholder_text: String,
    pub stop_commands: Vec<String>,
    pub reset_commands: Vec<String>,
    pub greeting_words: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            placeholder_text: DEFAULT_PLACEHOLDER_TEXT.to_owned(),
            stop_commands: vec!["stop".to_owned()],
            reset_commands: vec!["reset".to_owned()],
            greeting_words: ["hi", "hello", "hey", "help", "?"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_max_message_chars(mut self, max_chars: usize) -> Self {
        self.max_message_chars = max_chars;
        self
    }

    pub fn with_placeholder_text(mut self, text: impl Into<String>) -> Self {
        self.placeholder_text = text.into();
        self
    }

    pub fn with_stop_command(mut self, command: impl Into<String>) -> Self {
        self.stop_commands.push(command.into());
        self
    }

    pub fn with_reset_command(mut self, command: impl Into<String>) -> Self {
        self.reset_commands.push(command.into());
        self
    }

    pub fn with_greeting_word(mut self, word: impl Into<String>) -> Self {
        self.greeting_words.push(word.into());
        self
    }

    /// Classify one inbound message text.
    pub fn route(&self, text: &str) -> Route {
        let stripped = strip_mentions(text);
        let normalized = stripped.to_lowercase();
        let matches = |words: &[String]| words.iter().any(|w| w.trim().to_lowercase() == normalized);

        if matches(&self.stop_commands) {
            Route::Stop
        } else if matches(&self.reset_commands) {
            Route::Reset
        } else if normalized.is_empty() || matches(&self.greeting_words) {
            Route::Help
        } else {
            Route::Prompt(stripped)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Stop,
    Reset,
    Help,
    /// Mention-stripped prompt text, original casing.
    Prompt(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Stopped { was_running: bool },
    Reset { had_session: bool },
    Help,
    /// Final text as delivered (after truncation).
    Answered { text: String },
    /// The run failed and an error block replaced the placeholder.
    RunFailed { error: RunnerError },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("failed to post placeholder message: {0}")]
    PlaceholderPost(ChatError),
    #[error("failed to deliver final message: {0}")]
    FinalDelivery(ChatError),
    #[error("failed to post reply: {0}")]
    Reply(ChatError),
}

/// Routes chat messages to commands or to the prompt backend, streaming output into one
/// chat message per request.
#[derive(Clone)]
pub struct ConversationDispatcher {
    backend: Arc<dyn PromptBackend>,
    surface: Arc<dyn ChatSurface>,
    config: DispatcherConfig,
}

impl ConversationDispatcher {
    pub fn new(backend: Arc<dyn PromptBackend>, surface: Arc<dyn ChatSurface>) -> Self {
        Self::with_config(backend, surface, DispatcherConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn PromptBackend>,
        surface: Arc<dyn ChatSurface>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            backend,
            surface,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Handle one inbound message to completion.
    ///
    /// Errors: `PlaceholderPost` when the first message cannot be posted (nothing else is
    /// sent and the prompt never runs), `FinalDelivery` when the last update fails, `Reply`
    /// when a command reply cannot be posted. Run failures are not errors here: they are
    /// rendered into the chat and reported as `DispatchOutcome::RunFailed`.
    pub async fn handle(&self, event: &ChatEvent) -> Result<DispatchOutcome, DispatchError> {
        let route = self.config.route(&event.text);
        tracing::debug!(
            thread_id = %event.thread_id,
            user_id = %event.user_id,
            route = ?route,
            "dispatching chat message"
        );

        match route {
            Route::Stop => {
                let was_running = self.backend.abort(&event.thread_id);
                let reply = if was_running {
                    STOPPED_REPLY
                } else {
                    NOTHING_TO_STOP_REPLY
                };
                self.reply(event, reply).await?;
                Ok(DispatchOutcome::Stopped { was_running })
            }
            Route::Reset => {
                let had_session = self.backend.clear_session(&event.thread_id);
                let reply = if had_session {
                    RESET_REPLY
                } else {
                    NOTHING_TO_RESET_REPLY
                };
                self.reply(event, reply).await?;
                Ok(DispatchOutcome::Reset { had_session })
            }
            Route::Help => {
                self.reply(event, &help_text()).await?;
                Ok(DispatchOutcome::Help)
            }
            Route::Prompt(prompt) => self.run_prompt(event, prompt).await,
        }
    }

    async fn run_prompt(
        &self,
        event: &ChatEvent,
        prompt: String,
    ) -> Result<DispatchOutcome, DispatchError> {
        let message = match self
            .surface
            .post_message(&event.channel_id, &event.thread_id, &self.config.placeholder_text)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    thread_id = %event.thread_id,
                    channel_id = %event.channel_id,
                    error = %err,
                    "failed to post placeholder message"
                );
                return Err(DispatchError::PlaceholderPost(err));
            }
        };

        let target = Arc::new(MessageTarget {
            surface: Arc::clone(&self.surface),
            message,
        });
        let updater = ThrottledUpdater::new(target, self.config.update_interval);
        let max_chars = self.config.max_message_chars;

        let mut on_chunk = |text: &str| updater.schedule(truncate_for_chat(text, max_chars));
        let result = self
            .backend
            .run_prompt(PromptRequest::new(&event.thread_id, prompt), &mut on_chunk)
            .await;

        match result {
            Ok(text) => {
                let text = truncate_for_chat(&text, max_chars);
                updater
                    .flush(&text)
                    .await
                    .map_err(DispatchError::FinalDelivery)?;
                Ok(DispatchOutcome::Answered { text })
            }
            Err(error) => {
                tracing::info!(thread_id = %event.thread_id, error = %error, "claude run failed");
                let block = render_error_block(&error.to_string(), max_chars);
                updater
                    .flush(&block)
                    .await
                    .map_err(DispatchError::FinalDelivery)?;
                Ok(DispatchOutcome::RunFailed { error })
            }
        }
    }

    async fn reply(&self, event: &ChatEvent, text: &str) -> Result<(), DispatchError> {
        self.surface
            .post_message(&event.channel_id, &event.thread_id, text)
            .await
            .map(|_| ())
            .map_err(DispatchError::Reply)
    }
}

/// "Overwrite this one posted message."
struct MessageTarget {
    surface: Arc<dyn ChatSurface>,
    message: PostedMessage,
}

impl UpdateTarget for MessageTarget {
    fn update<'a>(&'a self, text: &'a str) -> ChatFuture<'a, Result<(), ChatError>> {
        self.surface.update_message(&self.message, text)
    }
}
