use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ChatFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChatError {
    #[error("chat api error: {0}")]
    Api(String),
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("invalid chat response: {0}")]
    InvalidResponse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// One inbound message (direct message or mention).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub text: String,
    pub channel_id: String,
    pub thread_id: String,
    pub user_id: String,
}

impl ChatEvent {
    pub fn new(
        text: impl Into<String>,
        channel_id: impl Into<String>,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            channel_id: channel_id.into(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Handle of a message the bot posted; enough to overwrite it later.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostedMessage {
    pub channel_id: String,
    pub ts: String,
}

/// Outbound side of a chat platform.
pub trait ChatSurface: Send + Sync + 'static {
    /// Post a new message into `thread_id` of `channel_id`.
    fn post_message<'a>(
        &'a self,
        channel_id: &'a str,
        thread_id: &'a str,
        text: &'a str,
    ) -> ChatFuture<'a, Result<PostedMessage, ChatError>>;

    /// Replace the text of a previously posted message.
    fn update_message<'a>(
        &'a self,
        message: &'a PostedMessage,
        text: &'a str,
    ) -> ChatFuture<'a, Result<(), ChatError>>;
}

/// Remove `<@U123>` style user mentions, then trim. Inner whitespace is kept.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_owned()
}
