//! Slack Web API implementation of [`ChatSurface`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat::{ChatError, ChatFuture, ChatSurface, PostedMessage};

pub const BOT_TOKEN_ENV: &str = "SLACK_BOT_TOKEN";
pub const API_BASE_ENV: &str = "SLACK_API_BASE";
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout: Duration,
}

impl SlackConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            bot_token: bot_token.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `SLACK_BOT_TOKEN` is required; `SLACK_API_BASE` overrides the endpoint.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let token = read(BOT_TOKEN_ENV)
            .ok_or_else(|| ChatError::InvalidConfig(format!("{BOT_TOKEN_ENV} is not set")))?;
        let mut config = Self::new(token);
        if let Some(api_base) = read(API_BASE_ENV) {
            config.api_base = api_base;
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct SlackWebApi {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackWebApi {
    pub fn new(config: SlackConfig) -> Result<Self, ChatError> {
        let bot_token = config.bot_token.trim().to_owned();
        if bot_token.is_empty() {
            return Err(ChatError::InvalidConfig("bot token is empty".to_owned()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ChatError::InvalidConfig(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            bot_token,
        })
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<ChatMessageResponse, ChatError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(payload)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("slack {method} request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Transport(format!(
                "slack {method} failed with status {}",
                status.as_u16()
            )));
        }

        let body: ChatMessageResponse = response.json().await.map_err(|err| {
            ChatError::InvalidResponse(format!("failed to decode slack {method}: {err}"))
        })?;
        if !body.ok {
            let reason = body.error.as_deref().unwrap_or("unknown error");
            return Err(ChatError::Api(format!("slack {method} failed: {reason}")));
        }
        Ok(body)
    }
}

impl ChatSurface for SlackWebApi {
    fn post_message<'a>(
        &'a self,
        channel_id: &'a str,
        thread_id: &'a str,
        text: &'a str,
    ) -> ChatFuture<'a, Result<PostedMessage, ChatError>> {
        Box::pin(async move {
            let mut payload = json!({
                "channel": channel_id,
                "text": text,
                "unfurl_links": false,
                "unfurl_media": false,
            });
            if !thread_id.is_empty() {
                payload["thread_ts"] = Value::String(thread_id.to_owned());
            }

            let body = self.call("chat.postMessage", &payload).await?;
            let ts = body.ts.ok_or_else(|| {
                ChatError::InvalidResponse("slack chat.postMessage response missing ts".to_owned())
            })?;
            Ok(PostedMessage {
                channel_id: body.channel.unwrap_or_else(|| channel_id.to_owned()),
                ts,
            })
        })
    }

    fn update_message<'a>(
        &'a self,
        message: &'a PostedMessage,
        text: &'a str,
    ) -> ChatFuture<'a, Result<(), ChatError>> {
        Box::pin(async move {
            let payload = json!({
                "channel": message.channel_id,
                "ts": message.ts,
                "text": text,
            });
            self.call("chat.update", &payload).await.map(|_| ())
        })
    }
}
