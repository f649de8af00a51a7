//! Outbound Slack Web API client acting as the bot user.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use beerbot_core::config::SlackConfig;
use beerbot_core::domain::actor::Actor;
use beerbot_core::domain::beer::{OriginMessage, UserId};
use beerbot_core::domain::event::Conversation;
use beerbot_core::ports::{GatewayError, MessagingGateway};

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
    display_name: String,
}

impl SlackWebClient {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: SecretString,
        display_name: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| GatewayError::Unavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            bot_token,
            display_name: display_name.into(),
        })
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, GatewayError> {
        Self::new(config.api_base_url.clone(), config.bot_token.clone(), config.display_name.clone())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: ApiRequest<'_>,
    ) -> Result<T, GatewayError> {
        let url = format!("{}/{method}", self.base_url);
        let builder = match request {
            ApiRequest::Query(params) => self.http.request(Method::GET, &url).query(params),
            ApiRequest::Json(body) => self.http.request(Method::POST, &url).json(&body),
        };

        let result = async {
            let response = builder
                .bearer_auth(self.bot_token.expose_secret())
                .send()
                .await
                .map_err(|error| GatewayError::Unavailable(error.to_string()))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse().ok());
                return Err(GatewayError::RateLimited { retry_after_secs });
            }
            if !response.status().is_success() {
                return Err(GatewayError::Unavailable(format!(
                    "{method} returned HTTP {}",
                    response.status()
                )));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|error| GatewayError::Api(format!("{method}: {error}")))?;
            parse_api_response(method, body)
        }
        .await;

        if let Err(error) = &result {
            warn!(
                event_name = "egress.slack.call_failed",
                method,
                error = %error,
                "slack web api call failed"
            );
        }
        result
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), GatewayError> {
        let _: Value = self
            .call(
                "chat.postMessage",
                ApiRequest::Json(post_message_body(channel, thread_ts, text, &self.display_name)),
            )
            .await?;
        Ok(())
    }
}

enum ApiRequest<'a> {
    Query(&'a [(&'a str, &'a str)]),
    Json(Value),
}

/// Checks Slack's `ok` flag and decodes the rest of the payload.
fn parse_api_response<T: DeserializeOwned>(method: &str, body: Value) -> Result<T, GatewayError> {
    let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let code = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        return Err(api_error(method, code));
    }
    serde_json::from_value(body).map_err(|error| GatewayError::Api(format!("{method}: {error}")))
}

fn api_error(method: &str, code: &str) -> GatewayError {
    match code {
        "ratelimited" | "rate_limited" => GatewayError::RateLimited { retry_after_secs: None },
        code if code.ends_with("_not_found") => GatewayError::NotFound(format!("{method}: {code}")),
        code => GatewayError::Api(format!("{method}: {code}")),
    }
}

fn post_message_body(
    channel: &str,
    thread_ts: Option<&str>,
    text: &str,
    display_name: &str,
) -> Value {
    let mut body = json!({ "channel": channel, "text": text, "username": display_name });
    if let Some(thread_ts) = thread_ts {
        body["thread_ts"] = Value::String(thread_ts.to_owned());
    }
    body
}

fn ephemeral_body(user: &str, target: &Conversation, text: &str) -> Value {
    let mut body = json!({ "channel": target.channel, "user": user, "text": text });
    if let Some(thread_ts) = &target.thread_ts {
        body["thread_ts"] = Value::String(thread_ts.clone());
    }
    body
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    is_owner: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    profile: Option<UserProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct UserProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl UserInfo {
    fn into_actor(self) -> Actor {
        let profile = self.profile.unwrap_or_default();
        let display_name = [self.real_name, profile.real_name, profile.display_name]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or(self.name);

        Actor {
            id: UserId(self.id),
            display_name,
            is_admin: self.is_admin || self.is_owner,
            is_bot: self.is_bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
}

impl HistoryMessage {
    /// Thread parents carry `thread_ts == ts`; only replies keep it.
    fn into_origin(self, channel: &str) -> OriginMessage {
        let thread_ts = self.thread_ts.filter(|thread_ts| thread_ts != &self.ts);
        OriginMessage {
            author: UserId(self.user.unwrap_or_default()),
            text: self.text,
            channel: channel.to_owned(),
            ts: self.ts,
            thread_ts,
        }
    }
}

fn take_message(messages: Vec<HistoryMessage>, ts: &str) -> Option<HistoryMessage> {
    messages.into_iter().find(|message| message.ts == ts)
}

#[async_trait]
impl MessagingGateway for SlackWebClient {
    async fn get_user(&self, id: &UserId) -> Result<Actor, GatewayError> {
        let response: UserInfoResponse =
            self.call("users.info", ApiRequest::Query(&[("user", id.as_str())])).await?;
        Ok(response.user.into_actor())
    }

    /// Channel history does not list thread replies, so a miss there falls
    /// back to `conversations.replies`.
    async fn get_message(&self, channel: &str, ts: &str) -> Result<OriginMessage, GatewayError> {
        let history: HistoryResponse = self
            .call(
                "conversations.history",
                ApiRequest::Query(&[
                    ("channel", channel),
                    ("latest", ts),
                    ("limit", "1"),
                    ("inclusive", "true"),
                ]),
            )
            .await?;
        if let Some(message) = take_message(history.messages, ts) {
            return Ok(message.into_origin(channel));
        }

        let replies: HistoryResponse = self
            .call(
                "conversations.replies",
                ApiRequest::Query(&[
                    ("channel", channel),
                    ("ts", ts),
                    ("oldest", ts),
                    ("latest", ts),
                    ("inclusive", "true"),
                ]),
            )
            .await?;
        take_message(replies.messages, ts)
            .map(|message| message.into_origin(channel))
            .ok_or_else(|| GatewayError::NotFound(format!("message {channel}/{ts}")))
    }

    async fn post_to_channel(&self, target: &Conversation, text: &str) -> Result<(), GatewayError> {
        self.post_message(&target.channel, target.thread_ts.as_deref(), text).await
    }

    async fn post_direct(&self, user: &UserId, text: &str) -> Result<(), GatewayError> {
        self.post_message(user.as_str(), None, text).await
    }

    async fn post_ephemeral(
        &self,
        user: &UserId,
        target: &Conversation,
        text: &str,
    ) -> Result<(), GatewayError> {
        let _: Value = self
            .call("chat.postEphemeral", ApiRequest::Json(ephemeral_body(user.as_str(), target, text)))
            .await?;
        Ok(())
    }

    async fn add_reaction(&self, name: &str, channel: &str, ts: &str) -> Result<(), GatewayError> {
        let body = json!({ "name": name, "channel": channel, "timestamp": ts });
        match self.call::<Value>("reactions.add", ApiRequest::Json(body)).await {
            Err(GatewayError::Api(message)) if message.ends_with("already_reacted") => Ok(()),
            other => other.map(|_| ()),
        }
    }
}
