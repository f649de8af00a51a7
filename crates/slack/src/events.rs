use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use beerbot_core::domain::beer::UserId;
use beerbot_core::domain::event::{ChatEvent, MessagePosted, MessageRef, ReactionAdded};
use beerbot_core::engine::{CommandOutcome, LedgerCommandEngine};
use beerbot_core::errors::ApplicationError;
use beerbot_core::ports::{LedgerStore, MessagingGateway};

/// Body of a request Slack POSTs to the events endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiRequest {
    UrlVerification { challenge: String },
    EventCallback(EventCallback),
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct EventCallback {
    pub event_id: String,
    pub event: RawEvent,
}

/// The inner `event` object. Only the fields the ledger reads are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default)]
    pub item_user: Option<String>,
    #[serde(default)]
    pub item: Option<RawItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RawItem {
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

pub fn decode_request(body: &[u8]) -> Result<EventsApiRequest, serde_json::Error> {
    serde_json::from_slice(body)
}

impl EventCallback {
    pub fn into_envelope(self) -> SlackEnvelope {
        SlackEnvelope { envelope_id: self.event_id, event: SlackEvent::from_raw(self.event) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessagePosted),
    ReactionAdded(ReactionAdded),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Edits, deletions, joins and anything posted by an integration carry a
    /// `subtype` or `bot_id` and never reach the ledger.
    pub fn from_raw(raw: RawEvent) -> Self {
        match raw.event_type.as_str() {
            "message" => {
                if let Some(subtype) = raw.subtype {
                    return Self::Unsupported { event_type: format!("message.{subtype}") };
                }
                if raw.bot_id.is_some() {
                    return Self::Unsupported { event_type: "message.bot".to_owned() };
                }
                match (raw.user, raw.channel, raw.ts) {
                    (Some(user), Some(channel), Some(ts)) => Self::Message(MessagePosted {
                        user_id: UserId(user),
                        text: raw.text.unwrap_or_default(),
                        channel,
                        ts,
                        thread_ts: raw.thread_ts,
                    }),
                    _ => Self::Unsupported { event_type: "message.incomplete".to_owned() },
                }
            }
            "reaction_added" => {
                let item = raw.item.unwrap_or_default();
                if item.item_type.as_deref().is_some_and(|kind| kind != "message") {
                    return Self::Unsupported {
                        event_type: format!(
                            "reaction_added.{}",
                            item.item_type.unwrap_or_default()
                        ),
                    };
                }
                match (raw.user, raw.reaction, item.channel, item.ts) {
                    (Some(user), Some(reaction), Some(channel), Some(ts)) => {
                        Self::ReactionAdded(ReactionAdded {
                            user_id: UserId(user),
                            reaction,
                            item_user: raw.item_user.map(UserId),
                            item: MessageRef { channel, ts },
                        })
                    }
                    _ => Self::Unsupported { event_type: "reaction_added.incomplete".to_owned() },
                }
            }
            other => Self::Unsupported { event_type: other.to_owned() },
        }
    }

    pub fn into_chat_event(self) -> Option<ChatEvent> {
        match self {
            Self::Message(message) => Some(ChatEvent::MessagePosted(message)),
            Self::ReactionAdded(reaction) => Some(ChatEvent::ReactionAdded(reaction)),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    ReactionAdded,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

impl EventContext {
    pub fn for_envelope(envelope: &SlackEnvelope) -> Self {
        Self { correlation_id: envelope.envelope_id.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed(CommandOutcome),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Ledger(#[from] ApplicationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            tracing::debug!(
                event_name = "ingress.slack.event_ignored",
                correlation_id = %ctx.correlation_id,
                event_type = ?envelope.event.event_type(),
                "no handler registered for event"
            );
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Routes posted messages and added reactions into one ledger engine.
pub fn ledger_dispatcher<S, G>(engine: Arc<LedgerCommandEngine<S, G>>) -> EventDispatcher
where
    S: LedgerStore + 'static,
    G: MessagingGateway + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(LedgerEventHandler::new(SlackEventType::Message, Arc::clone(&engine)));
    dispatcher.register(LedgerEventHandler::new(SlackEventType::ReactionAdded, engine));
    dispatcher
}

pub struct LedgerEventHandler<S, G> {
    event_type: SlackEventType,
    engine: Arc<LedgerCommandEngine<S, G>>,
}

impl<S, G> LedgerEventHandler<S, G>
where
    S: LedgerStore,
    G: MessagingGateway,
{
    pub fn new(event_type: SlackEventType, engine: Arc<LedgerCommandEngine<S, G>>) -> Self {
        Self { event_type, engine }
    }
}

#[async_trait]
impl<S, G> EventHandler for LedgerEventHandler<S, G>
where
    S: LedgerStore + 'static,
    G: MessagingGateway + 'static,
{
    fn event_type(&self) -> SlackEventType {
        self.event_type.clone()
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if envelope.event.event_type() != self.event_type {
            return Ok(HandlerResult::Ignored);
        }
        let Some(event) = envelope.event.clone().into_chat_event() else {
            return Ok(HandlerResult::Ignored);
        };

        let outcome = self.engine.handle_event(&event, &ctx.correlation_id).await?;
        Ok(HandlerResult::Processed(outcome))
    }
}
