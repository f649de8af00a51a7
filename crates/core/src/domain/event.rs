use serde::{Deserialize, Serialize};

use crate::domain::beer::UserId;

/// Inbound chat events the ledger understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    MessagePosted(MessagePosted),
    ReactionAdded(ReactionAdded),
}

impl ChatEvent {
    /// The user whose action produced the event.
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::MessagePosted(event) => &event.user_id,
            Self::ReactionAdded(event) => &event.user_id,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::MessagePosted(event) => &event.channel,
            Self::ReactionAdded(event) => &event.item.channel,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePosted {
    pub user_id: UserId,
    pub text: String,
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAdded {
    pub user_id: UserId,
    pub reaction: String,
    /// Author of the message that received the reaction. Absent for items
    /// without an author (files, some integrations).
    pub item_user: Option<UserId>,
    pub item: MessageRef,
}

/// Points at a message in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

/// Where replies for an event should land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub channel: String,
    pub thread_ts: Option<String>,
}

impl Conversation {
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into(), thread_ts: None }
    }

    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}
