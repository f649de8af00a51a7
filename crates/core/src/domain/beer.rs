use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque chat-platform user key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeerId(pub String);

/// Snapshot of the chat message a grant was made from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMessage {
    pub author: UserId,
    pub text: String,
    pub channel: String,
    pub ts: String,
    /// Root of the thread the message was posted in, when it is a reply.
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// One recorded obligation: `giver` owes `receiver` a beer.
///
/// Entries are immutable once created; the only mutation the ledger supports
/// is the bulk clear.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beer {
    pub id: BeerId,
    pub giver: UserId,
    pub receiver: UserId,
    pub created_at: DateTime<Utc>,
    pub origin: Option<OriginMessage>,
}

/// Insert payload; the store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBeer {
    pub giver: UserId,
    pub receiver: UserId,
    pub created_at: DateTime<Utc>,
    pub origin: Option<OriginMessage>,
}

impl NewBeer {
    pub fn new(giver: UserId, receiver: UserId, created_at: DateTime<Utc>) -> Self {
        Self { giver, receiver, created_at, origin: None }
    }

    pub fn with_origin(mut self, origin: OriginMessage) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn into_beer(self, id: BeerId) -> Beer {
        Beer {
            id,
            giver: self.giver,
            receiver: self.receiver,
            created_at: self.created_at,
            origin: self.origin,
        }
    }
}
