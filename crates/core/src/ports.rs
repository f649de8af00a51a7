//! Collaborator contracts consumed by the ledger engine.
//!
//! The engine never talks to a database or the chat platform directly; it is
//! handed implementations of these traits at construction so tests can run
//! against in-memory fakes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::actor::Actor;
use crate::domain::beer::{Beer, BeerId, NewBeer, OriginMessage, UserId};
use crate::domain::event::Conversation;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
    #[error("ledger store decode error: {0}")]
    Decode(String),
}

/// Exact-match filter over ledger entries. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeerFilter {
    pub giver: Option<UserId>,
    pub receiver: Option<UserId>,
    pub created_since: Option<DateTime<Utc>>,
    pub origin_ts: Option<String>,
}

impl BeerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn giver(mut self, giver: &UserId) -> Self {
        self.giver = Some(giver.clone());
        self
    }

    pub fn receiver(mut self, receiver: &UserId) -> Self {
        self.receiver = Some(receiver.clone());
        self
    }

    pub fn created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    pub fn origin_ts(mut self, ts: impl Into<String>) -> Self {
        self.origin_ts = Some(ts.into());
        self
    }

    pub fn matches(&self, beer: &Beer) -> bool {
        self.giver.as_ref().map_or(true, |giver| &beer.giver == giver)
            && self.receiver.as_ref().map_or(true, |receiver| &beer.receiver == receiver)
            && self.created_since.map_or(true, |since| beer.created_at >= since)
            && self.origin_ts.as_deref().map_or(true, |ts| {
                beer.origin.as_ref().is_some_and(|origin| origin.ts == ts)
            })
    }
}

/// Durable record of debt entries.
///
/// `find` returns entries oldest first; grouping and the leaderboard tie-break
/// rely on that order. `insert_many` stores every entry or none of them.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, beer: NewBeer) -> Result<BeerId, StoreError>;
    async fn insert_many(&self, beers: Vec<NewBeer>) -> Result<Vec<BeerId>, StoreError>;
    async fn find(&self, filter: &BeerFilter) -> Result<Vec<Beer>, StoreError>;
    async fn exists(&self, filter: &BeerFilter) -> Result<bool, StoreError>;
    async fn delete_all(&self) -> Result<u64, StoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway api error: {0}")]
    Api(String),
}

/// Outbound side of the chat platform, acting as the bot identity.
///
/// Replies addressed to a [`Conversation`] with a `thread_ts` must land in that
/// thread rather than the channel root.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn get_user(&self, id: &UserId) -> Result<Actor, GatewayError>;
    async fn get_message(&self, channel: &str, ts: &str) -> Result<OriginMessage, GatewayError>;
    async fn post_to_channel(&self, target: &Conversation, text: &str) -> Result<(), GatewayError>;
    async fn post_direct(&self, user: &UserId, text: &str) -> Result<(), GatewayError>;
    async fn post_ephemeral(
        &self,
        user: &UserId,
        target: &Conversation,
        text: &str,
    ) -> Result<(), GatewayError>;
    async fn add_reaction(&self, name: &str, channel: &str, ts: &str) -> Result<(), GatewayError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock whose time only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
