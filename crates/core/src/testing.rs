//! In-memory fakes for the collaborator ports, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::actor::Actor;
use crate::domain::beer::{Beer, BeerId, NewBeer, OriginMessage, UserId};
use crate::domain::event::Conversation;
use crate::ports::{BeerFilter, GatewayError, LedgerStore, MessagingGateway, StoreError};

#[derive(Default)]
pub struct VecStore {
    rows: RwLock<Vec<Beer>>,
    unavailable: AtomicBool,
    fail_at_insert: AtomicUsize,
}

impl VecStore {
    pub fn go_down(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Fails the `nth` (1-based) insert of the next batch.
    pub fn fail_batch_at(&self, nth: usize) {
        self.fail_at_insert.store(nth, Ordering::SeqCst);
    }

    pub async fn rows(&self) -> Vec<Beer> {
        self.rows.read().await.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is down".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for VecStore {
    async fn insert(&self, beer: NewBeer) -> Result<BeerId, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().await;
        let id = BeerId(format!("beer-{}", rows.len()));
        rows.push(beer.into_beer(id.clone()));
        Ok(id)
    }

    async fn insert_many(&self, beers: Vec<NewBeer>) -> Result<Vec<BeerId>, StoreError> {
        self.check()?;
        let fail_at = self.fail_at_insert.load(Ordering::SeqCst);
        let mut rows = self.rows.write().await;
        let mut staged = Vec::with_capacity(beers.len());
        for (index, beer) in beers.into_iter().enumerate() {
            if index + 1 == fail_at {
                return Err(StoreError::Unavailable(format!("insert {fail_at} failed")));
            }
            staged.push(beer.into_beer(BeerId(format!("beer-{}", rows.len() + index))));
        }
        let ids = staged.iter().map(|beer| beer.id.clone()).collect();
        rows.extend(staged);
        Ok(ids)
    }

    async fn find(&self, filter: &BeerFilter) -> Result<Vec<Beer>, StoreError> {
        self.check()?;
        Ok(self.rows.read().await.iter().filter(|beer| filter.matches(beer)).cloned().collect())
    }

    async fn exists(&self, filter: &BeerFilter) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.rows.read().await.iter().any(|beer| filter.matches(beer)))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().await;
        let count = rows.len() as u64;
        rows.clear();
        Ok(count)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    Channel { conversation: Conversation, text: String },
    Direct { user: UserId, text: String },
    Ephemeral { user: UserId, conversation: Conversation, text: String },
    Reaction { name: String, channel: String, ts: String },
}

#[derive(Default)]
pub struct RecordingGateway {
    users: HashMap<UserId, Actor>,
    messages: HashMap<(String, String), OriginMessage>,
    calls: Mutex<Vec<GatewayCall>>,
    fail_side_effects: AtomicBool,
}

impl RecordingGateway {
    pub fn with_user(mut self, actor: Actor) -> Self {
        self.users.insert(actor.id.clone(), actor);
        self
    }

    pub fn with_message(mut self, message: OriginMessage) -> Self {
        self.messages.insert((message.channel.clone(), message.ts.clone()), message);
        self
    }

    pub fn fail_side_effects(&self) {
        self.fail_side_effects.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: GatewayCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn side_effect_result(&self) -> Result<(), GatewayError> {
        if self.fail_side_effects.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("side effects are down".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn get_user(&self, id: &UserId) -> Result<Actor, GatewayError> {
        self.users.get(id).cloned().ok_or_else(|| GatewayError::NotFound(format!("user {id}")))
    }

    async fn get_message(&self, channel: &str, ts: &str) -> Result<OriginMessage, GatewayError> {
        self.messages
            .get(&(channel.to_owned(), ts.to_owned()))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("message {channel}/{ts}")))
    }

    async fn post_to_channel(&self, target: &Conversation, text: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::Channel { conversation: target.clone(), text: text.to_owned() });
        Ok(())
    }

    async fn post_direct(&self, user: &UserId, text: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::Direct { user: user.clone(), text: text.to_owned() });
        self.side_effect_result()
    }

    async fn post_ephemeral(
        &self,
        user: &UserId,
        target: &Conversation,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Ephemeral {
            user: user.clone(),
            conversation: target.clone(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn add_reaction(&self, name: &str, channel: &str, ts: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::Reaction {
            name: name.to_owned(),
            channel: channel.to_owned(),
            ts: ts.to_owned(),
        });
        self.side_effect_result()
    }
}
