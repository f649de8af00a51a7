//! The ledger command engine: the only writer of ledger state.
//!
//! An inbound event is resolved to an actor, classified, executed against the
//! store, and the resulting replies are handed to the gateway. Replies are
//! returned as data from [`LedgerCommandEngine::execute`] so the business
//! rules can be checked without looking at gateway traffic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::classifier::{classify, ClassifierSettings, Intent};
use crate::config::AppConfig;
use crate::cooldown::{CooldownGuard, CooldownPolicy};
use crate::domain::actor::Actor;
use crate::domain::beer::{BeerId, NewBeer, UserId};
use crate::domain::event::{ChatEvent, Conversation, MessagePosted, MessageRef};
use crate::errors::{ApplicationError, Rejection};
use crate::ports::{BeerFilter, Clock, LedgerStore, MessagingGateway, SystemClock};
use crate::render;

pub const INVALID_COMMAND_REPLY: &str =
    r#"Sorry, that's not a valid command. Try "list", "iou", or "leaderboard""#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub classifier: ClassifierSettings,
    pub cooldown: CooldownPolicy,
    pub unit_price: Decimal,
    pub acknowledgement_emojis: Vec<String>,
    pub checkmark_emoji: String,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            classifier: ClassifierSettings::from_config(config),
            cooldown: CooldownPolicy::from_config(&config.ledger),
            unit_price: config.ledger.unit_price,
            acknowledgement_emojis: config
                .ledger
                .acknowledgement_emojis
                .iter()
                .map(|emoji| emoji.trim().trim_matches(':').to_owned())
                .filter(|emoji| !emoji.is_empty())
                .collect(),
            checkmark_emoji: config.ledger.checkmark_emoji.trim_matches(':').to_owned(),
        }
    }

    fn emoji(&self) -> String {
        self.classifier.debt_emoji_token()
    }
}

/// An instruction for the gateway. Channel and ephemeral replies land in the
/// conversation the triggering event came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Channel { text: String },
    Direct { user: UserId, text: String },
    Ephemeral { user: UserId, text: String },
    Reaction { name: String, message: MessageRef },
}

impl Reply {
    /// Direct messages and reactions are notifications; everything else is the
    /// answer the actor is waiting for.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Channel { .. } | Self::Ephemeral { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Channel { .. } => "channel",
            Self::Direct { .. } => "direct",
            Self::Ephemeral { .. } => "ephemeral",
            Self::Reaction { .. } => "reaction",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub intent: &'static str,
    pub rejection: Option<Rejection>,
    pub created: Vec<BeerId>,
    pub deleted: u64,
    pub replies: Vec<Reply>,
    /// Thread for channel and ephemeral replies when the event itself names none.
    pub thread_ts: Option<String>,
}

impl CommandOutcome {
    fn new(intent: &Intent) -> Self {
        Self {
            intent: intent.label(),
            rejection: None,
            created: Vec::new(),
            deleted: 0,
            replies: Vec::new(),
            thread_ts: None,
        }
    }

    fn reply(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    fn rejected(mut self, rejection: Rejection, reply: Reply) -> Self {
        self.rejection = Some(rejection);
        self.replies.push(reply);
        self
    }
}

pub struct LedgerCommandEngine<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownGuard<S>,
    settings: EngineSettings,
    giver_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl<S, G> LedgerCommandEngine<S, G>
where
    S: LedgerStore,
    G: MessagingGateway,
{
    pub fn new(store: Arc<S>, gateway: Arc<G>, settings: EngineSettings) -> Self {
        Self {
            cooldown: CooldownGuard::new(Arc::clone(&store), settings.cooldown),
            store,
            gateway,
            clock: Arc::new(SystemClock),
            settings,
            giver_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resolves the acting user, runs the event through the rules and sends
    /// the replies. A store failure suppresses every reply.
    pub async fn handle_event(
        &self,
        event: &ChatEvent,
        correlation_id: &str,
    ) -> Result<CommandOutcome, ApplicationError> {
        let actor = self.gateway.get_user(event.user_id()).await.map_err(|error| {
            warn!(
                event_name = "ledger.actor.resolve_failed",
                correlation_id = %correlation_id,
                user_id = %event.user_id(),
                error = %error,
                "could not resolve acting user"
            );
            ApplicationError::from(error)
        })?;

        let intent = classify(event, &actor, &self.settings.classifier);
        if intent == Intent::Ignore {
            return Ok(CommandOutcome::new(&intent));
        }

        info!(
            event_name = "ledger.intent.classified",
            correlation_id = %correlation_id,
            user_id = %actor.id,
            channel_id = %event.channel(),
            intent = intent.label(),
            "event classified"
        );

        let outcome = match self.execute(event, &actor, intent).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(
                    event_name = "ledger.command.failed",
                    correlation_id = %correlation_id,
                    user_id = %actor.id,
                    error = %error,
                    "command failed; reply suppressed"
                );
                return Err(error);
            }
        };

        if let Some(rejection) = &outcome.rejection {
            info!(
                event_name = "ledger.command.rejected",
                correlation_id = %correlation_id,
                user_id = %actor.id,
                reason = rejection.reason_code(),
                "command rejected"
            );
        }

        let mut target = reply_target(event);
        if target.thread_ts.is_none() {
            target.thread_ts = outcome.thread_ts.clone();
        }
        self.dispatch(&target, &actor.id, &outcome.replies, correlation_id).await;
        Ok(outcome)
    }

    /// Applies the rules for an already classified intent and returns the
    /// replies without sending them.
    pub async fn execute(
        &self,
        event: &ChatEvent,
        actor: &Actor,
        intent: Intent,
    ) -> Result<CommandOutcome, ApplicationError> {
        let outcome = CommandOutcome::new(&intent);
        let emoji = self.settings.emoji();

        match intent {
            Intent::Ignore => Ok(outcome),
            Intent::GrantDebt { targets } => {
                let message = match event {
                    ChatEvent::MessagePosted(message) => message,
                    ChatEvent::ReactionAdded(_) => return Ok(outcome),
                };
                self.grant_by_mention(outcome, actor, message, targets).await
            }
            Intent::ReactionGrant { receiver, message } => {
                self.grant_by_reaction(outcome, actor, receiver, message).await
            }
            Intent::QuerySingleTarget { target } => {
                let owed = self
                    .store
                    .find(&BeerFilter::all().receiver(&actor.id).giver(&target))
                    .await?
                    .len();
                let text = if owed == 0 {
                    format!("{} doesn't owe you anything", target.mention())
                } else {
                    format!("{} owes you {owed} {emoji}", target.mention())
                };
                Ok(outcome.reply(Reply::Channel { text }))
            }
            Intent::QueryOwed { include_price } => {
                let beers = self.store.find(&BeerFilter::all().receiver(&actor.id)).await?;
                if beers.is_empty() {
                    let text = format!("{}, nobody owes you any {emoji}", actor.id.mention());
                    return Ok(outcome.reply(Reply::Channel { text }));
                }
                let groups = render::group_counts(&beers, |beer| &beer.giver);
                let title =
                    render::owed_title(&emoji, count(beers.len()), include_price, self.settings.unit_price);
                let text = render::render_list(&title, &groups, include_price, self.settings.unit_price);
                Ok(outcome.reply(Reply::Channel { text }))
            }
            Intent::QueryIou { include_price } => {
                let beers = self.store.find(&BeerFilter::all().giver(&actor.id)).await?;
                if beers.is_empty() {
                    let text = format!("{}, you don't owe anybody {emoji}", actor.id.mention());
                    return Ok(outcome.reply(Reply::Channel { text }));
                }
                let groups = render::group_counts(&beers, |beer| &beer.receiver);
                let title = render::iou_title(
                    &actor.id,
                    &emoji,
                    count(beers.len()),
                    include_price,
                    self.settings.unit_price,
                );
                let text = render::render_list(&title, &groups, include_price, self.settings.unit_price);
                Ok(outcome.reply(Reply::Channel { text }))
            }
            Intent::QueryLeaderboard => {
                let beers = self.store.find(&BeerFilter::all()).await?;
                if beers.is_empty() {
                    let text = format!("Nobody owes anyone {emoji}!");
                    return Ok(outcome.reply(Reply::Channel { text }));
                }
                let top = render::top_receivers(render::group_counts(&beers, |beer| &beer.receiver));
                Ok(outcome.reply(Reply::Channel { text: render::render_leaderboard(&emoji, &top) }))
            }
            Intent::ClearLedger => {
                let mut outcome = outcome;
                outcome.deleted = self.store.delete_all().await?;
                info!(
                    event_name = "ledger.clear.completed",
                    user_id = %actor.id,
                    deleted = outcome.deleted,
                    "ledger cleared"
                );
                let name = self.settings.checkmark_emoji.clone();
                Ok(outcome.reply(Reply::Reaction { name, message: triggering_message(event) }))
            }
            Intent::SelfGrantAttempt => Ok(outcome.rejected(
                Rejection::SelfGrant,
                Reply::Ephemeral {
                    user: actor.id.clone(),
                    text: format!("Good for you! But you can't owe yourself a {emoji}."),
                },
            )),
            Intent::Unauthorized => Ok(outcome.rejected(
                Rejection::Unauthorized,
                Reply::Ephemeral { user: actor.id.clone(), text: INVALID_COMMAND_REPLY.to_owned() },
            )),
            Intent::UnknownCommand => Ok(outcome.rejected(
                Rejection::UnknownCommand,
                Reply::Ephemeral { user: actor.id.clone(), text: INVALID_COMMAND_REPLY.to_owned() },
            )),
        }
    }

    async fn grant_by_mention(
        &self,
        mut outcome: CommandOutcome,
        actor: &Actor,
        message: &MessagePosted,
        targets: Vec<UserId>,
    ) -> Result<CommandOutcome, ApplicationError> {
        let emoji = self.settings.emoji();
        if targets.contains(&actor.id) {
            return Ok(outcome.rejected(Rejection::SelfGrant, self.self_grant_reply(actor)));
        }

        let _serialized = self.lock_giver(&actor.id).await;
        let now = self.clock.now();
        if let Some(rejection) = self.check_cooldown(&actor.id, now, count(targets.len())).await? {
            let reply = self.cooldown_reply(actor, &rejection);
            return Ok(outcome.rejected(rejection, reply));
        }

        let batch = targets
            .iter()
            .map(|target| NewBeer::new(actor.id.clone(), target.clone(), now))
            .collect();
        let ids = self.store.insert_many(batch).await?;
        for (target, id) in targets.iter().zip(ids) {
            info!(
                event_name = "ledger.grant.created",
                user_id = %actor.id,
                receiver_id = %target,
                beer_id = %id.0,
                "beer granted by mention"
            );
            outcome.created.push(id);
            outcome.replies.push(Reply::Direct {
                user: target.clone(),
                text: format!("{} owes you a {emoji}!", actor.id.mention()),
            });
        }

        outcome.replies.push(Reply::Reaction {
            name: self.acknowledgement_emoji(),
            message: MessageRef { channel: message.channel.clone(), ts: message.ts.clone() },
        });
        let owed_to = targets.iter().map(UserId::mention).collect::<Vec<_>>().join(", ");
        outcome.replies.push(Reply::Ephemeral {
            user: actor.id.clone(),
            text: format!("You owe {owed_to} a {emoji}"),
        });
        Ok(outcome)
    }

    async fn grant_by_reaction(
        &self,
        mut outcome: CommandOutcome,
        actor: &Actor,
        receiver: UserId,
        message: MessageRef,
    ) -> Result<CommandOutcome, ApplicationError> {
        let emoji = self.settings.emoji();
        if receiver == actor.id {
            return Ok(outcome.rejected(Rejection::SelfGrant, self.self_grant_reply(actor)));
        }

        let _serialized = self.lock_giver(&actor.id).await;
        let duplicate = BeerFilter::all().giver(&actor.id).receiver(&receiver).origin_ts(&message.ts);
        if self.store.exists(&duplicate).await? {
            let reply = Reply::Ephemeral {
                user: actor.id.clone(),
                text: format!(
                    "You already owe {} a {emoji} for that message",
                    receiver.mention()
                ),
            };
            return Ok(outcome.rejected(Rejection::DuplicateGrant, reply));
        }

        let now = self.clock.now();
        if let Some(rejection) = self.check_cooldown(&actor.id, now, 1).await? {
            let reply = self.cooldown_reply(actor, &rejection);
            return Ok(outcome.rejected(rejection, reply));
        }

        let origin = self.gateway.get_message(&message.channel, &message.ts).await?;
        outcome.thread_ts = origin.thread_ts.clone();
        let receiver_name = match self.gateway.get_user(&receiver).await {
            Ok(profile) => profile.salutation(),
            Err(error) => {
                warn!(
                    event_name = "ledger.receiver.resolve_failed",
                    user_id = %receiver,
                    error = %error,
                    "falling back to a mention for the receiver"
                );
                receiver.mention()
            }
        };

        let id = self
            .store
            .insert(NewBeer::new(actor.id.clone(), receiver.clone(), now).with_origin(origin))
            .await?;
        info!(
            event_name = "ledger.grant.created",
            user_id = %actor.id,
            receiver_id = %receiver,
            beer_id = %id.0,
            "beer granted by reaction"
        );
        outcome.created.push(id);
        outcome.replies.push(Reply::Direct {
            user: receiver,
            text: format!("{} owes you a {emoji}!", actor.id.mention()),
        });
        outcome.replies.push(Reply::Ephemeral {
            user: actor.id.clone(),
            text: format!("You owe {receiver_name} a {emoji}!"),
        });
        Ok(outcome)
    }

    async fn check_cooldown(
        &self,
        giver: &UserId,
        now: DateTime<Utc>,
        requested: u32,
    ) -> Result<Option<Rejection>, ApplicationError> {
        let window_start = self.settings.cooldown.window_start(now);
        let allowance = self.cooldown.check_allowance(giver, window_start, requested).await?;
        if allowance.allowed {
            Ok(None)
        } else {
            Ok(Some(Rejection::CooldownExceeded { remaining: allowance.remaining }))
        }
    }

    fn cooldown_reply(&self, actor: &Actor, rejection: &Rejection) -> Reply {
        let remaining = match rejection {
            Rejection::CooldownExceeded { remaining } => *remaining,
            _ => 0,
        };
        let policy = self.cooldown.policy();
        Reply::Ephemeral {
            user: actor.id.clone(),
            text: format!(
                "Slow down! You can only give {} {} every {} minutes. You have {remaining} left right now.",
                policy.cap,
                self.settings.emoji(),
                policy.window_minutes
            ),
        }
    }

    fn self_grant_reply(&self, actor: &Actor) -> Reply {
        Reply::Ephemeral {
            user: actor.id.clone(),
            text: format!("Good for you! But you can't owe yourself a {}.", self.settings.emoji()),
        }
    }

    fn acknowledgement_emoji(&self) -> String {
        self.settings
            .acknowledgement_emojis
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| self.settings.classifier.debt_emoji.clone())
    }

    /// Serialises cooldown checks and inserts for one giver within this
    /// process. Idle locks are dropped from the map on the next acquisition.
    async fn lock_giver(&self, giver: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.giver_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(giver.clone()).or_default())
        };
        lock.lock_owned().await
    }

    async fn dispatch(
        &self,
        conversation: &Conversation,
        actor: &UserId,
        replies: &[Reply],
        correlation_id: &str,
    ) {
        let ordered = replies
            .iter()
            .filter(|reply| reply.is_primary())
            .chain(replies.iter().filter(|reply| !reply.is_primary()));

        for reply in ordered {
            let result = match reply {
                Reply::Channel { text } => self.gateway.post_to_channel(conversation, text).await,
                Reply::Direct { user, text } => self.gateway.post_direct(user, text).await,
                Reply::Ephemeral { user, text } => {
                    self.gateway.post_ephemeral(user, conversation, text).await
                }
                Reply::Reaction { name, message } => {
                    self.gateway.add_reaction(name, &message.channel, &message.ts).await
                }
            };

            if let Err(error) = result {
                warn!(
                    event_name = "ledger.reply.failed",
                    correlation_id = %correlation_id,
                    user_id = %actor,
                    channel_id = %conversation.channel,
                    reply_kind = reply.kind(),
                    error = %error,
                    "reply delivery failed"
                );
            }
        }
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn reply_target(event: &ChatEvent) -> Conversation {
    match event {
        ChatEvent::MessagePosted(message) => {
            let conversation = Conversation::new(message.channel.clone());
            match &message.thread_ts {
                Some(thread_ts) => conversation.in_thread(thread_ts.clone()),
                None => conversation,
            }
        }
        ChatEvent::ReactionAdded(reaction) => Conversation::new(reaction.item.channel.clone()),
    }
}

fn triggering_message(event: &ChatEvent) -> MessageRef {
    match event {
        ChatEvent::MessagePosted(message) => {
            MessageRef { channel: message.channel.clone(), ts: message.ts.clone() }
        }
        ChatEvent::ReactionAdded(reaction) => reaction.item.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{EngineSettings, LedgerCommandEngine, Reply, INVALID_COMMAND_REPLY};
    use crate::classifier::ClassifierSettings;
    use crate::cooldown::CooldownPolicy;
    use crate::domain::actor::Actor;
    use crate::domain::beer::{NewBeer, OriginMessage, UserId};
    use crate::domain::event::{ChatEvent, Conversation, MessagePosted, MessageRef, ReactionAdded};
    use crate::errors::{ApplicationError, Rejection};
    use crate::ports::{LedgerStore, ManualClock};
    use crate::testing::{GatewayCall, RecordingGateway, VecStore};

    type Engine = LedgerCommandEngine<VecStore, RecordingGateway>;

    const REACTED_TS: &str = "1730000000.000200";

    fn settings(cap: u32) -> EngineSettings {
        EngineSettings {
            classifier: ClassifierSettings {
                bot_user_id: UserId::new("UBOT"),
                debt_emoji: "beer".to_owned(),
                admin_user_ids: Vec::new(),
            },
            cooldown: CooldownPolicy::new(60, cap),
            unit_price: Decimal::new(250, 2),
            acknowledgement_emojis: vec!["beers".to_owned()],
            checkmark_emoji: "white_check_mark".to_owned(),
        }
    }

    fn gateway() -> RecordingGateway {
        RecordingGateway::default()
            .with_user(Actor::new("UA", "Alice"))
            .with_user(Actor::new("UB", "Bob"))
            .with_user(Actor::new("UC", "Carol"))
            .with_user(Actor::new("UADMIN", "Ada").admin())
            .with_user(Actor::new("UX", "Deploy Bot").bot())
            .with_message(OriginMessage {
                author: UserId::new("UB"),
                text: "fixed the build".to_owned(),
                channel: "C1".to_owned(),
                ts: REACTED_TS.to_owned(),
                thread_ts: None,
            })
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("time"))
    }

    fn engine_with(cap: u32) -> (Engine, Arc<VecStore>, Arc<RecordingGateway>, ManualClock) {
        let store = Arc::new(VecStore::default());
        let gateway = Arc::new(gateway());
        let clock = clock();
        let engine = LedgerCommandEngine::new(Arc::clone(&store), Arc::clone(&gateway), settings(cap))
            .with_clock(Arc::new(clock.clone()));
        (engine, store, gateway, clock)
    }

    fn message(user: &str, text: &str) -> ChatEvent {
        ChatEvent::MessagePosted(MessagePosted {
            user_id: UserId::new(user),
            text: text.to_owned(),
            channel: "C1".to_owned(),
            ts: "1730000000.000100".to_owned(),
            thread_ts: None,
        })
    }

    fn beer_reaction(user: &str, item_user: &str) -> ChatEvent {
        ChatEvent::ReactionAdded(ReactionAdded {
            user_id: UserId::new(user),
            reaction: "beer".to_owned(),
            item_user: Some(UserId::new(item_user)),
            item: MessageRef { channel: "C1".to_owned(), ts: REACTED_TS.to_owned() },
        })
    }

    async fn seed(store: &VecStore, giver: &str, receiver: &str) {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("time");
        store.insert(NewBeer::new(UserId::new(giver), UserId::new(receiver), at)).await.expect("seed");
    }

    fn channel_text(gateway: &RecordingGateway) -> Option<String> {
        gateway.calls().into_iter().find_map(|call| match call {
            GatewayCall::Channel { text, .. } => Some(text),
            _ => None,
        })
    }

    #[tokio::test]
    async fn mention_grant_creates_entry_dm_and_confirmation() {
        let (engine, store, gateway, _) = engine_with(10);

        let outcome = engine.handle_event(&message("UA", "hey <@UB> :beer:"), "ev-1").await.expect("handled");

        assert_eq!(outcome.created.len(), 1);
        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].giver, UserId::new("UA"));
        assert_eq!(rows[0].receiver, UserId::new("UB"));
        assert!(rows[0].origin.is_none());

        let calls = gateway.calls();
        assert!(matches!(
            &calls[0],
            GatewayCall::Ephemeral { user, text, .. } if user == &UserId::new("UA") && text == "You owe <@UB> a :beer:"
        ));
        assert!(calls.contains(&GatewayCall::Direct {
            user: UserId::new("UB"),
            text: "<@UA> owes you a :beer:!".to_owned(),
        }));
        assert!(calls.contains(&GatewayCall::Reaction {
            name: "beers".to_owned(),
            channel: "C1".to_owned(),
            ts: "1730000000.000100".to_owned(),
        }));
    }

    #[tokio::test]
    async fn bot_events_never_mutate_the_ledger() {
        let (engine, store, gateway, _) = engine_with(10);

        let outcome = engine.handle_event(&message("UX", "<@UB> :beer:"), "ev-bot").await.expect("handled");

        assert_eq!(outcome.intent, "ignore");
        assert!(store.rows().await.is_empty());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn grant_past_the_cap_is_rejected_without_writes() {
        let (engine, store, gateway, _) = engine_with(2);
        engine.handle_event(&message("UA", "<@UB> <@UC> :beer:"), "ev-1").await.expect("first");

        let outcome = engine.handle_event(&message("UA", "<@UB> :beer:"), "ev-2").await.expect("second");

        assert_eq!(outcome.rejection, Some(Rejection::CooldownExceeded { remaining: 0 }));
        assert_eq!(store.rows().await.len(), 2);
        let last = gateway.calls().pop();
        assert!(matches!(
            last,
            Some(GatewayCall::Ephemeral { text, .. }) if text.contains("You have 0 left")
        ));
    }

    #[tokio::test]
    async fn multi_target_grant_needs_room_for_every_target() {
        let (engine, store, _, _) = engine_with(1);

        let outcome = engine.handle_event(&message("UA", "<@UB> <@UC> :beer:"), "ev-1").await.expect("handled");

        assert_eq!(outcome.rejection, Some(Rejection::CooldownExceeded { remaining: 1 }));
        assert!(store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_write_leaves_no_partial_grant() {
        let (engine, store, gateway, _) = engine_with(10);
        store.fail_batch_at(2);

        let result = engine.handle_event(&message("UA", "<@UB> <@UC> :beer:"), "ev-1").await;

        assert!(matches!(result, Err(ApplicationError::UpstreamUnavailable(_))));
        assert!(store.rows().await.is_empty());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn reaction_grant_past_the_cap_is_rejected_without_writes() {
        let (engine, store, gateway, _) = engine_with(1);
        engine.handle_event(&message("UA", "<@UC> :beer:"), "ev-1").await.expect("first");

        let outcome = engine.handle_event(&beer_reaction("UA", "UB"), "ev-2").await.expect("reaction");

        assert_eq!(outcome.rejection, Some(Rejection::CooldownExceeded { remaining: 0 }));
        assert!(outcome.created.is_empty());
        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, UserId::new("UC"));
        assert!(matches!(
            gateway.calls().pop(),
            Some(GatewayCall::Ephemeral { text, .. }) if text.contains("You have 0 left")
        ));
    }

    #[tokio::test]
    async fn duplicate_reaction_does_not_spend_the_allowance() {
        let (engine, store, _, _) = engine_with(2);
        engine.handle_event(&beer_reaction("UA", "UB"), "ev-1").await.expect("first");
        let replay = engine.handle_event(&beer_reaction("UA", "UB"), "ev-2").await.expect("replay");
        assert_eq!(replay.rejection, Some(Rejection::DuplicateGrant));

        let outcome = engine.handle_event(&message("UA", "<@UC> :beer:"), "ev-3").await.expect("grant");

        assert_eq!(outcome.rejection, None);
        assert_eq!(store.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn cooldown_window_slides_with_the_clock() {
        let (engine, store, _, clock) = engine_with(1);
        engine.handle_event(&message("UA", "<@UB> :beer:"), "ev-1").await.expect("first");

        clock.advance(Duration::minutes(61));
        let outcome = engine.handle_event(&message("UA", "<@UC> :beer:"), "ev-2").await.expect("second");

        assert_eq!(outcome.rejection, None);
        assert_eq!(store.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn reaction_grant_records_origin_and_uses_receiver_name() {
        let (engine, store, gateway, _) = engine_with(10);

        let outcome = engine.handle_event(&beer_reaction("UA", "UB"), "ev-1").await.expect("handled");

        assert_eq!(outcome.created.len(), 1);
        let rows = store.rows().await;
        let origin = rows[0].origin.as_ref().expect("origin snapshot");
        assert_eq!(origin.ts, REACTED_TS);
        assert_eq!(origin.text, "fixed the build");
        assert!(gateway.calls().contains(&GatewayCall::Ephemeral {
            user: UserId::new("UA"),
            conversation: Conversation::new("C1"),
            text: "You owe Bob a :beer:!".to_owned(),
        }));
    }

    #[tokio::test]
    async fn reaction_on_a_thread_reply_answers_in_that_thread() {
        let store = Arc::new(VecStore::default());
        let gateway = Arc::new(gateway().with_message(OriginMessage {
            author: UserId::new("UB"),
            text: "fixed it in the thread".to_owned(),
            channel: "C1".to_owned(),
            ts: "1730000000.000900".to_owned(),
            thread_ts: Some("1730000000.000001".to_owned()),
        }));
        let engine = LedgerCommandEngine::new(Arc::clone(&store), Arc::clone(&gateway), settings(10))
            .with_clock(Arc::new(clock()));
        let event = ChatEvent::ReactionAdded(ReactionAdded {
            user_id: UserId::new("UA"),
            reaction: "beer".to_owned(),
            item_user: Some(UserId::new("UB")),
            item: MessageRef { channel: "C1".to_owned(), ts: "1730000000.000900".to_owned() },
        });

        let outcome = engine.handle_event(&event, "ev-1").await.expect("handled");

        assert_eq!(outcome.thread_ts.as_deref(), Some("1730000000.000001"));
        let rows = store.rows().await;
        let origin = rows[0].origin.as_ref().expect("origin snapshot");
        assert_eq!(origin.text, "fixed it in the thread");
        assert!(gateway.calls().contains(&GatewayCall::Ephemeral {
            user: UserId::new("UA"),
            conversation: Conversation::new("C1").in_thread("1730000000.000001"),
            text: "You owe Bob a :beer:!".to_owned(),
        }));
    }

    #[tokio::test]
    async fn replayed_reaction_is_a_duplicate() {
        let (engine, store, _, _) = engine_with(10);
        engine.handle_event(&beer_reaction("UA", "UB"), "ev-1").await.expect("first");

        let outcome = engine.handle_event(&beer_reaction("UA", "UB"), "ev-2").await.expect("replay");

        assert_eq!(outcome.rejection, Some(Rejection::DuplicateGrant));
        assert_eq!(store.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn self_reaction_gets_a_good_for_you_reply() {
        let (engine, store, gateway, _) = engine_with(10);

        let outcome = engine.handle_event(&beer_reaction("UB", "UB"), "ev-1").await.expect("handled");

        assert_eq!(outcome.rejection, Some(Rejection::SelfGrant));
        assert!(store.rows().await.is_empty());
        assert!(matches!(
            gateway.calls().first(),
            Some(GatewayCall::Ephemeral { text, .. }) if text.starts_with("Good for you!")
        ));
    }

    #[tokio::test]
    async fn reaction_path_checks_self_grant_explicitly() {
        let (engine, store, _, _) = engine_with(10);
        let actor = Actor::new("UA", "Alice");
        let intent = crate::classifier::Intent::ReactionGrant {
            receiver: UserId::new("UA"),
            message: MessageRef { channel: "C1".to_owned(), ts: REACTED_TS.to_owned() },
        };

        let outcome = engine.execute(&beer_reaction("UA", "UA"), &actor, intent).await.expect("executed");

        assert_eq!(outcome.rejection, Some(Rejection::SelfGrant));
        assert!(store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn empty_ledger_queries_reply_with_nobody_messages() {
        let cases = [
            ("<@UBOT> list", "<@UA>, nobody owes you any :beer:"),
            ("<@UBOT> iou", "<@UA>, you don't owe anybody :beer:"),
            ("<@UBOT> leaderboard", "Nobody owes anyone :beer:!"),
        ];
        for (text, expected) in cases {
            let (engine, store, gateway, _) = engine_with(10);
            engine.handle_event(&message("UA", text), "ev-1").await.expect("handled");
            assert_eq!(channel_text(&gateway).as_deref(), Some(expected));
            assert!(store.rows().await.is_empty());
        }
    }

    #[tokio::test]
    async fn list_price_sums_the_unit_price() {
        let (engine, store, gateway, _) = engine_with(10);
        seed(&store, "UB", "UA").await;
        seed(&store, "UC", "UA").await;
        seed(&store, "UADMIN", "UA").await;

        engine.handle_event(&message("UA", "<@UBOT> list price"), "ev-1").await.expect("handled");

        let text = channel_text(&gateway).expect("channel reply");
        assert!(text.starts_with("You are owed ~$7.50 worth of :beer:"));
        assert_eq!(text.lines().skip(1).count(), 3);
        assert!(text.contains("<@UB>: 1 (~$2.50)"));
    }

    #[tokio::test]
    async fn iou_groups_by_receiver() {
        let (engine, store, gateway, _) = engine_with(10);
        seed(&store, "UA", "UB").await;
        seed(&store, "UA", "UC").await;
        seed(&store, "UA", "UB").await;

        engine.handle_event(&message("UA", "<@UBOT> iou"), "ev-1").await.expect("handled");

        assert_eq!(
            channel_text(&gateway).as_deref(),
            Some("<@UA>, you owe the following people a :beer:\n<@UB>: 2\n<@UC>: 1")
        );
    }

    #[tokio::test]
    async fn single_target_query_counts_only_that_giver() {
        let (engine, store, gateway, _) = engine_with(10);
        seed(&store, "UB", "UA").await;
        seed(&store, "UB", "UA").await;
        seed(&store, "UC", "UA").await;

        engine.handle_event(&message("UA", "<@UB> :beer:?"), "ev-1").await.expect("handled");
        assert_eq!(channel_text(&gateway).as_deref(), Some("<@UB> owes you 2 :beer:"));

        let (engine, _, gateway, _) = engine_with(10);
        engine.handle_event(&message("UA", "<@UB> :beer: ?"), "ev-2").await.expect("handled");
        assert_eq!(channel_text(&gateway).as_deref(), Some("<@UB> doesn't owe you anything"));
    }

    #[tokio::test]
    async fn leaderboard_lists_at_most_five_receivers() {
        let (engine, store, gateway, _) = engine_with(10);
        for (index, receiver) in ["U1", "U2", "U3", "U4", "U5", "U6"].iter().enumerate() {
            for _ in 0..=index {
                seed(&store, "UA", receiver).await;
            }
        }

        engine.handle_event(&message("UA", "<@UBOT> leaderboard"), "ev-1").await.expect("handled");

        let text = channel_text(&gateway).expect("channel reply");
        let entries: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(entries, vec!["<@U6>: 6", "<@U5>: 5", "<@U4>: 4", "<@U3>: 3", "<@U2>: 2"]);
    }

    #[tokio::test]
    async fn admin_clear_empties_the_ledger_and_reacts() {
        let (engine, store, gateway, _) = engine_with(10);
        seed(&store, "UA", "UB").await;
        seed(&store, "UB", "UC").await;

        let outcome = engine.handle_event(&message("UADMIN", "<@UBOT> clear"), "ev-1").await.expect("handled");

        assert_eq!(outcome.deleted, 2);
        assert!(store.rows().await.is_empty());
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::Reaction {
                name: "white_check_mark".to_owned(),
                channel: "C1".to_owned(),
                ts: "1730000000.000100".to_owned(),
            }]
        );
    }

    #[tokio::test]
    async fn non_admin_clear_is_refused() {
        let (engine, store, gateway, _) = engine_with(10);
        seed(&store, "UA", "UB").await;

        let outcome = engine.handle_event(&message("UA", "<@UBOT> clear"), "ev-1").await.expect("handled");

        assert_eq!(outcome.rejection, Some(Rejection::Unauthorized));
        assert_eq!(store.rows().await.len(), 1);
        assert!(matches!(
            gateway.calls().first(),
            Some(GatewayCall::Ephemeral { text, .. }) if text == INVALID_COMMAND_REPLY
        ));
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_block_the_primary_reply() {
        let (engine, store, gateway, _) = engine_with(10);
        gateway.fail_side_effects();

        let outcome = engine.handle_event(&message("UA", "<@UB> :beer:"), "ev-1").await.expect("handled");

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(store.rows().await.len(), 1);
        assert!(matches!(gateway.calls().first(), Some(GatewayCall::Ephemeral { .. })));
    }

    #[tokio::test]
    async fn store_failure_suppresses_every_reply() {
        let (engine, store, gateway, _) = engine_with(10);
        store.go_down();

        let result = engine.handle_event(&message("UA", "<@UBOT> list"), "ev-1").await;

        assert!(matches!(result, Err(ApplicationError::UpstreamUnavailable(_))));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_actor_is_not_found() {
        let (engine, _, gateway, _) = engine_with(10);

        let result = engine.handle_event(&message("UGHOST", "<@UB> :beer:"), "ev-1").await;

        assert!(matches!(result, Err(ApplicationError::NotFound(_))));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn threaded_messages_reply_in_thread() {
        let (engine, _, gateway, _) = engine_with(10);
        let event = ChatEvent::MessagePosted(MessagePosted {
            user_id: UserId::new("UA"),
            text: "<@UBOT> list".to_owned(),
            channel: "C1".to_owned(),
            ts: "1730000000.000300".to_owned(),
            thread_ts: Some("1730000000.000001".to_owned()),
        });

        engine.handle_event(&event, "ev-1").await.expect("handled");

        assert!(matches!(
            gateway.calls().first(),
            Some(GatewayCall::Channel { conversation, .. })
                if conversation == &Conversation::new("C1").in_thread("1730000000.000001")
        ));
    }

    #[tokio::test]
    async fn concurrent_grants_from_one_giver_respect_the_cap() {
        let (engine, store, _, _) = engine_with(1);
        let engine = Arc::new(engine);

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_event(&message("UA", "<@UB> :beer:"), "ev-1").await })
        };
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_event(&message("UA", "<@UC> :beer:"), "ev-2").await })
        };

        let outcomes = [first.await.expect("join"), second.await.expect("join")];
        let rejected = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(outcome) if outcome.rejection.is_some()))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(store.rows().await.len(), 1);
    }

    #[test]
    fn direct_and_reaction_replies_are_not_primary() {
        let direct = Reply::Direct { user: UserId::new("UB"), text: String::new() };
        let channel = Reply::Channel { text: String::new() };
        assert!(!direct.is_primary());
        assert!(channel.is_primary());
    }
}
