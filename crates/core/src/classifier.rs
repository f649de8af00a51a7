//! Maps one inbound chat event and its resolved actor onto a single intent.
//!
//! Classification is pure: no store or gateway calls happen here, so every
//! rule can be exercised with plain values.

use crate::config::AppConfig;
use crate::domain::actor::Actor;
use crate::domain::beer::UserId;
use crate::domain::event::{ChatEvent, MessagePosted, MessageRef, ReactionAdded};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub bot_user_id: UserId,
    /// Bare emoji name, e.g. `beer`.
    pub debt_emoji: String,
    pub admin_user_ids: Vec<UserId>,
}

impl ClassifierSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bot_user_id: UserId::new(config.slack.bot_user_id.trim()),
            debt_emoji: config.ledger.debt_emoji.trim().to_owned(),
            admin_user_ids: config
                .ledger
                .admin_user_ids
                .iter()
                .map(|id| UserId::new(id.trim()))
                .collect(),
        }
    }

    pub fn debt_emoji_token(&self) -> String {
        format!(":{}:", self.debt_emoji)
    }

    fn is_admin(&self, actor: &Actor) -> bool {
        actor.is_admin || self.admin_user_ids.contains(&actor.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Ignore,
    GrantDebt { targets: Vec<UserId> },
    ReactionGrant { receiver: UserId, message: MessageRef },
    QuerySingleTarget { target: UserId },
    QueryOwed { include_price: bool },
    QueryIou { include_price: bool },
    QueryLeaderboard,
    ClearLedger,
    SelfGrantAttempt,
    Unauthorized,
    UnknownCommand,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::GrantDebt { .. } => "grant_debt",
            Self::ReactionGrant { .. } => "reaction_grant",
            Self::QuerySingleTarget { .. } => "query_single_target",
            Self::QueryOwed { .. } => "query_owed",
            Self::QueryIou { .. } => "query_iou",
            Self::QueryLeaderboard => "query_leaderboard",
            Self::ClearLedger => "clear_ledger",
            Self::SelfGrantAttempt => "self_grant_attempt",
            Self::Unauthorized => "unauthorized",
            Self::UnknownCommand => "unknown_command",
        }
    }
}

pub fn classify(event: &ChatEvent, actor: &Actor, settings: &ClassifierSettings) -> Intent {
    if actor.is_bot {
        return Intent::Ignore;
    }

    match event {
        ChatEvent::MessagePosted(message) => classify_message(message, actor, settings),
        ChatEvent::ReactionAdded(reaction) => classify_reaction(reaction, actor, settings),
    }
}

fn classify_message(message: &MessagePosted, actor: &Actor, settings: &ClassifierSettings) -> Intent {
    let text = message.text.as_str();
    let token = settings.debt_emoji_token();
    let bot_mention = settings.bot_user_id.mention();
    let mentions_bot = !settings.bot_user_id.as_str().is_empty() && text.contains(&bot_mention);
    let has_emoji = text.contains(&token);

    if has_emoji && !mentions_bot {
        let targets: Vec<UserId> = extract_mentions(text)
            .into_iter()
            .filter(|id| id != &settings.bot_user_id && id != &actor.id)
            .collect();

        if let [target] = targets.as_slice() {
            if emoji_followed_by_question(text, &token) {
                return Intent::QuerySingleTarget { target: target.clone() };
            }
        }
        if !targets.is_empty() {
            return Intent::GrantDebt { targets };
        }
        return Intent::Ignore;
    }

    if mentions_bot {
        let after_mention = text
            .split_once(&bot_mention)
            .map(|(_, rest)| rest)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        return classify_command(&after_mention, actor, settings);
    }

    Intent::Ignore
}

fn classify_command(command: &str, actor: &Actor, settings: &ClassifierSettings) -> Intent {
    let include_price = command.contains("price");

    if command.starts_with("list") {
        Intent::QueryOwed { include_price }
    } else if command.starts_with("iou") {
        Intent::QueryIou { include_price }
    } else if command.starts_with("leaderboard") {
        Intent::QueryLeaderboard
    } else if command.starts_with("clear") {
        if settings.is_admin(actor) {
            Intent::ClearLedger
        } else {
            Intent::Unauthorized
        }
    } else {
        Intent::UnknownCommand
    }
}

fn classify_reaction(
    reaction: &ReactionAdded,
    actor: &Actor,
    settings: &ClassifierSettings,
) -> Intent {
    if normalize_reaction(&reaction.reaction) != settings.debt_emoji {
        return Intent::Ignore;
    }

    let Some(receiver) = reaction.item_user.clone() else {
        return Intent::Ignore;
    };

    if receiver == actor.id {
        return Intent::SelfGrantAttempt;
    }

    Intent::ReactionGrant { receiver, message: reaction.item.clone() }
}

/// Strips surrounding colons and any skin-tone suffix (`beer::skin-tone-2`).
pub fn normalize_reaction(token: &str) -> String {
    let trimmed = token.trim().trim_matches(':');
    let base = trimmed.split("::").next().unwrap_or(trimmed);
    base.to_ascii_lowercase()
}

/// User ids mentioned as `<@U123>` or `<@U123|name>`, in order, each once.
pub fn extract_mentions(text: &str) -> Vec<UserId> {
    let mut mentions: Vec<UserId> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("<@") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('>') else {
            break;
        };
        let inner = &after[..end];
        let id = inner.split('|').next().unwrap_or_default().trim();
        if !id.is_empty() && id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            let id = UserId::new(id);
            if !mentions.contains(&id) {
                mentions.push(id);
            }
        }
        rest = &after[end + 1..];
    }

    mentions
}

fn emoji_followed_by_question(text: &str, token: &str) -> bool {
    text.match_indices(token).any(|(index, matched)| {
        text[index + matched.len()..].trim_start().starts_with('?')
    })
}
