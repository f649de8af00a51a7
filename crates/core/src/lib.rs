pub mod classifier;
pub mod config;
pub mod cooldown;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod ports;
pub mod render;

#[cfg(test)]
mod testing;

pub use classifier::{classify, ClassifierSettings, Intent};
pub use cooldown::{Allowance, CooldownGuard, CooldownPolicy};
pub use domain::actor::Actor;
pub use domain::beer::{Beer, BeerId, NewBeer, OriginMessage, UserId};
pub use domain::event::{ChatEvent, Conversation, MessagePosted, MessageRef, ReactionAdded};
pub use engine::{CommandOutcome, EngineSettings, LedgerCommandEngine, Reply};
pub use errors::{ApplicationError, Rejection};
pub use ports::{
    BeerFilter, Clock, GatewayError, LedgerStore, ManualClock, MessagingGateway, StoreError,
    SystemClock,
};
