//! Slack integration for the beer ledger.
//!
//! - **Events** (`events`) - Events API payload decoding and handler dispatch
//! - **Signatures** (`signature`) - `X-Slack-Signature` verification
//! - **Web API** (`web_api`) - [`MessagingGateway`](beerbot_core::ports::MessagingGateway)
//!   backed by the Slack Web API
//!
//! # Architecture
//!
//! ```text
//! POST /slack/events → SignatureVerifier → EventDispatcher → LedgerEventHandler
//!                                                                 ↓
//!                      SlackWebClient ← replies ← LedgerCommandEngine
//! ```

pub mod events;
pub mod signature;
pub mod web_api;

pub use events::{decode_request, ledger_dispatcher, EventDispatcher, EventsApiRequest};
pub use signature::{SignatureError, SignatureVerifier};
pub use web_api::SlackWebClient;
