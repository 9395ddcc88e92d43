//! # qalabot-session
//!
//! Per-user conversation state: the phase/draft model and the concurrent
//! in-memory store with periodic idle eviction.

pub mod state;
pub mod store;

pub use state::{Conversation, Draft, Phase, RegistrationDraft, ReportDraft};
pub use store::SessionStore;
