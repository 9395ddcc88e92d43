//! # qalabot-channels
//!
//! Messaging platform integrations for Qalabot.

pub mod telegram;
