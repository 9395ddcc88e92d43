//! # qalabot-core
//!
//! Core types, traits, configuration, input validation, and error handling
//! for the Qalabot citizen-reporting bot.

pub mod config;
pub mod error;
pub mod traits;
pub mod update;
pub mod validate;
