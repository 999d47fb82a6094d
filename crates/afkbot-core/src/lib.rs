//! Core domain + application logic for the AFK reward bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind ports
//! (traits) implemented in adapter crates.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod ports;
pub mod rank;
pub mod store;
pub mod tracker;

pub use errors::{Error, Result};
