//! Core logic for the certbot chat bot.
//!
//! This crate is framework-agnostic. The chat host (Telegram) and the OS process
//! runner live behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod plugin;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod security;

pub use errors::{Error, Result};
