//! Telegram bot that downloads videos from links and sends them back, with
//! bounded concurrency, live progress and cooperative cancellation.

pub mod admin;
pub mod backend;
pub mod bot;
pub mod cancel;
pub mod config;
pub mod error;
pub mod format;
pub mod messenger;
pub mod pending;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod slots;
pub mod store;
pub mod sweep;
pub mod transfer;
