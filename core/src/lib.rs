//! Core library behind the `scbridge` CLI: log tailing, pattern
//! extraction, the in-process message bus, rate limiting, durable
//! dispatch, the realtime peer bridge, and the profile/VIP subsystem.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod constants;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod profile;
pub mod ratelimit;
pub mod retry;
pub mod tailer;

pub use bus::MessageBus;
pub use config::AppConfig;
pub use message::{Message, MessageLevel};
