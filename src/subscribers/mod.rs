//! # Event subscribers for the connvisor runtime.
//!
//! This module provides the [`Subscribe`] trait and the built-in
//! [`LogWriter`] for handling runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   supervisor / acceptor / workers ── publish(Event) ──► Bus
//!                                                          │
//!                                              subscriber_listener()
//!                                                          │
//!                                                   SubscriberSet
//!                                              ┌──────────┼─────────┐
//!                                              ▼          ▼         ▼
//!                                          LogWriter   Metrics   Custom
//! ```
//!
//! Implement [`Subscribe`] for custom sinks; each subscriber runs on its
//! own worker with a bounded queue and panic isolation.

mod log;
mod set;
mod subscriber;

pub use log::{LogLevel, LogWriter};
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
