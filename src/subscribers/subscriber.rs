//! # Event subscriber trait.
//!
//! Provides [`Subscribe`], the extension point for plugging custom event
//! handlers (logging, metrics, audit) into the runtime.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are caught and reported)
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow drops events
//!   for that subscriber only)
//! - Panics do not crash the runtime or other subscribers
//! - Subscribers never block publishers

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// Receives events via a dedicated worker task with a bounded queue.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from the subscriber's own worker, sequentially and in FIFO
    /// order. Handle errors internally; panics are caught and isolated.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for overflow/panic reporting.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
