//! Deferred event bus.
//!
//! Events are queued by `raise` and dispatched later by `drain`, once per
//! simulation tick. Handlers run during `drain` may raise further events;
//! those are dispatched within the same drain call.
//!
//! # Invariants
//! - Dispatch order is FIFO in raise order.
//! - A given (event kind, handler) pair is registered at most once.
//! - Unsubscribing something that is not subscribed is a no-op.

mod bus;

pub use bus::{
    DrainStats, Envelope, Event, EventBus, EventBusConfig, EventSource, Handler, Raiser,
    SubscriberToken,
};

/// Errors from event dispatch.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("drain stopped after {dispatched} dispatches with {pending} events still queued")]
    DrainLimitExceeded { dispatched: usize, pending: usize },
}

pub fn crate_info() -> &'static str {
    "protoworld-events v0.1.0"
}
