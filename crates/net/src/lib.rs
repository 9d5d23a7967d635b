//! Inbound message reconciliation.
//!
//! Network messages can arrive before the entity they address has been
//! spawned locally. The reconciler buffers such messages and retries them
//! on every later arrival until they are delivered or their expiry window
//! has passed.
//!
//! # Invariants
//! - Nothing is delivered before the entity manager is initialized.
//! - A buffered message leaves the buffer by delivery or by expiry, never both.
//! - Null messages are neither buffered nor delivered.

mod reconciler;

pub use reconciler::{
    BufferedMessage, HandleOutcome, MessageReconciler, ReconcilerConfig, SweepStats, parse_message,
};

/// Errors from inbound message handling.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid expiry: {0} seconds")]
    InvalidExpiry(f64),
}

pub fn crate_info() -> &'static str {
    "protoworld-net v0.1.0"
}
