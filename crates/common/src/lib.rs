//! Shared types for the protoworld entity runtime.
//!
//! Everything here is plain data: identifiers, spatial values and the
//! addressed network message form. No crate-level state lives here.

mod message;
mod types;

pub use message::{MessageKind, NetMessage};
pub use types::{Direction, EntityId, ParseDirectionError, Position};

pub fn crate_info() -> &'static str {
    "protoworld-common v0.1.0"
}
