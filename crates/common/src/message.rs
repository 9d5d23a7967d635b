use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EntityId;

/// Payload discriminator of an inbound network message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKind(pub String);

impl MessageKind {
    /// The designated no-op discriminator. Never buffered, never delivered.
    pub const NULL: &'static str = "Null";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn null() -> Self {
        Self(Self::NULL.to_string())
    }

    pub fn is_null(&self) -> bool {
        self.0 == Self::NULL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed network message addressed to a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetMessage {
    #[serde(rename = "entity")]
    pub target: EntityId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NetMessage {
    pub fn new(target: EntityId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            target,
            kind: MessageKind::new(kind),
            payload,
        }
    }
}
