//! Persistence of placed entities as save records.
//!
//! A save record keeps only what is needed to re-spawn an entity from its
//! template: position, facing, template id and display name. Component
//! state is rebuilt from the template on restore.
//!
//! # Invariants
//! - `X`/`Y` are written as invariant decimal text (`.` separator).
//! - `direction` is read case-insensitively.

mod record;

pub use record::{SaveFile, SaveRecord};

use protoworld_kernel::EntityError;

/// Errors from save file operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entity error: {0}")]
    Entity(#[from] EntityError),
}

pub fn crate_info() -> &'static str {
    "protoworld-persist v0.1.0"
}
