//! Prototype store: declarative entity templates ("prototypes") with
//! single-parent, multi-level inheritance.
//!
//! Templates are loaded from JSON, then resolved with two global passes:
//! stage 0 links every prototype to its parent, stage 1 pushes merged state
//! from each root down through its descendants.
//!
//! # Invariants
//! - Prototype ids are unique within a store.
//! - A child's own parameter keys always win over inherited ones.
//! - Parent and child never alias parameter data; merges deep-copy.
//! - Inheritance chains are acyclic; stage 0 rejects cycles.

mod schema;
mod store;

pub use schema::{ComponentDef, ComponentParams, Placement, SnapFlags, TemplateDef};
pub use store::{
    ComponentSet, Prototype, PrototypeHandle, PrototypeStore, SyncReport, SyncStage, SyncStatus,
};

/// Collaborator capability: answers whether a component type name is known.
///
/// Supplied by whoever owns the component factory. When absent, every
/// component type is accepted at load time.
pub trait ComponentCatalog {
    fn contains_component(&self, type_name: &str) -> bool;
}

/// Errors from prototype loading and inheritance resolution.
#[derive(Debug, thiserror::Error)]
pub enum PrototypeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate prototype id: {0}")]
    DuplicateId(String),
    #[error("prototype {id} names unknown parent {parent}")]
    MissingParent { id: String, parent: String },
    #[error("inheritance cycle through prototype {0}")]
    InheritanceCycle(String),
    #[error("propagate stage requested before link stage")]
    NotLinked,
}

pub fn crate_info() -> &'static str {
    "protoworld-prototype v0.1.0"
}
