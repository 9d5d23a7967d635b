//! Entity kernel: owns live entities, assembles them from resolved
//! prototypes and drives their lifecycle.
//!
//! # Invariants
//! - Entity ids are unique; a colliding spawn is always an error.
//! - Generated ids are never reused within a manager's lifetime.
//! - Every live entity of an initialized manager is itself initialized.
//! - Unknown component types never abort a spawn; they are logged and skipped.

mod component;
mod entity;
mod factory;
mod manager;

pub use component::{Component, ComponentList, ComponentRegistry, Label, Transform};
pub use entity::{BaseEntity, ClassRegistry, Entity, EntityClass};
pub use factory::EntityFactory;
pub use manager::{EntityEvent, EntityManager, ManagerConfig};

use protoworld_common::EntityId;

/// Errors from entity lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("entity id {0} is already in use")]
    DuplicateId(EntityId),
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("unknown prototype: {0}")]
    UnknownPrototype(String),
    #[error("entity id space exhausted")]
    IdSpaceExhausted,
}

/// Errors raised by a component while reading its parameters.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("component {component}: parameter {key:?} {reason}")]
    InvalidParam {
        component: String,
        key: String,
        reason: String,
    },
}

pub fn crate_info() -> &'static str {
    "protoworld-kernel v0.1.0"
}
