use protoworld_common::EntityId;
use protoworld_prototype::Prototype;

use crate::component::ComponentRegistry;
use crate::entity::{ClassRegistry, Entity};

/// Builds concrete entities from resolved prototypes.
///
/// Holds the two lookup collaborators: component type name to component
/// constructor, and class name to entity class constructor.
#[derive(Debug, Default)]
pub struct EntityFactory {
    components: ComponentRegistry,
    classes: ClassRegistry,
}

impl EntityFactory {
    pub fn new(components: ComponentRegistry, classes: ClassRegistry) -> Self {
        Self {
            components,
            classes,
        }
    }

    /// Factory with the built-in components and no extra classes.
    pub fn with_builtins() -> Self {
        Self::new(ComponentRegistry::with_builtins(), ClassRegistry::new())
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.components
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn classes_mut(&mut self) -> &mut ClassRegistry {
        &mut self.classes
    }

    /// Assemble an uninitialized entity from `prototype`.
    ///
    /// Best effort: a component whose type is unknown, or whose parameters
    /// fail to load, is logged and left out. The spawn itself never fails.
    pub fn create(&self, prototype: &Prototype, id: EntityId) -> Entity {
        let class = self.classes.create(prototype.class());
        let mut entity = Entity::new(id, prototype.id(), class);
        entity.set_name(prototype.display_name());

        for (type_name, params) in prototype.components().iter() {
            let Some(mut component) = self.components.create(type_name) else {
                tracing::warn!(
                    prototype = prototype.id(),
                    component = type_name,
                    "unknown component type, skipping"
                );
                continue;
            };
            if let Err(e) = component.load(params) {
                tracing::warn!(
                    prototype = prototype.id(),
                    component = type_name,
                    "component failed to load, skipping: {e}"
                );
                continue;
            }
            entity.attach(component);
        }

        if let Some(data) = prototype.data() {
            entity.apply_data(data);
        }

        tracing::debug!(
            entity = %id,
            prototype = prototype.id(),
            components = entity.components().len(),
            "entity assembled"
        );
        entity
    }
}
