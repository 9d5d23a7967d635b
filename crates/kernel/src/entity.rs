use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use protoworld_common::{EntityId, NetMessage, Position};

use crate::component::{Component, ComponentList};

/// Concrete entity implementation selected by a prototype's `class`.
///
/// Hooks receive the owning entity's id and components rather than the
/// entity itself, so a class never holds a reference to its owner.
pub trait EntityClass: fmt::Debug {
    fn class_name(&self) -> &str;

    fn pre_initialize(&mut self, _id: EntityId, _components: &mut ComponentList) {}

    fn initialize(&mut self, _id: EntityId, _components: &mut ComponentList) {}

    fn destroy(&mut self, _id: EntityId, _components: &mut ComponentList) {}

    /// Offered every bulk-data key no component claimed. Returns `true` if used.
    fn apply_data(&mut self, _key: &str, _value: &Value) -> bool {
        false
    }

    /// Offered network messages before the components. Returns `true` if consumed.
    fn handle_message(
        &mut self,
        _id: EntityId,
        _components: &mut ComponentList,
        _message: &NetMessage,
    ) -> bool {
        false
    }
}

/// Default class for prototypes that do not name one.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseEntity;

impl BaseEntity {
    pub const CLASS_NAME: &'static str = "Entity";
}

impl EntityClass for BaseEntity {
    fn class_name(&self) -> &str {
        Self::CLASS_NAME
    }
}

type ClassCtor = Box<dyn Fn() -> Box<dyn EntityClass>>;

/// Maps class-name strings to entity class constructors.
#[derive(Default)]
pub struct ClassRegistry {
    ctors: BTreeMap<String, ClassCtor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn EntityClass> + 'static,
    {
        self.ctors.insert(class_name.into(), Box::new(ctor));
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.ctors.contains_key(class_name)
    }

    /// Instantiate `class_name`, falling back to [`BaseEntity`] when it is
    /// absent or unregistered.
    pub fn create(&self, class_name: Option<&str>) -> Box<dyn EntityClass> {
        let Some(name) = class_name else {
            return Box::new(BaseEntity);
        };
        match self.ctors.get(name) {
            Some(ctor) => ctor(),
            None => {
                tracing::warn!(class = name, "unknown entity class, using base entity");
                Box::new(BaseEntity)
            }
        }
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.ctors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A live entity: identity, prototype reference and attached components.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    prototype: String,
    name: String,
    class: Box<dyn EntityClass>,
    components: ComponentList,
    initialized: bool,
}

impl Entity {
    pub fn new(id: EntityId, prototype: impl Into<String>, class: Box<dyn EntityClass>) -> Self {
        Self {
            id,
            prototype: prototype.into(),
            name: String::new(),
            class,
            components: ComponentList::new(),
            initialized: false,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn prototype(&self) -> &str {
        &self.prototype
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn class_name(&self) -> &str {
        self.class.class_name()
    }

    pub fn class(&self) -> &dyn EntityClass {
        self.class.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn components(&self) -> &ComponentList {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut ComponentList {
        &mut self.components
    }

    pub fn attach(&mut self, component: Box<dyn Component>) {
        self.components.attach(component);
    }

    /// Position reported by the first component with a transform capability.
    pub fn position(&self) -> Option<Position> {
        self.components.iter().find_map(|c| c.position())
    }

    /// Final override pass with the prototype's bulk-data blob.
    ///
    /// `name` renames the entity, keys naming an attached component are
    /// applied to it, everything else is offered to the entity class.
    pub fn apply_data(&mut self, data: &Value) {
        let Value::Object(fields) = data else {
            tracing::warn!(entity = %self.id, "bulk data is not an object, ignoring");
            return;
        };
        for (key, value) in fields {
            if key == "name" {
                if let Some(name) = value.as_str() {
                    self.name = name.to_string();
                    continue;
                }
            }
            if let (Some(component), Value::Object(params)) = (self.components.get_mut(key), value) {
                if let Err(e) = component.apply_data(params) {
                    tracing::warn!(entity = %self.id, component = %key, "bulk data rejected: {e}");
                }
                continue;
            }
            if !self.class.apply_data(key, value) {
                tracing::debug!(entity = %self.id, key = %key, "unused bulk data key");
            }
        }
    }

    /// Network capability: the class sees the message first, then each
    /// component until one consumes it.
    pub fn handle_message(&mut self, message: &NetMessage) -> bool {
        if self.class.handle_message(self.id, &mut self.components, message) {
            return true;
        }
        let id = self.id;
        self.components
            .iter_mut()
            .any(|c| c.handle_message(id, message))
    }

    pub(crate) fn pre_initialize(&mut self) {
        self.class.pre_initialize(self.id, &mut self.components);
    }

    pub(crate) fn initialize_components(&mut self) {
        let id = self.id;
        for component in self.components.iter_mut() {
            component.initialize(id);
        }
    }

    pub(crate) fn initialize(&mut self) {
        self.class.initialize(self.id, &mut self.components);
        self.initialized = true;
    }

    pub(crate) fn destroy(&mut self) {
        self.class.destroy(self.id, &mut self.components);
        let id = self.id;
        for component in self.components.iter_mut() {
            component.destroy(id);
        }
        self.initialized = false;
    }
}
