use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use protoworld_common::{Direction, EntityId, NetMessage, Position};
use protoworld_prototype::{ComponentCatalog, ComponentParams};

use crate::ComponentError;

/// A capability unit attached to an entity, configured from prototype data.
pub trait Component: Any + fmt::Debug {
    /// Registry name of this component type.
    fn type_name(&self) -> &str;

    /// Read parameters from a prototype blob.
    fn load(&mut self, params: &ComponentParams) -> Result<(), ComponentError>;

    fn initialize(&mut self, _owner: EntityId) {}

    fn destroy(&mut self, _owner: EntityId) {}

    /// Bulk-data override applied after every component is attached.
    fn apply_data(&mut self, params: &ComponentParams) -> Result<(), ComponentError> {
        self.load(params)
    }

    /// Network capability. Returns `true` when the message was consumed.
    fn handle_message(&mut self, _owner: EntityId, _message: &NetMessage) -> bool {
        false
    }

    /// Transform capability.
    fn position(&self) -> Option<Position> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The components of one entity, at most one per type name, in attach order.
#[derive(Debug, Default)]
pub struct ComponentList {
    items: Vec<Box<dyn Component>>,
}

impl ComponentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a component, replacing any existing one of the same type.
    pub fn attach(&mut self, component: Box<dyn Component>) {
        match self
            .items
            .iter()
            .position(|c| c.type_name() == component.type_name())
        {
            Some(slot) => self.items[slot] = component,
            None => self.items.push(component),
        }
    }

    pub fn detach(&mut self, type_name: &str) -> Option<Box<dyn Component>> {
        let slot = self.items.iter().position(|c| c.type_name() == type_name)?;
        Some(self.items.remove(slot))
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn Component> {
        self.items
            .iter()
            .find(|c| c.type_name() == type_name)
            .map(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, type_name: &str) -> Option<&mut (dyn Component + 'static)> {
        self.items
            .iter_mut()
            .find(|c| c.type_name() == type_name)
            .map(|c| c.as_mut())
    }

    /// First component of concrete type `T`.
    pub fn find<T: Component>(&self) -> Option<&T> {
        self.items.iter().find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn find_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.items
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Component> {
        self.items.iter().map(|c| c.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Component>> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

type ComponentCtor = Box<dyn Fn() -> Box<dyn Component>>;

/// Maps component type names to constructors.
#[derive(Default)]
pub struct ComponentRegistry {
    ctors: BTreeMap<String, ComponentCtor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `Transform` and `Label`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Transform::TYPE_NAME, || Box::new(Transform::default()));
        registry.register(Label::TYPE_NAME, || Box::new(Label::default()));
        registry
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Component> + 'static,
    {
        self.ctors.insert(type_name.into(), Box::new(ctor));
    }

    /// A fresh instance of `type_name`, or `None` when it is not registered.
    pub fn create(&self, type_name: &str) -> Option<Box<dyn Component>> {
        self.ctors.get(type_name).map(|ctor| ctor())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.ctors.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }
}

impl ComponentCatalog for ComponentRegistry {
    fn contains_component(&self, type_name: &str) -> bool {
        self.contains(type_name)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.ctors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Position and facing on the map plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Position,
    pub direction: Direction,
}

impl Transform {
    pub const TYPE_NAME: &'static str = "Transform";

    fn read_coord(params: &ComponentParams, key: &str) -> Result<Option<f32>, ComponentError> {
        match params.get(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(|f| Some(f as f32)).ok_or_else(|| ComponentError::InvalidParam {
                component: Self::TYPE_NAME.into(),
                key: key.into(),
                reason: format!("expected a number, got {v}"),
            }),
        }
    }
}

impl Component for Transform {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn load(&mut self, params: &ComponentParams) -> Result<(), ComponentError> {
        if let Some(x) = Self::read_coord(params, "x")? {
            self.position.x = x;
        }
        if let Some(y) = Self::read_coord(params, "y")? {
            self.position.y = y;
        }
        if let Some(dir) = params.get("direction") {
            let text = dir.as_str().unwrap_or_default();
            self.direction = text.parse().map_err(|e| ComponentError::InvalidParam {
                component: Self::TYPE_NAME.into(),
                key: "direction".into(),
                reason: format!("{e}"),
            })?;
        }
        Ok(())
    }

    fn position(&self) -> Option<Position> {
        Some(self.position)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Free-form text parameters: display strings, tooltips and the like.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Label {
    pub fields: ComponentParams,
}

impl Label {
    pub const TYPE_NAME: &'static str = "Label";

    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl Component for Label {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn load(&mut self, params: &ComponentParams) -> Result<(), ComponentError> {
        for (key, value) in params {
            self.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
