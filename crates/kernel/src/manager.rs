use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use protoworld_common::{Direction, EntityId, NetMessage, Position};
use protoworld_prototype::PrototypeStore;

use crate::component::Transform;
use crate::entity::Entity;
use crate::factory::EntityFactory;
use crate::EntityError;

/// Positions closer than this are considered the same spot by `query_at`.
const POSITION_EPSILON: f32 = 1e-3;

/// Lifecycle record produced by every change to the entity set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityEvent {
    Spawned { id: EntityId, prototype: String },
    Initialized { id: EntityId },
    Deleted { id: EntityId },
}

/// Tunables for [`EntityManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// First identifier handed out by the generator.
    pub first_entity_id: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { first_entity_id: 1 }
    }
}

/// Owns the live entity set and drives entity lifecycle.
///
/// Entities spawned before [`EntityManager::initialize`] stay uninitialized
/// until that call initializes them in one batch; later spawns are
/// initialized immediately.
#[derive(Debug)]
pub struct EntityManager {
    config: ManagerConfig,
    prototypes: PrototypeStore,
    factory: EntityFactory,
    entities: BTreeMap<EntityId, Entity>,
    /// `None` once `u64::MAX` has been handed out.
    next_id: Option<EntityId>,
    initialized: bool,
    event_log: Vec<EntityEvent>,
}

impl EntityManager {
    /// `prototypes` should already be resolved.
    pub fn new(prototypes: PrototypeStore, factory: EntityFactory) -> Self {
        Self::with_config(prototypes, factory, ManagerConfig::default())
    }

    pub fn with_config(prototypes: PrototypeStore, factory: EntityFactory, config: ManagerConfig) -> Self {
        Self {
            next_id: Some(EntityId(config.first_entity_id)),
            config,
            prototypes,
            factory,
            entities: BTreeMap::new(),
            initialized: false,
            event_log: Vec::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn prototypes(&self) -> &PrototypeStore {
        &self.prototypes
    }

    pub fn factory(&self) -> &EntityFactory {
        &self.factory
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drain and return the lifecycle log.
    pub fn drain_events(&mut self) -> Vec<EntityEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn events(&self) -> &[EntityEvent] {
        &self.event_log
    }

    /// Spawn an entity from `prototype_id`.
    ///
    /// With `id == None` a fresh identifier is generated. A supplied id that
    /// is already live is an error; a supplied id also moves the generator
    /// past it so later generated ids cannot collide.
    pub fn spawn(&mut self, prototype_id: &str, id: Option<EntityId>) -> Result<EntityId, EntityError> {
        let id = self.create_entity(prototype_id, id)?;
        if self.initialized {
            self.initialize_entity(id);
        }
        Ok(id)
    }

    /// Spawn and place an entity, attaching a `Transform` if the prototype
    /// has none. The transform is in place before initialization runs.
    pub fn spawn_at(
        &mut self,
        prototype_id: &str,
        position: Position,
        direction: Direction,
    ) -> Result<EntityId, EntityError> {
        let id = self.create_entity(prototype_id, None)?;
        let entity = self.entities.get_mut(&id).ok_or(EntityError::NotFound(id))?;
        match entity.components_mut().find_mut::<Transform>() {
            Some(transform) => {
                transform.position = position;
                transform.direction = direction;
            }
            None => entity.attach(Box::new(Transform { position, direction })),
        }
        if self.initialized {
            self.initialize_entity(id);
        }
        Ok(id)
    }

    /// Build and store an entity without running its initialize hooks.
    fn create_entity(&mut self, prototype_id: &str, id: Option<EntityId>) -> Result<EntityId, EntityError> {
        let prototype = self
            .prototypes
            .get(prototype_id)
            .ok_or_else(|| EntityError::UnknownPrototype(prototype_id.to_string()))?;
        let id = match id {
            Some(id) => id,
            None => self.next_id.ok_or(EntityError::IdSpaceExhausted)?,
        };
        if self.entities.contains_key(&id) {
            return Err(EntityError::DuplicateId(id));
        }
        if self.next_id.is_some_and(|next| id >= next) {
            self.next_id = id.next();
        }

        let entity = self.factory.create(prototype, id);
        self.entities.insert(id, entity);
        self.event_log.push(EntityEvent::Spawned {
            id,
            prototype: prototype_id.to_string(),
        });
        tracing::debug!(entity = %id, prototype = prototype_id, "spawned");
        Ok(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn exists(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Destroy and remove one entity.
    pub fn delete(&mut self, id: EntityId) -> Result<(), EntityError> {
        let mut entity = self.entities.remove(&id).ok_or(EntityError::NotFound(id))?;
        entity.destroy();
        self.event_log.push(EntityEvent::Deleted { id });
        tracing::debug!(entity = %id, "deleted");
        Ok(())
    }

    pub fn delete_all(&mut self) {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            if let Some(mut entity) = self.entities.remove(&id) {
                entity.destroy();
                self.event_log.push(EntityEvent::Deleted { id });
            }
        }
    }

    /// Live entities matching `predicate`, in id order.
    ///
    /// Lazy and unsnapshotted: each call walks the current entity set.
    pub fn query<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Entity> + 'a
    where
        P: Fn(&Entity) -> bool + 'a,
    {
        self.entities.values().filter(move |e| predicate(e))
    }

    /// Entities whose transform sits at `position`. Linear scan.
    pub fn query_at(&self, position: Position) -> impl Iterator<Item = &Entity> + '_ {
        self.query(move |e| {
            e.position()
                .is_some_and(|p| p.abs_diff_eq(position, POSITION_EPSILON))
        })
    }

    /// Entities whose transform lies within `radius` of `position`. Linear scan.
    pub fn query_near(&self, position: Position, radius: f32) -> impl Iterator<Item = &Entity> + '_ {
        self.query(move |e| {
            e.position()
                .is_some_and(|p| p.distance_squared(position) <= radius * radius)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Mark the manager initialized and initialize every pending entity.
    pub fn initialize(&mut self) {
        self.initialized = true;
        self.initialize_entities();
    }

    /// Drive every not-yet-initialized entity through
    /// pre-initialize, component initialize, initialize.
    pub fn initialize_entities(&mut self) -> usize {
        let _span = tracing::info_span!("initialize_entities").entered();
        let pending: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.is_initialized())
            .map(Entity::id)
            .collect();
        for id in &pending {
            self.initialize_entity(*id);
        }
        tracing::info!(count = pending.len(), "entities initialized");
        pending.len()
    }

    fn initialize_entity(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.pre_initialize();
        entity.initialize_components();
        entity.initialize();
        self.event_log.push(EntityEvent::Initialized { id });
    }

    /// Hand a network message to its target entity.
    ///
    /// Returns `false` when the target does not exist.
    pub fn deliver(&mut self, message: &NetMessage) -> bool {
        let Some(entity) = self.entities.get_mut(&message.target) else {
            return false;
        };
        if !entity.handle_message(message) {
            tracing::debug!(
                entity = %message.target,
                kind = %message.kind,
                "message delivered but not handled"
            );
        }
        true
    }

    /// Tear down every live entity and return to the uninitialized state.
    pub fn shutdown(&mut self) {
        let _span = tracing::info_span!("entity_shutdown", entities = self.entities.len()).entered();
        self.delete_all();
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentList, ComponentRegistry};
    use crate::entity::ClassRegistry;
    use crate::entity::EntityClass;
    use crate::ComponentError;
    use pretty_assertions::assert_eq;
    use protoworld_prototype::ComponentParams;
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Trace = Rc<RefCell<Vec<String>>>;

    #[derive(Debug)]
    struct Probe {
        trace: Trace,
    }

    impl Component for Probe {
        fn type_name(&self) -> &str {
            "Probe"
        }

        fn load(&mut self, _params: &ComponentParams) -> Result<(), ComponentError> {
            Ok(())
        }

        fn initialize(&mut self, owner: EntityId) {
            self.trace.borrow_mut().push(format!("init {}", owner.0));
        }

        fn destroy(&mut self, owner: EntityId) {
            self.trace.borrow_mut().push(format!("destroy {}", owner.0));
        }

        fn handle_message(&mut self, owner: EntityId, message: &NetMessage) -> bool {
            self.trace
                .borrow_mut()
                .push(format!("msg {} {}", owner.0, message.kind));
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn manager(trace: &Trace) -> EntityManager {
        let mut store = PrototypeStore::new();
        store
            .load_json(
                r#"[
                    {"id": "probe", "components": [{"type": "Probe"}]},
                    {"id": "marker", "components": [{"type": "Transform", "x": 2, "y": 3}]}
                ]"#,
                None,
            )
            .unwrap();
        store.resolve_inheritance().unwrap();

        let mut components = ComponentRegistry::with_builtins();
        let t = Rc::clone(trace);
        components.register("Probe", move || {
            Box::new(Probe {
                trace: Rc::clone(&t),
            })
        });
        EntityManager::new(store, EntityFactory::new(components, ClassRegistry::new()))
    }

    #[test]
    fn generated_ids_are_fresh_and_monotonic() {
        let mut m = manager(&Trace::default());
        let a = m.spawn("marker", None).unwrap();
        let b = m.spawn("marker", None).unwrap();
        assert_eq!(a, EntityId(1));
        assert_eq!(b, EntityId(2));
        m.delete(a).unwrap();
        let c = m.spawn("marker", None).unwrap();
        assert_eq!(c, EntityId(3));
    }

    #[test]
    fn duplicate_supplied_id_fails() {
        let mut m = manager(&Trace::default());
        m.spawn("marker", Some(EntityId(5))).unwrap();
        let err = m.spawn("marker", Some(EntityId(5))).unwrap_err();
        assert!(matches!(err, EntityError::DuplicateId(EntityId(5))));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn supplied_id_advances_generator() {
        let mut m = manager(&Trace::default());
        m.spawn("marker", Some(EntityId(10))).unwrap();
        assert_eq!(m.spawn("marker", None).unwrap(), EntityId(11));
    }

    #[test]
    fn max_supplied_id_spawns_then_generator_is_exhausted() {
        let mut m = manager(&Trace::default());
        let last = EntityId(u64::MAX);
        assert_eq!(m.spawn("marker", Some(last)).unwrap(), last);
        assert!(matches!(
            m.spawn("marker", None),
            Err(EntityError::IdSpaceExhausted)
        ));
        // Lower supplied ids are still accepted.
        assert_eq!(m.spawn("marker", Some(EntityId(3))).unwrap(), EntityId(3));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn generator_starting_at_max_hands_out_one_id() {
        let mut store = PrototypeStore::new();
        store.load_json(r#"{"id": "marker"}"#, None).unwrap();
        store.resolve_inheritance().unwrap();
        let config = ManagerConfig {
            first_entity_id: u64::MAX,
        };
        let mut m = EntityManager::with_config(store, EntityFactory::with_builtins(), config);
        assert_eq!(m.spawn("marker", None).unwrap(), EntityId(u64::MAX));
        assert!(matches!(
            m.spawn("marker", None),
            Err(EntityError::IdSpaceExhausted)
        ));
    }

    #[test]
    fn unknown_prototype_fails() {
        let mut m = manager(&Trace::default());
        assert!(matches!(
            m.spawn("ghost", None),
            Err(EntityError::UnknownPrototype(_))
        ));
    }

    #[test]
    fn delete_unknown_fails() {
        let mut m = manager(&Trace::default());
        assert!(matches!(
            m.delete(EntityId(42)),
            Err(EntityError::NotFound(EntityId(42)))
        ));
    }

    #[test]
    fn spawns_before_initialize_are_batched() {
        let trace = Trace::default();
        let mut m = manager(&trace);
        let a = m.spawn("probe", None).unwrap();
        assert!(!m.get(a).unwrap().is_initialized());
        assert!(trace.borrow().is_empty());

        m.initialize();
        assert!(m.get(a).unwrap().is_initialized());
        assert_eq!(*trace.borrow(), vec!["init 1"]);

        let b = m.spawn("probe", None).unwrap();
        assert!(m.get(b).unwrap().is_initialized());
        assert_eq!(*trace.borrow(), vec!["init 1", "init 2"]);
    }

    #[test]
    fn query_is_reevaluated_each_call() {
        let mut m = manager(&Trace::default());
        m.spawn("marker", None).unwrap();
        m.spawn("probe", None).unwrap();
        assert_eq!(m.query(|e| e.prototype() == "marker").count(), 1);
        m.spawn("marker", None).unwrap();
        assert_eq!(m.query(|e| e.prototype() == "marker").count(), 2);
    }

    #[test]
    fn query_at_matches_transform_position() {
        let mut m = manager(&Trace::default());
        let marker = m.spawn("marker", None).unwrap();
        m.spawn("probe", None).unwrap();
        let placed = m
            .spawn_at("probe", Position::new(7.0, 7.0), Direction::East)
            .unwrap();

        let at: Vec<EntityId> = m.query_at(Position::new(2.0, 3.0)).map(Entity::id).collect();
        assert_eq!(at, vec![marker]);
        let near: Vec<EntityId> = m
            .query_near(Position::new(6.0, 7.0), 1.5)
            .map(Entity::id)
            .collect();
        assert_eq!(near, vec![placed]);
    }

    /// Records, at initialize time, where the entity's transform sits.
    #[derive(Debug)]
    struct Surveyor {
        seen: Trace,
    }

    impl EntityClass for Surveyor {
        fn class_name(&self) -> &str {
            "Surveyor"
        }

        fn initialize(&mut self, _id: EntityId, components: &mut ComponentList) {
            let at = components
                .find::<Transform>()
                .map(|t| format!("{} {}", t.position.x, t.position.y))
                .unwrap_or_else(|| "none".into());
            self.seen.borrow_mut().push(at);
        }
    }

    #[test]
    fn spawn_at_places_before_initialization() {
        let seen = Trace::default();
        let mut store = PrototypeStore::new();
        store
            .load_json(r#"{"id": "surveyor", "class": "Surveyor"}"#, None)
            .unwrap();
        store.resolve_inheritance().unwrap();
        let mut classes = ClassRegistry::new();
        let shared = Rc::clone(&seen);
        classes.register("Surveyor", move || {
            Box::new(Surveyor {
                seen: Rc::clone(&shared),
            })
        });
        let mut m = EntityManager::new(
            store,
            EntityFactory::new(ComponentRegistry::with_builtins(), classes),
        );
        m.initialize();

        let id = m
            .spawn_at("surveyor", Position::new(4.0, 5.0), Direction::South)
            .unwrap();
        assert!(m.get(id).unwrap().is_initialized());
        assert_eq!(*seen.borrow(), vec!["4 5"]);
        assert_eq!(
            m.drain_events(),
            vec![
                EntityEvent::Spawned {
                    id,
                    prototype: "surveyor".into()
                },
                EntityEvent::Initialized { id },
            ]
        );
    }

    #[test]
    fn deliver_reaches_live_entities_only() {
        let trace = Trace::default();
        let mut m = manager(&trace);
        let id = m.spawn("probe", None).unwrap();
        assert!(m.deliver(&NetMessage::new(id, "Ping", serde_json::Value::Null)));
        assert!(!m.deliver(&NetMessage::new(EntityId(99), "Ping", serde_json::Value::Null)));
        assert_eq!(*trace.borrow(), vec!["msg 1 Ping"]);
    }

    #[test]
    fn shutdown_destroys_everything() {
        let trace = Trace::default();
        let mut m = manager(&trace);
        m.spawn("probe", None).unwrap();
        m.spawn("probe", None).unwrap();
        m.initialize();
        m.shutdown();
        assert!(m.is_empty());
        assert!(!m.is_initialized());
        assert_eq!(
            *trace.borrow(),
            vec!["init 1", "init 2", "destroy 1", "destroy 2"]
        );
    }

    #[test]
    fn lifecycle_log_records_changes() {
        let mut m = manager(&Trace::default());
        let id = m.spawn("marker", None).unwrap();
        m.initialize();
        m.delete(id).unwrap();
        assert_eq!(
            m.drain_events(),
            vec![
                EntityEvent::Spawned {
                    id,
                    prototype: "marker".into()
                },
                EntityEvent::Initialized { id },
                EntityEvent::Deleted { id },
            ]
        );
        assert!(m.events().is_empty());
    }
}
