use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::schema::{ComponentParams, Placement, SnapFlags, TemplateDef};
use crate::{ComponentCatalog, PrototypeError};

/// Arena index of a prototype inside its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrototypeHandle(pub usize);

/// Ordered mapping from component-type name to its parameter blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentSet {
    entries: Vec<(String, ComponentParams)>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str) -> Option<&ComponentParams> {
        self.entries
            .iter()
            .find(|(name, _)| name == type_name)
            .map(|(_, params)| params)
    }

    pub fn get_mut(&mut self, type_name: &str) -> Option<&mut ComponentParams> {
        self.entries
            .iter_mut()
            .find(|(name, _)| name == type_name)
            .map(|(_, params)| params)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.get(type_name).is_some()
    }

    /// Insert or replace the blob for `type_name`, keeping its original slot.
    pub fn insert(&mut self, type_name: impl Into<String>, params: ComponentParams) {
        let type_name = type_name.into();
        match self.get_mut(&type_name) {
            Some(existing) => *existing = params,
            None => self.entries.push((type_name, params)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentParams)> {
        self.entries.iter().map(|(name, params)| (name.as_str(), params))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pull in everything from `parent` that this set does not define.
    ///
    /// Component types missing here are deep-copied wholesale; for types both
    /// define, only the parameter keys missing here are copied.
    fn inherit_from(&mut self, parent: &ComponentSet) {
        for (type_name, parent_params) in parent.iter() {
            match self.get_mut(type_name) {
                Some(own) => {
                    for (key, value) in parent_params {
                        if !own.contains_key(key) {
                            own.insert(key.clone(), value.clone());
                        }
                    }
                }
                None => self.entries.push((type_name.to_string(), parent_params.clone())),
            }
        }
    }
}

/// A declarative entity template.
#[derive(Debug, Clone)]
pub struct Prototype {
    id: String,
    name: Option<String>,
    class: Option<String>,
    parent_id: Option<String>,
    components: ComponentSet,
    data: Option<Value>,
    placement: Option<Placement>,
    snap: Option<SnapFlags>,
    parent: Option<PrototypeHandle>,
    children: Vec<PrototypeHandle>,
}

impl Prototype {
    fn from_def(def: TemplateDef, catalog: Option<&dyn ComponentCatalog>) -> Self {
        let mut components = ComponentSet::new();
        for component in def.components {
            if let Some(catalog) = catalog {
                if !catalog.contains_component(&component.kind) {
                    tracing::warn!(
                        prototype = %def.id,
                        component = %component.kind,
                        "skipping unknown component type"
                    );
                    continue;
                }
            }
            // A repeated type in one template extends the earlier entry.
            match components.get_mut(&component.kind) {
                Some(existing) => existing.extend(component.params),
                None => components.insert(component.kind, component.params),
            }
        }
        let snap = def
            .snap
            .as_ref()
            .map(|names| SnapFlags::from_names(names.iter().map(String::as_str)));

        Self {
            id: def.id,
            name: def.name,
            class: def.class,
            parent_id: def.parent,
            components,
            data: def.data,
            placement: def.placement,
            snap,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name, falling back to the id when neither this prototype nor
    /// any ancestor declares one.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn placement(&self) -> Placement {
        self.placement.clone().unwrap_or_default()
    }

    pub fn snap(&self) -> SnapFlags {
        self.snap.unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    fn inherit_from(&mut self, parent: &Prototype) {
        self.components.inherit_from(&parent.components);
        if self.name.is_none() {
            self.name = parent.name.clone();
        }
        if self.class.is_none() {
            self.class = parent.class.clone();
        }
        if self.data.is_none() {
            self.data = parent.data.clone();
        } else if let (Some(Value::Object(own)), Some(Value::Object(inherited))) =
            (&mut self.data, &parent.data)
        {
            for (key, value) in inherited {
                if !own.contains_key(key) {
                    own.insert(key.clone(), value.clone());
                }
            }
        }
        if self.placement.is_none() {
            self.placement = parent.placement.clone();
        }
        if self.snap.is_none() {
            self.snap = parent.snap;
        }
    }
}

/// The two global resolution passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// Stage 0: register every prototype with its parent.
    Link,
    /// Stage 1: push merged state from each root down to its descendants.
    Propagate,
}

/// Per-prototype outcome of a sync stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Resolved,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub resolved: usize,
    pub pending: usize,
}

/// Holds every loaded prototype, keyed by id, in an arena.
#[derive(Debug, Default)]
pub struct PrototypeStore {
    prototypes: Vec<Prototype>,
    index: HashMap<String, PrototypeHandle>,
    roots: Vec<PrototypeHandle>,
    linked: bool,
}

impl PrototypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one template. The store must be re-resolved afterwards.
    pub fn insert(
        &mut self,
        def: TemplateDef,
        catalog: Option<&dyn ComponentCatalog>,
    ) -> Result<PrototypeHandle, PrototypeError> {
        if self.index.contains_key(&def.id) {
            return Err(PrototypeError::DuplicateId(def.id));
        }
        let handle = PrototypeHandle(self.prototypes.len());
        let prototype = Prototype::from_def(def, catalog);
        tracing::debug!(id = %prototype.id, "loaded prototype");
        self.index.insert(prototype.id.clone(), handle);
        self.prototypes.push(prototype);
        self.linked = false;
        Ok(handle)
    }

    /// Load a JSON document holding either one template or an array of them.
    pub fn load_json(
        &mut self,
        json: &str,
        catalog: Option<&dyn ComponentCatalog>,
    ) -> Result<Vec<PrototypeHandle>, PrototypeError> {
        let defs: Vec<TemplateDef> = match serde_json::from_str::<Value>(json)? {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?,
            single => vec![serde_json::from_value(single)?],
        };
        defs.into_iter().map(|def| self.insert(def, catalog)).collect()
    }

    pub fn load_file(
        &mut self,
        path: impl AsRef<Path>,
        catalog: Option<&dyn ComponentCatalog>,
    ) -> Result<Vec<PrototypeHandle>, PrototypeError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.load_json(&text, catalog)
    }

    /// Load every `*.json` file in `dir`, in file-name order.
    pub fn load_dir(
        &mut self,
        dir: impl AsRef<Path>,
        catalog: Option<&dyn ComponentCatalog>,
    ) -> Result<Vec<PrototypeHandle>, PrototypeError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut handles = Vec::new();
        for path in paths {
            tracing::debug!(path = %path.display(), "loading templates");
            handles.extend(self.load_file(&path, catalog)?);
        }
        Ok(handles)
    }

    /// Run one global sync stage over every loaded prototype.
    pub fn sync(&mut self, stage: SyncStage) -> Result<SyncReport, PrototypeError> {
        let _span = tracing::info_span!("prototype_sync", ?stage).entered();
        let mut report = SyncReport::default();
        match stage {
            SyncStage::Link => {
                self.roots.clear();
                for i in 0..self.prototypes.len() {
                    let handle = PrototypeHandle(i);
                    match self.link(handle)? {
                        SyncStatus::Resolved => {
                            self.roots.push(handle);
                            report.resolved += 1;
                        }
                        SyncStatus::Pending => report.pending += 1,
                    }
                }
                self.linked = true;
            }
            SyncStage::Propagate => {
                if !self.linked {
                    return Err(PrototypeError::NotLinked);
                }
                for root in self.roots.clone() {
                    report.resolved += 1 + self.propagate(root);
                }
            }
        }
        tracing::debug!(resolved = report.resolved, pending = report.pending, "sync stage done");
        Ok(report)
    }

    /// Drive both stages in order.
    pub fn resolve_inheritance(&mut self) -> Result<SyncReport, PrototypeError> {
        self.sync(SyncStage::Link)?;
        self.sync(SyncStage::Propagate)
    }

    /// Stage 0 for a single prototype.
    fn link(&mut self, handle: PrototypeHandle) -> Result<SyncStatus, PrototypeError> {
        let Some(parent_id) = self.prototypes[handle.0].parent_id.clone() else {
            return Ok(SyncStatus::Resolved);
        };
        let id = &self.prototypes[handle.0].id;
        let parent = *self
            .index
            .get(&parent_id)
            .ok_or_else(|| PrototypeError::MissingParent {
                id: id.clone(),
                parent: parent_id.clone(),
            })?;
        self.check_acyclic(handle)?;

        self.prototypes[handle.0].parent = Some(parent);
        let siblings = &mut self.prototypes[parent.0].children;
        if !siblings.contains(&handle) {
            siblings.push(handle);
        }
        Ok(SyncStatus::Pending)
    }

    fn check_acyclic(&self, start: PrototypeHandle) -> Result<(), PrototypeError> {
        let mut visited = HashSet::from([start]);
        let mut current = start;
        while let Some(parent_id) = self.prototypes[current.0].parent_id.as_deref() {
            let Some(&parent) = self.index.get(parent_id) else {
                // Reported as MissingParent when that prototype is linked.
                return Ok(());
            };
            if !visited.insert(parent) {
                return Err(PrototypeError::InheritanceCycle(
                    self.prototypes[start.0].id.clone(),
                ));
            }
            current = parent;
        }
        Ok(())
    }

    /// Stage 1 below `handle`. Returns how many descendants were merged.
    fn propagate(&mut self, handle: PrototypeHandle) -> usize {
        let mut merged = 0;
        for child in self.prototypes[handle.0].children.clone() {
            let (parent, target) = self.pair_mut(handle, child);
            target.inherit_from(parent);
            merged += 1 + self.propagate(child);
        }
        merged
    }

    fn pair_mut(&mut self, source: PrototypeHandle, target: PrototypeHandle) -> (&Prototype, &mut Prototype) {
        debug_assert_ne!(source, target);
        if source.0 < target.0 {
            let (head, tail) = self.prototypes.split_at_mut(target.0);
            (&head[source.0], &mut tail[0])
        } else {
            let (head, tail) = self.prototypes.split_at_mut(source.0);
            (&tail[0], &mut head[target.0])
        }
    }

    pub fn get(&self, id: &str) -> Option<&Prototype> {
        self.handle(id).map(|h| &self.prototypes[h.0])
    }

    pub fn handle(&self, id: &str) -> Option<PrototypeHandle> {
        self.index.get(id).copied()
    }

    pub fn by_handle(&self, handle: PrototypeHandle) -> Option<&Prototype> {
        self.prototypes.get(handle.0)
    }

    pub fn parent(&self, handle: PrototypeHandle) -> Option<PrototypeHandle> {
        self.prototypes.get(handle.0).and_then(|p| p.parent)
    }

    pub fn children(&self, handle: PrototypeHandle) -> &[PrototypeHandle] {
        self.prototypes
            .get(handle.0)
            .map(|p| p.children.as_slice())
            .unwrap_or(&[])
    }

    /// Roots recorded by the most recent link stage.
    pub fn roots(&self) -> &[PrototypeHandle] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.iter()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_from(value: Value) -> PrototypeStore {
        let mut store = PrototypeStore::new();
        store.load_json(&value.to_string(), None).unwrap();
        store
    }

    #[test]
    fn child_inherits_missing_keys_and_keeps_own() {
        let mut store = store_from(json!([
            {"id": "base", "components": [{"type": "Icon", "icon": "a.png"}]},
            {"id": "child", "parent": "base", "components": [{"type": "Icon", "color": "red"}]}
        ]));
        store.resolve_inheritance().unwrap();

        let icon = store.get("child").unwrap().components().get("Icon").unwrap();
        assert_eq!(icon["icon"], "a.png");
        assert_eq!(icon["color"], "red");
        // The parent is untouched.
        let base_icon = store.get("base").unwrap().components().get("Icon").unwrap();
        assert!(!base_icon.contains_key("color"));
    }

    #[test]
    fn link_stage_reports_roots_resolved() {
        let mut store = store_from(json!([
            {"id": "a"},
            {"id": "b", "parent": "a"},
            {"id": "c", "parent": "b"}
        ]));
        let report = store.sync(SyncStage::Link).unwrap();
        assert_eq!(report, SyncReport { resolved: 1, pending: 2 });
        assert_eq!(store.roots(), &[PrototypeHandle(0)]);
        assert_eq!(store.children(PrototypeHandle(0)), &[PrototypeHandle(1)]);
        assert_eq!(store.parent(PrototypeHandle(2)), Some(PrototypeHandle(1)));
    }

    #[test]
    fn propagate_before_link_is_rejected() {
        let mut store = store_from(json!({"id": "a"}));
        assert!(matches!(
            store.sync(SyncStage::Propagate),
            Err(PrototypeError::NotLinked)
        ));
    }

    #[test]
    fn name_and_class_inherit_when_unset() {
        let mut store = store_from(json!([
            {"id": "a", "name": "Crate", "class": "Prop"},
            {"id": "b", "parent": "a"},
            {"id": "c", "parent": "a", "name": "Barrel"}
        ]));
        store.resolve_inheritance().unwrap();
        let b = store.get("b").unwrap();
        assert_eq!(b.name(), Some("Crate"));
        assert_eq!(b.class(), Some("Prop"));
        let c = store.get("c").unwrap();
        assert_eq!(c.name(), Some("Barrel"));
        assert_eq!(c.class(), Some("Prop"));
    }

    #[test]
    fn data_placement_and_snap_inherit() {
        let mut store = store_from(json!([
            {"id": "a", "data": {"hp": 10, "armor": 2}, "placement": {"range": 50}, "snap": ["Grid"]},
            {"id": "b", "parent": "a", "data": {"hp": 20}}
        ]));
        store.resolve_inheritance().unwrap();
        let b = store.get("b").unwrap();
        assert_eq!(b.data().unwrap(), &json!({"hp": 20, "armor": 2}));
        assert_eq!(b.placement().range, 50);
        assert!(b.snap().contains(SnapFlags::GRID));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut store = PrototypeStore::new();
        store.load_json(r#"{"id": "a"}"#, None).unwrap();
        let err = store.load_json(r#"{"id": "a"}"#, None).unwrap_err();
        assert!(matches!(err, PrototypeError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn missing_parent_is_reported() {
        let mut store = store_from(json!({"id": "orphan", "parent": "nobody"}));
        let err = store.resolve_inheritance().unwrap_err();
        assert!(matches!(err, PrototypeError::MissingParent { .. }));
    }

    #[test]
    fn cycle_is_detected_during_link() {
        let mut store = store_from(json!([
            {"id": "a", "parent": "c"},
            {"id": "b", "parent": "a"},
            {"id": "c", "parent": "b"}
        ]));
        let err = store.sync(SyncStage::Link).unwrap_err();
        assert!(matches!(err, PrototypeError::InheritanceCycle(_)));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let mut store = store_from(json!({"id": "a", "parent": "a"}));
        assert!(matches!(
            store.sync(SyncStage::Link),
            Err(PrototypeError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn relinking_does_not_duplicate_children() {
        let mut store = store_from(json!([{"id": "a"}, {"id": "b", "parent": "a"}]));
        store.resolve_inheritance().unwrap();
        store.resolve_inheritance().unwrap();
        assert_eq!(store.children(PrototypeHandle(0)).len(), 1);
    }

    #[test]
    fn unknown_components_are_skipped_with_catalog() {
        struct OnlyIcon;
        impl ComponentCatalog for OnlyIcon {
            fn contains_component(&self, type_name: &str) -> bool {
                type_name == "Icon"
            }
        }
        let mut store = PrototypeStore::new();
        store
            .load_json(
                r#"{"id": "a", "components": [{"type": "Icon"}, {"type": "Icno"}]}"#,
                Some(&OnlyIcon),
            )
            .unwrap();
        let components = store.get("a").unwrap().components();
        assert_eq!(components.type_names().collect::<Vec<_>>(), vec!["Icon"]);
    }

    #[test]
    fn repeated_component_type_extends_entry() {
        let store = store_from(json!({"id": "a", "components": [
            {"type": "Icon", "icon": "a.png"},
            {"type": "Icon", "color": "blue"}
        ]}));
        let components = store.get("a").unwrap().components();
        assert_eq!(components.len(), 1);
        assert_eq!(components.get("Icon").unwrap().len(), 2);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let store = store_from(json!({"id": "rock"}));
        assert_eq!(store.get("rock").unwrap().display_name(), "rock");
    }
}
