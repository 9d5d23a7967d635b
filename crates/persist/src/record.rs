use serde::{Deserialize, Serialize};
use std::path::Path;

use protoworld_common::{Direction, EntityId, Position};
use protoworld_kernel::{EntityError, EntityManager, Transform};

use crate::PersistError;

/// Persisted form of one placed entity. Field names are the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    #[serde(rename = "X", with = "invariant_decimal")]
    pub x: f32,
    #[serde(rename = "Y", with = "invariant_decimal")]
    pub y: f32,
    pub template: String,
    pub name: String,
    pub direction: Direction,
}

/// A whole save: every placed entity in id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    pub entities: Vec<SaveRecord>,
}

impl SaveFile {
    /// Record every entity that has a `Transform`.
    pub fn capture(manager: &EntityManager) -> Self {
        let entities = manager
            .iter()
            .filter_map(|entity| {
                let transform = entity.components().find::<Transform>()?;
                Some(SaveRecord {
                    x: transform.position.x,
                    y: transform.position.y,
                    template: entity.prototype().to_string(),
                    name: entity.name().to_string(),
                    direction: transform.direction,
                })
            })
            .collect();
        Self { entities }
    }

    /// Re-spawn every record into `manager` with freshly generated ids.
    ///
    /// Records naming a template the manager does not know are skipped.
    pub fn restore(&self, manager: &mut EntityManager) -> Result<Vec<EntityId>, PersistError> {
        let mut ids = Vec::with_capacity(self.entities.len());
        for record in &self.entities {
            let position = Position::new(record.x, record.y);
            let id = match manager.spawn_at(&record.template, position, record.direction) {
                Ok(id) => id,
                Err(EntityError::UnknownPrototype(template)) => {
                    tracing::warn!(%template, "save record names unknown template, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(entity) = manager.get_mut(id) {
                entity.set_name(record.name.clone());
            }
            ids.push(id);
        }
        tracing::info!(restored = ids.len(), total = self.entities.len(), "save restored");
        Ok(ids)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// Floats as culture-invariant decimal text. Plain JSON numbers are also
/// accepted on read.
mod invariant_decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(f32),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid decimal: {text:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use protoworld_kernel::EntityFactory;
    use protoworld_prototype::PrototypeStore;

    fn manager() -> EntityManager {
        let mut store = PrototypeStore::new();
        store
            .load_json(
                r#"[
                    {"id": "tree", "name": "Oak", "components": [{"type": "Transform"}]},
                    {"id": "ghost"}
                ]"#,
                None,
            )
            .unwrap();
        store.resolve_inheritance().unwrap();
        EntityManager::new(store, EntityFactory::with_builtins())
    }

    #[test]
    fn record_uses_wire_field_names() {
        let record = SaveRecord {
            x: 1.5,
            y: -20.25,
            template: "tree".into(),
            name: "Oak".into(),
            direction: Direction::SouthWest,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "X": "1.5",
                "Y": "-20.25",
                "template": "tree",
                "name": "Oak",
                "direction": "SouthWest"
            })
        );
    }

    #[test]
    fn record_reads_text_numbers_and_any_case_direction() {
        let record: SaveRecord = serde_json::from_str(
            r#"{"X": " 3.75", "Y": 4, "template": "tree", "name": "", "direction": "EAST"}"#,
        )
        .unwrap();
        assert_eq!(record.x, 3.75);
        assert_eq!(record.y, 4.0);
        assert_eq!(record.direction, Direction::East);
    }

    #[test]
    fn bad_decimal_is_rejected() {
        let result: Result<SaveRecord, _> = serde_json::from_str(
            r#"{"X": "1,5", "Y": "0", "template": "t", "name": "", "direction": "North"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn capture_and_restore_through_file() {
        let mut source = manager();
        let id = source
            .spawn_at("tree", Position::new(10.0, 12.5), Direction::North)
            .unwrap();
        source.get_mut(id).unwrap().set_name("Old oak");
        source.spawn("ghost", None).unwrap();

        let save = SaveFile::capture(&source);
        assert_eq!(save.entities.len(), 1);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        save.save(tmp.path()).unwrap();
        let loaded = SaveFile::load(tmp.path()).unwrap();
        assert_eq!(loaded, save);

        let mut target = manager();
        let ids = loaded.restore(&mut target).unwrap();
        assert_eq!(ids.len(), 1);
        let restored = target.get(ids[0]).unwrap();
        assert_eq!(restored.name(), "Old oak");
        assert_eq!(restored.position(), Some(Position::new(10.0, 12.5)));
    }

    #[test]
    fn restore_skips_unknown_templates() {
        let save = SaveFile {
            entities: vec![SaveRecord {
                x: 0.0,
                y: 0.0,
                template: "removed".into(),
                name: "Gone".into(),
                direction: Direction::North,
            }],
        };
        let mut target = manager();
        assert!(save.restore(&mut target).unwrap().is_empty());
        assert!(target.is_empty());
    }
}
