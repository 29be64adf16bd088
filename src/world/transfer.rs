//! JSON export and import of a whole world.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::world::arena::{World, WorldOptions};
use crate::world::errors::WorldError;
use crate::world::storage::ThingBackend;
use crate::world::types::{EngineLimits, Thing, WorldInfo, THING_SCHEMA_VERSION};

pub const DUMP_FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDump {
    pub format_version: u8,
    pub exported_at: DateTime<Utc>,
    pub info: WorldInfo,
    /// Sorted by id.
    pub things: Vec<Thing>,
}

impl World {
    pub fn export_dump(&self) -> WorldDump {
        let mut things: Vec<Thing> = self.things.values().cloned().collect();
        things.sort_by_key(|t| t.id);
        WorldDump {
            format_version: DUMP_FORMAT_VERSION,
            exported_at: Utc::now(),
            info: self.info.clone(),
            things,
        }
    }

    pub fn export_json(&self) -> Result<String, WorldError> {
        let dump = self.export_dump();
        info!(target: "audit", "exported '{}' ({} things)", dump.info.name, dump.things.len());
        Ok(serde_json::to_string_pretty(&dump)?)
    }

    /// Load a dump into an empty `backend` and open the result. The id
    /// counter never moves below the highest imported id.
    pub fn import_json(
        mut backend: Box<dyn ThingBackend>,
        json: &str,
        limits: EngineLimits,
    ) -> Result<World, WorldError> {
        let mut dump: WorldDump = serde_json::from_str(json)?;
        if dump.format_version != DUMP_FORMAT_VERSION {
            return Err(WorldError::SchemaMismatch {
                entity: "dump",
                expected: DUMP_FORMAT_VERSION,
                found: dump.format_version,
            });
        }
        if backend.get_info()?.is_some() || !backend.ids()?.is_empty() {
            return Err(WorldError::InvalidCommand("import target is not empty".into()));
        }
        let ids: std::collections::HashSet<_> = dump.things.iter().map(|t| t.id).collect();
        for well_known in [dump.info.limbo, dump.info.lobby, dump.info.hall_of_prototypes] {
            if !ids.contains(&well_known) {
                return Err(WorldError::NotFound(format!("%{} in dump", well_known)));
            }
        }
        if let Some(max) = ids.iter().max() {
            dump.info.next_id = dump.info.next_id.max(max + 1);
        }

        for thing in &mut dump.things {
            if thing.schema_version != THING_SCHEMA_VERSION {
                return Err(WorldError::SchemaMismatch {
                    entity: "thing",
                    expected: THING_SCHEMA_VERSION,
                    found: thing.schema_version,
                });
            }
            backend.put(thing.id, &thing.to_bytes()?)?;
        }
        backend.put_info(&dump.info.to_bytes()?)?;
        backend.flush()?;
        info!(
            target: "audit",
            "imported '{}' ({} things, exported {})",
            dump.info.name,
            dump.things.len(),
            dump.exported_at
        );

        let options = WorldOptions {
            name: dump.info.name.clone(),
            limits,
            clock_interval_ms: dump.info.clock_interval_ms,
        };
        World::open(backend, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::storage::MemoryStore;

    #[test]
    fn export_then_import_keeps_things_and_edges() {
        let mut world = World::in_memory("dump").unwrap();
        let rock = world.create("rock", "A grey rock.").unwrap();
        world.set_location(rock, world.lobby()).unwrap();
        let json = world.export_json().unwrap();

        let copy = World::import_json(Box::new(MemoryStore::new()), &json, EngineLimits::default()).unwrap();
        assert_eq!(copy.thing_count(), world.thing_count());
        assert_eq!(copy.location(rock), Some(copy.lobby()));
        assert_eq!(copy.choose_text(rock, &["description"]).as_deref(), Some("A grey rock."));
        assert!(copy.check_indices());
    }

    #[test]
    fn import_refuses_a_populated_backend() {
        let world = World::in_memory("dump").unwrap();
        let json = world.export_json().unwrap();
        let store = MemoryStore::new();
        let _existing = World::open(Box::new(store.clone()), WorldOptions::default()).unwrap();
        let err = World::import_json(Box::new(store), &json, EngineLimits::default())
            .err()
            .expect("populated store refused");
        assert!(matches!(err, WorldError::InvalidCommand(_)));
    }

    #[test]
    fn next_id_is_raised_past_imported_ids() {
        let mut world = World::in_memory("dump").unwrap();
        let rock = world.create("rock", "").unwrap();
        let mut dump = world.export_dump();
        dump.info.next_id = 1;
        let json = serde_json::to_string(&dump).unwrap();
        let mut copy = World::import_json(Box::new(MemoryStore::new()), &json, EngineLimits::default()).unwrap();
        let fresh = copy.create("pebble", "").unwrap();
        assert!(fresh > rock);
    }
}
