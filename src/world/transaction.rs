//! Transaction scope and commit.
//!
//! There is one flat dirty set per world. Nested `with_transaction` calls run
//! inside the outer scope and only the outermost call commits. A commit
//! serializes every touched thing, compares the bytes with what was last
//! written, and only writes real changes.

use log::{debug, warn};

use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::types::ThingId;

/// Outcome of one commit, mostly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub written: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Dirty things whose write was skipped because the scope failed.
    pub skipped: usize,
}

enum Persisted {
    Written,
    Deleted,
    Unchanged,
}

impl World {
    /// Run `f` inside a transaction. When one is already open, `f` simply
    /// joins it. An error from `f` keeps every in-memory change made so far
    /// (indices included) but skips the backend writes for this scope.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut World) -> Result<T, WorldError>,
    ) -> Result<T, WorldError> {
        if self.in_transaction {
            return f(self);
        }
        self.in_transaction = true;
        let result = f(self);
        self.in_transaction = false;
        let committed = self.commit(result.is_ok());
        let value = result?;
        committed?;
        Ok(value)
    }

    /// Like `with_transaction`, and bumps the world version exactly once.
    pub fn update<T>(
        &mut self,
        f: impl FnOnce(&mut World) -> Result<T, WorldError>,
    ) -> Result<T, WorldError> {
        self.version += 1;
        self.with_transaction(f)
    }

    /// Monotonic counter bumped by `update`; lets embedders drop caches keyed
    /// on a viewer's view of the world.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mark `id` as a commit candidate.
    pub fn touch(&mut self, id: ThingId) {
        self.dirty.insert(id);
    }

    /// Commit anything touched outside a transaction.
    pub fn flush(&mut self) -> Result<CommitStats, WorldError> {
        if self.in_transaction {
            return Ok(CommitStats::default());
        }
        self.commit(true)
    }

    fn commit(&mut self, persist: bool) -> Result<CommitStats, WorldError> {
        let dirty: Vec<ThingId> = std::mem::take(&mut self.dirty).into_iter().collect();
        let mut stats = CommitStats::default();
        for id in &dirty {
            self.reindex_now(*id);
        }
        if !persist {
            stats.skipped = dirty.len();
            if !dirty.is_empty() {
                debug!("transaction failed; skipped writing {} thing(s)", dirty.len());
            }
            return Ok(stats);
        }

        for (pos, id) in dirty.iter().enumerate() {
            match self.persist_one(*id) {
                Ok(Persisted::Written) => stats.written += 1,
                Ok(Persisted::Deleted) => stats.deleted += 1,
                Ok(Persisted::Unchanged) => stats.unchanged += 1,
                Err(e) => {
                    warn!("commit failed at %{}: {}", id, e);
                    self.dirty.extend(dirty[pos..].iter().copied());
                    return Err(e);
                }
            }
        }
        if self.info_dirty {
            let bytes = self.info.to_bytes()?;
            self.backend.put_info(&bytes)?;
            self.info_dirty = false;
        }
        if stats.written + stats.deleted > 0 {
            self.backend.flush()?;
            debug!(
                "committed {} write(s), {} delete(s), {} unchanged",
                stats.written, stats.deleted, stats.unchanged
            );
        }
        Ok(stats)
    }

    fn persist_one(&mut self, id: ThingId) -> Result<Persisted, WorldError> {
        let Some(thing) = self.things.get(&id) else {
            if self.persisted.remove(&id).is_some() {
                self.backend.delete(id)?;
                return Ok(Persisted::Deleted);
            }
            return Ok(Persisted::Unchanged);
        };
        let bytes = thing.to_bytes()?;
        if self.persisted.get(&id) == Some(&bytes) {
            return Ok(Persisted::Unchanged);
        }
        self.backend.put(id, &bytes)?;
        self.persisted.insert(id, bytes);
        Ok(Persisted::Written)
    }
}

#[cfg(test)]
mod tests {
    use crate::world::arena::{World, WorldOptions};
    use crate::world::errors::WorldError;
    use crate::world::storage::MemoryStore;

    fn world_with_store() -> (World, MemoryStore) {
        let store = MemoryStore::new();
        let world = World::open(Box::new(store.clone()), WorldOptions::default()).expect("world");
        (world, store)
    }

    #[test]
    fn nested_transactions_share_one_commit() {
        let (mut world, store) = world_with_store();
        let before = store.put_count();
        world
            .with_transaction(|w| {
                let rock = w.create("rock", "")?;
                w.with_transaction(|w| w.set_prop(rock, "weight", 3i64))?;
                assert!(!store.contains(rock), "nothing written before the outer commit");
                Ok(())
            })
            .expect("transaction");
        assert_eq!(store.put_count(), before + 1);
    }

    #[test]
    fn unchanged_things_are_not_rewritten() {
        let (mut world, store) = world_with_store();
        let rock = world.create("rock", "").expect("rock");
        let before = store.put_count();
        world.set_prop(rock, "name", "rock").expect("same value");
        assert_eq!(store.put_count(), before);
        world.set_prop(rock, "name", "stone").expect("new value");
        assert_eq!(store.put_count(), before + 1);
    }

    #[test]
    fn failed_scope_keeps_memory_and_skips_writes() {
        let (mut world, store) = world_with_store();
        let rock = world.create("rock", "").expect("rock");
        let before = store.put_count();
        let result: Result<(), WorldError> = world.with_transaction(|w| {
            w.set_prop(rock, "name", "pebble")?;
            w.set_location(rock, w.lobby())?;
            Err(WorldError::InvalidCommand("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.put_count(), before);
        assert_eq!(world.name_of(rock), "pebble");
        assert_eq!(world.contents(world.lobby()), vec![rock]);
        assert!(world.check_indices());
    }

    #[test]
    fn update_bumps_version_once() {
        let (mut world, _store) = world_with_store();
        let v = world.version();
        world
            .update(|w| {
                w.create("a", "")?;
                w.update(|w| w.create("b", ""))?;
                Ok(())
            })
            .expect("update");
        assert_eq!(world.version(), v + 2);
        world.with_transaction(|w| w.create("c", "")).expect("tx");
        assert_eq!(world.version(), v + 2);
    }
}
