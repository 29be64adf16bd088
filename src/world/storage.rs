use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::world::errors::WorldError;
use crate::world::types::ThingId;

const TREE_THINGS: &str = "things";
const TREE_WORLD: &str = "world";
const INFO_KEY: &[u8] = b"info";

/// Flat keyed blob store holding one snapshot per thing plus the world record.
///
/// Index maintenance is never the backend's job; it only stores bytes.
pub trait ThingBackend: Send {
    fn get(&self, id: ThingId) -> Result<Option<Vec<u8>>, WorldError>;
    fn put(&mut self, id: ThingId, blob: &[u8]) -> Result<(), WorldError>;
    fn delete(&mut self, id: ThingId) -> Result<(), WorldError>;
    fn delete_all(&mut self) -> Result<(), WorldError>;
    fn ids(&self) -> Result<Vec<ThingId>, WorldError>;
    fn get_info(&self) -> Result<Option<Vec<u8>>, WorldError>;
    fn put_info(&mut self, blob: &[u8]) -> Result<(), WorldError>;

    /// Wait until writes are durable. Called once per commit.
    fn flush(&mut self) -> Result<(), WorldError> {
        Ok(())
    }
}

fn thing_key(id: ThingId) -> [u8; 8] {
    id.to_be_bytes()
}

fn key_id(key: &[u8]) -> Option<ThingId> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(ThingId::from_be_bytes(bytes))
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct ThingStoreBuilder {
    path: PathBuf,
    flush_every_commit: bool,
}

impl ThingStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_every_commit: true,
        }
    }

    /// Leave durability to sled's background flusher (bulk imports, tests).
    pub fn without_flush(mut self) -> Self {
        self.flush_every_commit = false;
        self
    }

    pub fn open(self) -> Result<ThingStore, WorldError> {
        ThingStore::open_with_options(self.path, self.flush_every_commit)
    }
}

/// Sled-backed persistence for world things.
pub struct ThingStore {
    db: sled::Db,
    things: sled::Tree,
    world: sled::Tree,
    flush_every_commit: bool,
}

impl ThingStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        Self::open_with_options(path, true)
    }

    fn open_with_options<P: AsRef<Path>>(
        path: P,
        flush_every_commit: bool,
    ) -> Result<Self, WorldError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let things = db.open_tree(TREE_THINGS)?;
        let world = db.open_tree(TREE_WORLD)?;
        debug!("opened thing store at {}", path_ref.display());
        Ok(Self {
            db,
            things,
            world,
            flush_every_commit,
        })
    }

    /// Approximate on-disk size, for status output.
    pub fn size_on_disk(&self) -> Result<u64, WorldError> {
        Ok(self.db.size_on_disk()?)
    }
}

impl ThingBackend for ThingStore {
    fn get(&self, id: ThingId) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self.things.get(thing_key(id))?.map(|v| v.to_vec()))
    }

    fn put(&mut self, id: ThingId, blob: &[u8]) -> Result<(), WorldError> {
        self.things.insert(thing_key(id), blob)?;
        Ok(())
    }

    fn delete(&mut self, id: ThingId) -> Result<(), WorldError> {
        self.things.remove(thing_key(id))?;
        Ok(())
    }

    fn delete_all(&mut self) -> Result<(), WorldError> {
        self.things.clear()?;
        self.world.clear()?;
        self.db.flush()?;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<ThingId>, WorldError> {
        let mut ids = Vec::new();
        for key in self.things.iter().keys() {
            let key = key?;
            if let Some(id) = key_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn get_info(&self) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self.world.get(INFO_KEY)?.map(|v| v.to_vec()))
    }

    fn put_info(&mut self, blob: &[u8]) -> Result<(), WorldError> {
        self.world.insert(INFO_KEY, blob)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WorldError> {
        if self.flush_every_commit {
            self.things.flush()?;
            self.world.flush()?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    things: BTreeMap<ThingId, Vec<u8>>,
    info: Option<Vec<u8>>,
}

/// In-memory backend for ephemeral worlds and tests.
///
/// Clones share the same storage, so a test can keep a handle after moving
/// one into a `World` and inspect what was written.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    puts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of thing writes performed so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: ThingId) -> bool {
        self.state().things.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state().things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().things.is_empty()
    }
}

impl ThingBackend for MemoryStore {
    fn get(&self, id: ThingId) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self.state().things.get(&id).cloned())
    }

    fn put(&mut self, id: ThingId, blob: &[u8]) -> Result<(), WorldError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.state().things.insert(id, blob.to_vec());
        Ok(())
    }

    fn delete(&mut self, id: ThingId) -> Result<(), WorldError> {
        self.state().things.remove(&id);
        Ok(())
    }

    fn delete_all(&mut self) -> Result<(), WorldError> {
        let mut state = self.state();
        state.things.clear();
        state.info = None;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<ThingId>, WorldError> {
        Ok(self.state().things.keys().copied().collect())
    }

    fn get_info(&self) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(self.state().info.clone())
    }

    fn put_info(&mut self, blob: &[u8]) -> Result<(), WorldError> {
        self.state().info = Some(blob.to_vec());
        Ok(())
    }
}
