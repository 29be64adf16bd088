//! The thing arena: every room, exit, person and item is a `Thing` owned here
//! by integer id. Property lookup walks the prototype chain live, so changing
//! a prototype is instantly visible in all of its instances.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::world::command::CommandRegistry;
use crate::world::errors::WorldError;
use crate::world::index::AssociationIndex;
use crate::world::listener::Listener;
use crate::world::reaction::ReactionScheduler;
use crate::world::storage::{MemoryStore, ThingBackend};
use crate::world::types::{
    Association, EngineLimits, PropValue, Thing, ThingId, WorldInfo, ASSOC_LINK_OWNER,
    ASSOC_LOCATION, ASSOC_OTHER_LINK, PROP_ALIASES, PROP_ARTICLE, PROP_CLOSED, PROP_COMMAND,
    PROP_CONTENTS_FORMAT, PROP_DESCRIPTION, PROP_EXAMINE_FORMAT, PROP_FULL_NAME,
    PROP_LINK_FORMAT, PROP_LOOK_FORMAT, PROP_NAME, PROP_TICKING,
};

/// Longest prototype chain `choose` will follow.
const MAX_PROTOTYPE_DEPTH: usize = 64;

pub const PROTO_THING: &str = "thing";
pub const PROTO_ROOM: &str = "room";
pub const PROTO_LINK: &str = "link";
pub const PROTO_PERSON: &str = "person";

/// Options used when opening or seeding a world.
#[derive(Debug, Clone)]
pub struct WorldOptions {
    pub name: String,
    pub limits: EngineLimits,
    pub clock_interval_ms: u64,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            name: "textcraft".to_string(),
            limits: EngineLimits::default(),
            clock_interval_ms: 1000,
        }
    }
}

/// One world instance: the arena, its indices, transaction state, listeners
/// and the reaction scheduler. Single-writer; callers serialize access.
pub struct World {
    pub(crate) info: WorldInfo,
    pub(crate) things: HashMap<ThingId, Thing>,
    pub(crate) index: AssociationIndex,
    /// Last snapshot written to the backend per thing.
    pub(crate) persisted: HashMap<ThingId, Vec<u8>>,
    pub(crate) dirty: BTreeSet<ThingId>,
    pub(crate) info_dirty: bool,
    pub(crate) in_transaction: bool,
    pub(crate) version: u64,
    pub(crate) backend: Box<dyn ThingBackend>,
    pub(crate) listeners: HashMap<ThingId, Box<dyn Listener>>,
    pub(crate) scheduler: ReactionScheduler,
    pub(crate) registry: Arc<CommandRegistry>,
    pub(crate) limits: EngineLimits,
    pub(crate) clock_running: bool,
}

impl World {
    /// Load the world held by `backend`, or seed a fresh one when it is empty.
    pub fn open(backend: Box<dyn ThingBackend>, options: WorldOptions) -> Result<Self, WorldError> {
        let stored_info = backend.get_info()?;
        let mut world = World {
            info: WorldInfo::new(&options.name, options.clock_interval_ms),
            things: HashMap::new(),
            index: AssociationIndex::new(),
            persisted: HashMap::new(),
            dirty: BTreeSet::new(),
            info_dirty: false,
            in_transaction: false,
            version: 0,
            backend,
            listeners: HashMap::new(),
            scheduler: ReactionScheduler::new(),
            registry: Arc::new(CommandRegistry::standard()),
            limits: options.limits,
            clock_running: true,
        };
        match stored_info {
            Some(bytes) => world.load(WorldInfo::from_bytes(&bytes)?)?,
            None => world.seed()?,
        }
        Ok(world)
    }

    /// Fresh world on a `MemoryStore`.
    pub fn in_memory(name: &str) -> Result<Self, WorldError> {
        Self::open(
            Box::new(MemoryStore::new()),
            WorldOptions {
                name: name.to_string(),
                ..WorldOptions::default()
            },
        )
    }

    fn load(&mut self, info: WorldInfo) -> Result<(), WorldError> {
        for id in self.backend.ids()? {
            let Some(bytes) = self.backend.get(id)? else {
                continue;
            };
            let thing = Thing::from_bytes(&bytes)?;
            self.persisted.insert(id, bytes);
            self.things.insert(id, thing);
        }
        self.index = AssociationIndex::rebuild(self.things.values());
        let ticking: Vec<ThingId> = self
            .things
            .values()
            .filter(|t| t.prop(PROP_TICKING).map(|v| v.is_true()).unwrap_or(false))
            .map(|t| t.id)
            .collect();
        for id in ticking {
            self.scheduler.subscribe(id);
        }
        info!(
            "loaded world '{}' with {} things (next id {})",
            info.name,
            self.things.len(),
            info.next_id
        );
        self.info = info;
        Ok(())
    }

    fn seed(&mut self) -> Result<(), WorldError> {
        self.with_transaction(|w| {
            let limbo = w.create_raw(None, None)?;
            w.info.limbo = limbo;
            w.put_props(
                limbo,
                &[
                    (PROP_NAME, "limbo".into()),
                    (PROP_DESCRIPTION, "You are floating in $this.".into()),
                    (PROP_CLOSED, true.into()),
                ],
            )?;

            let thing = w.create_raw(None, Some(limbo))?;
            w.put_props(
                thing,
                &[
                    (PROP_NAME, PROTO_THING.into()),
                    (PROP_ARTICLE, "a".into()),
                    (PROP_DESCRIPTION, "This is $this.".into()),
                    (PROP_CONTENTS_FORMAT, "$This $is here.".into()),
                    (PROP_LINK_FORMAT, "$This leads to $link.".into()),
                    (PROP_EXAMINE_FORMAT, "$This: $description\n$contents".into()),
                    (PROP_LOOK_FORMAT, "$description\n$contents\n$links".into()),
                ],
            )?;
            let room = w.create_raw(Some(thing), Some(limbo))?;
            w.put_props(
                room,
                &[
                    (PROP_NAME, PROTO_ROOM.into()),
                    (PROP_ARTICLE, "the".into()),
                    (PROP_DESCRIPTION, "You are in $this.".into()),
                    (PROP_CLOSED, true.into()),
                ],
            )?;
            let link = w.create_raw(Some(thing), Some(limbo))?;
            w.put_props(
                link,
                &[
                    (PROP_NAME, PROTO_LINK.into()),
                    (PROP_ARTICLE, "".into()),
                    (PROP_DESCRIPTION, "$This leads to $link.".into()),
                    (PROP_COMMAND, "go $0".into()),
                ],
            )?;
            let person = w.create_raw(Some(thing), Some(limbo))?;
            w.put_props(
                person,
                &[
                    (PROP_NAME, PROTO_PERSON.into()),
                    (PROP_ARTICLE, "".into()),
                    (PROP_DESCRIPTION, "$This $is a person.".into()),
                ],
            )?;

            let hall = w.create_raw(Some(room), Some(limbo))?;
            w.put_props(
                hall,
                &[
                    (PROP_NAME, "hall of prototypes".into()),
                    (PROP_DESCRIPTION, "You are in $this. Every standard prototype lives here.".into()),
                ],
            )?;
            let lobby = w.create_raw(Some(room), Some(limbo))?;
            w.put_props(
                lobby,
                &[
                    (PROP_NAME, "lobby".into()),
                    (PROP_DESCRIPTION, "You are in $this. Make yourself at home.".into()),
                ],
            )?;
            for proto in [thing, room, link, person] {
                w.set_location(proto, hall)?;
            }
            w.info.hall_of_prototypes = hall;
            w.info.lobby = lobby;
            w.info.prototypes.insert(PROTO_THING.into(), thing);
            w.info.prototypes.insert(PROTO_ROOM.into(), room);
            w.info.prototypes.insert(PROTO_LINK.into(), link);
            w.info.prototypes.insert(PROTO_PERSON.into(), person);
            w.info_dirty = true;
            info!("seeded world '{}'", w.info.name);
            Ok(())
        })
    }

    fn put_props(&mut self, id: ThingId, props: &[(&str, PropValue)]) -> Result<(), WorldError> {
        let thing = self.thing_mut_or_err(id)?;
        for (name, value) in props {
            thing.props.insert((*name).to_string(), value.clone());
        }
        Ok(())
    }

    /// Allocate a thing with an explicit prototype and location.
    pub(crate) fn create_raw(
        &mut self,
        prototype: Option<ThingId>,
        location: Option<ThingId>,
    ) -> Result<ThingId, WorldError> {
        self.with_transaction(|w| {
            let id = w.info.next_id;
            w.info.next_id += 1;
            w.info_dirty = true;
            let mut thing = Thing::new(id, prototype);
            if let Some(location) = location {
                thing.associations.push(Association::new(ASSOC_LOCATION, location));
            }
            w.things.insert(id, thing);
            w.touch(id);
            w.reindex_now(id);
            Ok(id)
        })
    }

    /// New thing with the generic thing prototype, located in limbo.
    pub fn create(&mut self, name: &str, description: &str) -> Result<ThingId, WorldError> {
        let proto = self.prototype(PROTO_THING);
        self.create_from(proto, name, description)
    }

    pub fn create_from(
        &mut self,
        prototype: Option<ThingId>,
        name: &str,
        description: &str,
    ) -> Result<ThingId, WorldError> {
        let limbo = self.info.limbo;
        self.with_transaction(|w| {
            let id = w.create_raw(prototype, Some(limbo))?;
            let thing = w.thing_mut_or_err(id)?;
            thing.props.insert(PROP_NAME.into(), name.into());
            if !description.is_empty() {
                thing.props.insert(PROP_DESCRIPTION.into(), description.into());
            }
            debug!("created %{} '{}'", id, name);
            Ok(id)
        })
    }

    /// Create a pair of linked exits: `from_name` in `from` leading to `to`,
    /// and `back_name` in `to` leading back.
    pub fn link_rooms(
        &mut self,
        from: ThingId,
        from_name: &str,
        to: ThingId,
        back_name: &str,
    ) -> Result<(ThingId, ThingId), WorldError> {
        let proto = self.prototype(PROTO_LINK);
        self.with_transaction(|w| {
            let there = w.create_from(proto, from_name, "")?;
            let back = w.create_from(proto, back_name, "")?;
            w.set_association(there, ASSOC_LINK_OWNER, from, false)?;
            w.set_association(back, ASSOC_LINK_OWNER, to, false)?;
            w.set_association(there, ASSOC_OTHER_LINK, back, false)?;
            w.set_association(back, ASSOC_OTHER_LINK, there, false)?;
            Ok((there, back))
        })
    }

    /// Missing ids yield `None`; dangling references are normal.
    pub fn get(&self, id: ThingId) -> Option<&Thing> {
        self.things.get(&id)
    }

    pub fn contains(&self, id: ThingId) -> bool {
        self.things.contains_key(&id)
    }

    /// Mutable access; marks the thing as a commit candidate.
    pub fn thing_mut(&mut self, id: ThingId) -> Option<&mut Thing> {
        if !self.things.contains_key(&id) {
            return None;
        }
        self.touch(id);
        self.things.get_mut(&id)
    }

    pub(crate) fn thing_mut_or_err(&mut self, id: ThingId) -> Result<&mut Thing, WorldError> {
        self.thing_mut(id)
            .ok_or_else(|| WorldError::NotFound(format!("%{}", id)))
    }

    pub fn thing_count(&self) -> usize {
        self.things.len()
    }

    pub fn thing_ids(&self) -> Vec<ThingId> {
        let mut ids: Vec<ThingId> = self.things.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &WorldInfo {
        &self.info
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    pub fn limbo(&self) -> ThingId {
        self.info.limbo
    }

    pub fn lobby(&self) -> ThingId {
        self.info.lobby
    }

    pub fn hall(&self) -> ThingId {
        self.info.hall_of_prototypes
    }

    /// Standard prototype by name.
    pub fn prototype(&self, name: &str) -> Option<ThingId> {
        self.info.prototypes.get(name).copied()
    }

    /// Whether `id` is one of the seeded things that must never be toasted.
    pub fn is_well_known(&self, id: ThingId) -> bool {
        id == self.info.limbo
            || id == self.info.lobby
            || id == self.info.hall_of_prototypes
            || self.info.prototypes.values().any(|p| *p == id)
    }

    /// Walk the prototype chain from `id` outward. At the first ancestor
    /// (including `id`) owning any of `names`, return its value for the
    /// earliest candidate in `names` order.
    pub fn choose(&self, id: ThingId, names: &[&str]) -> Option<&PropValue> {
        let mut current = Some(id);
        let mut seen = HashSet::new();
        while let Some(cur) = current {
            if !seen.insert(cur) || seen.len() > MAX_PROTOTYPE_DEPTH {
                warn!("prototype chain of %{} loops or is too deep", id);
                return None;
            }
            let thing = self.things.get(&cur)?;
            if let Some(value) = names.iter().find_map(|name| thing.props.get(*name)) {
                return Some(value);
            }
            current = thing.prototype;
        }
        None
    }

    pub fn choose_text(&self, id: ThingId, names: &[&str]) -> Option<String> {
        self.choose(id, names).map(PropValue::as_text)
    }

    pub fn choose_number(&self, id: ThingId, names: &[&str]) -> Option<i64> {
        self.choose(id, names).and_then(PropValue::as_number)
    }

    /// Inherited boolean flag; absent means false.
    pub fn flag(&self, id: ThingId, name: &str) -> bool {
        self.choose(id, &[name]).map(PropValue::is_true).unwrap_or(false)
    }

    pub fn is_closed(&self, id: ThingId) -> bool {
        self.flag(id, PROP_CLOSED)
    }

    /// Short name, falling back to `%id`.
    pub fn name_of(&self, id: ThingId) -> String {
        self.choose_text(id, &[PROP_NAME])
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("%{}", id))
    }

    /// Full name (or name) with the article, e.g. "a rock".
    pub fn display_name(&self, id: ThingId) -> String {
        let name = self
            .choose_text(id, &[PROP_FULL_NAME])
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_of(id));
        match self.choose_text(id, &[PROP_ARTICLE]) {
            Some(article) if !article.is_empty() => format!("{} {}", article, name),
            _ => name,
        }
    }

    pub fn aliases(&self, id: ThingId) -> Vec<String> {
        self.choose(id, &[PROP_ALIASES])
            .map(PropValue::as_list)
            .unwrap_or_default()
    }

    pub fn set_prop(
        &mut self,
        id: ThingId,
        name: &str,
        value: impl Into<PropValue>,
    ) -> Result<(), WorldError> {
        let value = value.into();
        self.with_transaction(|w| {
            let thing = w.thing_mut_or_err(id)?;
            thing.props.insert(name.to_string(), value);
            w.reindex_now(id);
            Ok(())
        })
    }

    pub fn unset_prop(&mut self, id: ThingId, name: &str) -> Result<Option<PropValue>, WorldError> {
        self.with_transaction(|w| {
            let old = w.thing_mut_or_err(id)?.props.remove(name);
            w.reindex_now(id);
            Ok(old)
        })
    }

    /// Repoint `id` at a new prototype. Every inherited property changes at once.
    pub fn set_prototype(&mut self, id: ThingId, prototype: Option<ThingId>) -> Result<(), WorldError> {
        if let Some(proto) = prototype {
            if !self.contains(proto) {
                return Err(WorldError::NotFound(format!("%{}", proto)));
            }
            let mut cur = Some(proto);
            let mut steps = 0;
            while let Some(c) = cur {
                if c == id {
                    return Err(WorldError::InvalidCommand(format!(
                        "%{} would inherit from itself",
                        id
                    )));
                }
                steps += 1;
                if steps > MAX_PROTOTYPE_DEPTH {
                    break;
                }
                cur = self.get(c).and_then(|t| t.prototype);
            }
        }
        self.with_transaction(|w| {
            w.thing_mut_or_err(id)?.prototype = prototype;
            w.reindex_now(id);
            info!(target: "audit", "reproto %{} -> {:?}", id, prototype);
            Ok(())
        })
    }

    /// `id` plus everything transitively located in it or owned as a link by it.
    pub fn find_connected(&self, id: ThingId) -> BTreeSet<ThingId> {
        let mut connected = BTreeSet::new();
        if !self.contains(id) {
            return connected;
        }
        let mut queue = VecDeque::from([id]);
        while let Some(cur) = queue.pop_front() {
            if !connected.insert(cur) {
                continue;
            }
            for next in self
                .associated(ASSOC_LOCATION, cur)
                .into_iter()
                .chain(self.associated(ASSOC_LINK_OWNER, cur))
            {
                if !connected.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        connected
    }

    /// Deep-copy `id` and everything connected to it.
    pub fn copy(&mut self, id: ThingId) -> Result<ThingId, WorldError> {
        let connected = self.find_connected(id);
        self.copy_set(id, &connected)
    }

    /// Copy every member of `connected`, giving each a fresh id. Edges between
    /// members point at the copies; edges leaving the set are kept as they are.
    pub fn copy_set(&mut self, id: ThingId, connected: &BTreeSet<ThingId>) -> Result<ThingId, WorldError> {
        if !connected.contains(&id) || !self.contains(id) {
            return Err(WorldError::NotFound(format!("%{}", id)));
        }
        self.with_transaction(|w| {
            let mut mapping: HashMap<ThingId, ThingId> = HashMap::new();
            for old in connected {
                if w.contains(*old) {
                    let new = w.info.next_id;
                    w.info.next_id += 1;
                    mapping.insert(*old, new);
                }
            }
            w.info_dirty = true;
            for (old, new) in &mapping {
                let Some(original) = w.things.get(old) else {
                    continue;
                };
                let mut copy = original.clone();
                copy.id = *new;
                if let Some(proto) = copy.prototype {
                    copy.prototype = Some(mapping.get(&proto).copied().unwrap_or(proto));
                }
                for edge in copy.associations.iter_mut() {
                    if let Some(mapped) = mapping.get(&edge.target) {
                        edge.target = *mapped;
                    }
                }
                w.things.insert(*new, copy);
                w.touch(*new);
                w.reindex_now(*new);
            }
            let root = mapping
                .get(&id)
                .copied()
                .ok_or_else(|| WorldError::Internal("copy lost its root".into()))?;
            info!(target: "audit", "copied %{} ({} things) -> %{}", id, mapping.len(), root);
            Ok(root)
        })
    }

    /// Permanently delete `ids`. Fails, changing nothing, when a member is the
    /// prototype of a thing outside the set. Contents and links of members
    /// that are not themselves toasted move to limbo, and every edge pointing
    /// at a member is severed.
    pub fn toast(&mut self, ids: &BTreeSet<ThingId>) -> Result<(), WorldError> {
        for id in ids {
            if self.is_well_known(*id) {
                return Err(WorldError::PermissionDenied(format!(
                    "%{} is part of the world's foundation",
                    id
                )));
            }
            let users: Vec<ThingId> = self
                .instances_of(*id)
                .into_iter()
                .filter(|user| !ids.contains(user))
                .collect();
            if !users.is_empty() {
                return Err(WorldError::PrototypeInUse { id: *id, users });
            }
        }
        let limbo = self.info.limbo;
        self.with_transaction(|w| {
            for id in ids {
                if !w.contains(*id) {
                    continue;
                }
                for content in w.associated(ASSOC_LOCATION, *id) {
                    if !ids.contains(&content) {
                        w.set_location(content, limbo)?;
                    }
                }
                for link in w.associated(ASSOC_LINK_OWNER, *id) {
                    if !ids.contains(&link) {
                        w.dissociate_all(link, ASSOC_LINK_OWNER)?;
                        w.set_location(link, limbo)?;
                    }
                }
                for source in w.all_associated(*id) {
                    if !ids.contains(&source) {
                        w.dissociate_from(source, *id)?;
                    }
                }
            }
            for id in ids {
                if w.things.remove(id).is_some() {
                    w.listeners.remove(id);
                    w.scheduler.forget(*id);
                    w.touch(*id);
                    w.reindex_now(*id);
                }
            }
            info!(target: "audit", "toasted {:?}", ids);
            Ok(())
        })
    }

    pub fn attach_listener(&mut self, id: ThingId, listener: Box<dyn Listener>) {
        self.listeners.insert(id, listener);
    }

    pub fn detach_listener(&mut self, id: ThingId) -> Option<Box<dyn Listener>> {
        self.listeners.remove(&id)
    }

    pub fn has_listener(&self, id: ThingId) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Whether `id` acts with admin rights: its listener says so or it carries
    /// the admin flag.
    pub fn is_admin(&self, id: ThingId) -> bool {
        self.listeners.get(&id).map(|l| l.is_admin()).unwrap_or(false)
            || self.flag(id, crate::world::types::PROP_ADMIN)
    }

    pub fn is_verbose(&self, id: ThingId) -> bool {
        self.listeners.get(&id).map(|l| l.is_verbose()).unwrap_or(false)
    }

    /// Send text to `id`'s listener, if it has one.
    pub fn tell(&mut self, id: ThingId, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(listener) = self.listeners.get_mut(&id) {
            listener.output(text);
        }
    }

    // Replace the command registry (embedders adding their own verbs).
}
