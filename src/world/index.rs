//! Reverse association indices.
//!
//! Every thing owns its forward edges. The index answers the reverse
//! questions ("what is located in X", "what points at X at all", "what
//! inherits from X") without scanning the arena. It is maintained by diffing
//! each thing's current edges against the edges it was last indexed with, so
//! only the symmetric difference is ever applied.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::trace;

use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::types::{
    Association, Thing, ThingId, ASSOC_LINK_OWNER, ASSOC_LOCATION, ASSOC_OTHER_LINK, PROP_GLOBAL,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct IndexedState {
    prototype: Option<ThingId>,
    edges: BTreeSet<Association>,
    global: bool,
}

impl IndexedState {
    fn of(thing: &Thing) -> Self {
        Self {
            prototype: thing.prototype,
            edges: thing.edge_set(),
            global: thing
                .prop(PROP_GLOBAL)
                .map(|v| v.is_true())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationIndex {
    /// prop -> target -> sources holding (prop, target)
    by_prop: HashMap<String, HashMap<ThingId, BTreeSet<ThingId>>>,
    /// target -> source -> number of distinct props linking source to target
    all: HashMap<ThingId, BTreeMap<ThingId, usize>>,
    /// prototype -> instances
    instances: HashMap<ThingId, BTreeSet<ThingId>>,
    globals: BTreeSet<ThingId>,
    indexed: HashMap<ThingId, IndexedState>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from scratch. Used at load time and as a consistency
    /// check against the incrementally maintained one.
    pub fn rebuild<'a>(things: impl IntoIterator<Item = &'a Thing>) -> Self {
        let mut index = Self::new();
        for thing in things {
            index.reindex(thing);
        }
        index
    }

    /// Apply the difference between what `thing` was last indexed with and
    /// what it holds now. Returns whether anything changed.
    pub fn reindex(&mut self, thing: &Thing) -> bool {
        let next = IndexedState::of(thing);
        self.apply(thing.id, next)
    }

    /// Drop every index entry contributed by `id`.
    pub fn remove_thing(&mut self, id: ThingId) -> bool {
        self.apply(id, IndexedState::default())
    }

    fn apply(&mut self, id: ThingId, next: IndexedState) -> bool {
        let previous = self.indexed.get(&id).cloned().unwrap_or_default();
        if previous == next {
            return false;
        }
        for edge in previous.edges.difference(&next.edges) {
            self.remove_edge(id, edge);
        }
        for edge in next.edges.difference(&previous.edges) {
            self.add_edge(id, edge);
        }
        if previous.prototype != next.prototype {
            if let Some(old) = previous.prototype {
                if let Some(set) = self.instances.get_mut(&old) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.instances.remove(&old);
                    }
                }
            }
            if let Some(new) = next.prototype {
                self.instances.entry(new).or_default().insert(id);
            }
        }
        if next.global {
            self.globals.insert(id);
        } else {
            self.globals.remove(&id);
        }
        trace!("reindexed %{}", id);
        if next == IndexedState::default() {
            self.indexed.remove(&id);
        } else {
            self.indexed.insert(id, next);
        }
        true
    }

    fn add_edge(&mut self, source: ThingId, edge: &Association) {
        self.by_prop
            .entry(edge.prop.clone())
            .or_default()
            .entry(edge.target)
            .or_default()
            .insert(source);
        *self
            .all
            .entry(edge.target)
            .or_default()
            .entry(source)
            .or_insert(0) += 1;
    }

    fn remove_edge(&mut self, source: ThingId, edge: &Association) {
        if let Some(targets) = self.by_prop.get_mut(&edge.prop) {
            if let Some(sources) = targets.get_mut(&edge.target) {
                sources.remove(&source);
                if sources.is_empty() {
                    targets.remove(&edge.target);
                }
            }
            if targets.is_empty() {
                self.by_prop.remove(&edge.prop);
            }
        }
        if let Some(sources) = self.all.get_mut(&edge.target) {
            if let Some(count) = sources.get_mut(&source) {
                *count -= 1;
                if *count == 0 {
                    sources.remove(&source);
                }
            }
            if sources.is_empty() {
                self.all.remove(&edge.target);
            }
        }
    }

    /// Things holding an edge `(prop, target)`.
    pub fn associated(&self, prop: &str, target: ThingId) -> Vec<ThingId> {
        self.by_prop
            .get(prop)
            .and_then(|targets| targets.get(&target))
            .map(|sources| sources.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Things holding any edge to `target`.
    pub fn all_associated(&self, target: ThingId) -> Vec<ThingId> {
        self.all
            .get(&target)
            .map(|sources| sources.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn instances(&self, prototype: ThingId) -> Vec<ThingId> {
        self.instances
            .get(&prototype)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn globals(&self) -> Vec<ThingId> {
        self.globals.iter().copied().collect()
    }
}

/// Association accessors. Single-valued writes replace earlier edges for the
/// same property; `multi` appends alongside them.
impl World {
    pub fn set_association(
        &mut self,
        id: ThingId,
        prop: &str,
        target: ThingId,
        multi: bool,
    ) -> Result<(), WorldError> {
        self.with_transaction(|w| {
            let thing = w.thing_mut_or_err(id)?;
            if !multi {
                thing.associations.retain(|a| a.prop != prop);
            }
            thing.associations.push(Association::new(prop, target));
            w.reindex_now(id);
            Ok(())
        })
    }

    pub fn dissociate(&mut self, id: ThingId, prop: &str, target: ThingId) -> Result<(), WorldError> {
        self.with_transaction(|w| {
            let thing = w.thing_mut_or_err(id)?;
            thing
                .associations
                .retain(|a| !(a.prop == prop && a.target == target));
            w.reindex_now(id);
            Ok(())
        })
    }

    pub fn dissociate_all(&mut self, id: ThingId, prop: &str) -> Result<(), WorldError> {
        self.with_transaction(|w| {
            let thing = w.thing_mut_or_err(id)?;
            thing.associations.retain(|a| a.prop != prop);
            w.reindex_now(id);
            Ok(())
        })
    }

    /// Remove every edge on `id` pointing at `target`, whatever its property.
    pub fn dissociate_from(&mut self, id: ThingId, target: ThingId) -> Result<(), WorldError> {
        self.with_transaction(|w| {
            let thing = w.thing_mut_or_err(id)?;
            thing.associations.retain(|a| a.target != target);
            w.reindex_now(id);
            Ok(())
        })
    }

    /// First edge named `prop` on `id`.
    pub fn association(&self, id: ThingId, prop: &str) -> Option<ThingId> {
        self.get(id).and_then(|t| t.first_associated(prop))
    }

    pub fn associations(&self, id: ThingId, prop: &str) -> Vec<ThingId> {
        self.get(id)
            .map(|t| t.associated(prop).collect())
            .unwrap_or_default()
    }

    /// Reverse lookup: things holding `(prop, target)`.
    pub fn associated(&self, prop: &str, target: ThingId) -> Vec<ThingId> {
        self.index.associated(prop, target)
    }

    /// Reverse lookup: things holding any edge to `target`.
    pub fn all_associated(&self, target: ThingId) -> Vec<ThingId> {
        self.index.all_associated(target)
    }

    pub fn location(&self, id: ThingId) -> Option<ThingId> {
        self.association(id, ASSOC_LOCATION)
    }

    pub fn set_location(&mut self, id: ThingId, location: ThingId) -> Result<(), WorldError> {
        self.set_association(id, ASSOC_LOCATION, location, false)
    }

    /// Things located in `id`, highest `priority` first, then by id.
    pub fn contents(&self, id: ThingId) -> Vec<ThingId> {
        self.sorted_by_priority(self.associated(ASSOC_LOCATION, id))
    }

    /// Links owned by `id`, highest `priority` first, then by id.
    pub fn links(&self, id: ThingId) -> Vec<ThingId> {
        self.sorted_by_priority(self.associated(ASSOC_LINK_OWNER, id))
    }

    pub fn link_owner(&self, link: ThingId) -> Option<ThingId> {
        self.association(link, ASSOC_LINK_OWNER)
    }

    pub fn other_link(&self, link: ThingId) -> Option<ThingId> {
        self.association(link, ASSOC_OTHER_LINK)
    }

    /// Where a link leads: the owner of its paired link.
    pub fn destination(&self, link: ThingId) -> Option<ThingId> {
        self.other_link(link).and_then(|other| self.link_owner(other))
    }

    /// Things advertising commands world-wide.
    pub fn global_things(&self) -> Vec<ThingId> {
        self.index.globals()
    }

    /// Things whose prototype is `id`.
    pub fn instances_of(&self, id: ThingId) -> Vec<ThingId> {
        self.index.instances(id)
    }

    /// Compare the incremental index with a full rebuild.
    pub fn check_indices(&self) -> bool {
        let rebuilt = AssociationIndex::rebuild(self.things.values());
        rebuilt == self.index
    }

    pub(crate) fn reindex_now(&mut self, id: ThingId) {
        match self.things.get(&id) {
            Some(thing) => {
                self.index.reindex(thing);
            }
            None => {
                self.index.remove_thing(id);
            }
        }
    }

    fn sorted_by_priority(&self, mut ids: Vec<ThingId>) -> Vec<ThingId> {
        ids.sort_by_key(|id| {
            let priority = self.choose_number(*id, &[crate::world::types::PROP_PRIORITY]);
            (std::cmp::Reverse(priority.unwrap_or(0)), *id)
        });
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thing(id: ThingId, proto: Option<ThingId>, edges: &[(&str, ThingId)]) -> Thing {
        let mut t = Thing::new(id, proto);
        for (prop, target) in edges {
            t.associations.push(Association::new(*prop, *target));
        }
        t
    }

    #[test]
    fn reindex_applies_only_the_difference() {
        let mut index = AssociationIndex::new();
        let mut a = thing(1, None, &[("location", 10), ("key", 20)]);
        index.reindex(&a);
        assert_eq!(index.associated("location", 10), vec![1]);
        assert_eq!(index.all_associated(20), vec![1]);

        a.associations = vec![Association::new("location", 11), Association::new("key", 20)];
        assert!(index.reindex(&a));
        assert!(index.associated("location", 10).is_empty());
        assert_eq!(index.associated("location", 11), vec![1]);
        assert_eq!(index.all_associated(20), vec![1]);
        assert!(!index.reindex(&a), "unchanged thing must not reindex");
        assert_eq!(index, AssociationIndex::rebuild([&a]));
    }

    #[test]
    fn partial_overlap_keeps_all_index_entry() {
        let mut index = AssociationIndex::new();
        let mut a = thing(1, None, &[("location", 5), ("owner", 5)]);
        index.reindex(&a);
        assert_eq!(index.all_associated(5), vec![1]);

        a.associations.retain(|e| e.prop != "owner");
        index.reindex(&a);
        assert_eq!(index.all_associated(5), vec![1], "location edge still points at 5");

        a.associations.clear();
        index.reindex(&a);
        assert!(index.all_associated(5).is_empty());
        assert_eq!(index, AssociationIndex::rebuild([&a]));
    }

    #[test]
    fn multi_edges_and_dissociation_update_reverse_lookups() {
        let mut world = World::in_memory("index").unwrap();
        let ring = world.create("ring", "").unwrap();
        let door = world.create("door", "").unwrap();
        let gate = world.create("gate", "").unwrap();
        world.set_association(ring, "opens", door, true).unwrap();
        world.set_association(ring, "opens", gate, true).unwrap();
        world.set_association(ring, "owner", door, false).unwrap();
        assert_eq!(world.associations(ring, "opens"), vec![door, gate]);

        world.dissociate(ring, "opens", door).unwrap();
        assert_eq!(world.associations(ring, "opens"), vec![gate]);
        assert!(world.associated("opens", door).is_empty());
        assert_eq!(world.all_associated(door), vec![ring], "owner edge remains");

        world.dissociate_from(ring, door).unwrap();
        assert!(world.all_associated(door).is_empty());
        world.dissociate_all(ring, "opens").unwrap();
        assert!(world.associated("opens", gate).is_empty());
        assert!(world.check_indices());
    }

    #[test]
    fn prototype_index_tracks_changes() {
        let mut index = AssociationIndex::new();
        let mut a = thing(1, Some(2), &[]);
        index.reindex(&a);
        assert_eq!(index.instances(2), vec![1]);
        a.prototype = Some(3);
        index.reindex(&a);
        assert!(index.instances(2).is_empty());
        assert_eq!(index.instances(3), vec![1]);
        index.remove_thing(1);
        assert!(index.instances(3).is_empty());
        assert_eq!(index, AssociationIndex::new());
    }
}
