/// Integration tests for the thing arena and its association indices:
/// random mutation sequences, toasting and deep copies.
use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use textcraft::world::{ThingId, World, WorldError, PROTO_ROOM};

fn world_with_garden() -> (World, ThingId, ThingId, ThingId, ThingId) {
    let mut world = World::in_memory("graph").unwrap();
    let room = world.prototype(PROTO_ROOM);
    let garden = world.create_from(room, "garden", "Roses everywhere.").unwrap();
    let rock = world.create("rock", "").unwrap();
    world.set_location(rock, garden).unwrap();
    let (north, south) = world.link_rooms(world.lobby(), "north", garden, "south").unwrap();
    (world, garden, rock, north, south)
}

/// Contents and links read from the index must match a scan of every thing.
fn assert_reverse_lookups_match_scan(world: &World) {
    let ids = world.thing_ids();
    for target in &ids {
        let mut scanned: Vec<ThingId> = ids
            .iter()
            .copied()
            .filter(|id| world.location(*id) == Some(*target))
            .collect();
        scanned.sort_unstable();
        let mut indexed = world.contents(*target);
        indexed.sort_unstable();
        assert_eq!(indexed, scanned, "contents of %{}", target);

        let mut instances: Vec<ThingId> = ids
            .iter()
            .copied()
            .filter(|id| world.get(*id).and_then(|t| t.prototype) == Some(*target))
            .collect();
        instances.sort_unstable();
        let mut indexed = world.instances_of(*target);
        indexed.sort_unstable();
        assert_eq!(indexed, instances, "instances of %{}", target);
    }
}

#[test]
fn indices_survive_random_mutations() {
    let mut rng = StdRng::seed_from_u64(0x7e47);
    let mut world = World::in_memory("fuzz").unwrap();
    let mut made: Vec<ThingId> = Vec::new();
    let room = world.prototype(PROTO_ROOM);

    for step in 0..400 {
        let pick = |rng: &mut StdRng, made: &Vec<ThingId>| made[rng.gen_range(0..made.len())];
        match rng.gen_range(0..8) {
            0 | 1 => {
                let proto = if rng.gen_bool(0.3) { room } else { None };
                let id = match proto {
                    Some(_) => world.create_from(proto, &format!("room{}", step), "").unwrap(),
                    None => world.create(&format!("item{}", step), "").unwrap(),
                };
                made.push(id);
            }
            2 | 3 if made.len() > 1 => {
                let a = pick(&mut rng, &made);
                let b = pick(&mut rng, &made);
                world.set_location(a, b).unwrap();
            }
            4 if made.len() > 1 => {
                let a = pick(&mut rng, &made);
                let b = pick(&mut rng, &made);
                // cycles are refused; that is fine here
                let _ = world.set_prototype(a, Some(b));
            }
            5 if made.len() > 1 => {
                let a = pick(&mut rng, &made);
                let b = pick(&mut rng, &made);
                let (x, y) = world.link_rooms(a, "out", b, "in").unwrap();
                made.push(x);
                made.push(y);
            }
            6 if !made.is_empty() => {
                let a = pick(&mut rng, &made);
                let doomed = world.find_connected(a);
                if world.toast(&doomed).is_ok() {
                    made.retain(|id| !doomed.contains(id));
                }
            }
            7 if !made.is_empty() => {
                let a = pick(&mut rng, &made);
                let copied = world.copy(a).unwrap();
                made.extend(world.find_connected(copied));
                made.sort_unstable();
                made.dedup();
            }
            _ => {
                let id = world.create(&format!("filler{}", step), "").unwrap();
                made.push(id);
            }
        }
        if step % 25 == 0 {
            assert!(world.check_indices(), "index drift after step {}", step);
        }
    }
    assert!(world.check_indices());
    assert_reverse_lookups_match_scan(&world);
}

#[test]
fn toast_refuses_prototypes_still_in_use() {
    let mut world = World::in_memory("toast").unwrap();
    let widget = world.create("widget", "A widget.").unwrap();
    let gizmo = world.create_from(Some(widget), "gizmo", "").unwrap();
    let version = world.version();

    let err = world.toast(&BTreeSet::from([widget])).unwrap_err();
    match err {
        WorldError::PrototypeInUse { id, users } => {
            assert_eq!(id, widget);
            assert_eq!(users, vec![gizmo]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(world.contains(widget));
    assert_eq!(world.instances_of(widget), vec![gizmo]);
    assert_eq!(world.version(), version);
    assert!(world.check_indices());

    // toasting the user along with the prototype is fine
    world.toast(&BTreeSet::from([widget, gizmo])).unwrap();
    assert!(!world.contains(widget));
    assert!(!world.contains(gizmo));
    assert!(world.check_indices());
}

#[test]
fn toasting_a_room_relocates_what_survives() {
    let (mut world, garden, rock, north, south) = world_with_garden();
    world.toast(&BTreeSet::from([garden])).unwrap();

    assert!(world.get(garden).is_none());
    assert_eq!(world.location(rock), Some(world.limbo()));
    assert_eq!(world.location(south), Some(world.limbo()));
    assert_eq!(world.link_owner(south), None);
    assert_eq!(world.destination(north), None, "the way north leads nowhere now");
    assert!(world.check_indices());
}

#[test]
fn toasting_the_connected_set_severs_edges_into_it() {
    let (mut world, garden, rock, north, south) = world_with_garden();
    let connected = world.find_connected(garden);
    assert_eq!(connected, BTreeSet::from([garden, rock, south]));

    world.toast(&connected).unwrap();
    for id in [garden, rock, south] {
        assert!(!world.contains(id));
    }
    assert_eq!(world.other_link(north), None);
    assert_eq!(world.links(world.lobby()), vec![north]);
    assert!(world.check_indices());
}

#[test]
fn copying_a_room_keeps_outside_edges() {
    let (mut world, garden, rock, north, south) = world_with_garden();
    let highest_before = *world.thing_ids().iter().max().unwrap();

    let copy = world.copy(garden).unwrap();
    assert!(copy > highest_before);
    assert_eq!(world.name_of(copy), "garden");
    assert_eq!(world.get(copy).unwrap().prototype, world.get(garden).unwrap().prototype);

    let copied_contents = world.contents(copy);
    assert_eq!(copied_contents.len(), 1);
    assert_ne!(copied_contents[0], rock);
    assert_eq!(world.name_of(copied_contents[0]), "rock");

    let copied_links = world.links(copy);
    assert_eq!(copied_links.len(), 1);
    let copied_south = copied_links[0];
    assert_ne!(copied_south, south);
    // the copied exit still leads back to the lobby
    assert_eq!(world.destination(copied_south), Some(world.lobby()));

    // the original is untouched
    assert_eq!(world.contents(garden), vec![rock]);
    assert_eq!(world.links(garden), vec![south]);
    assert_eq!(world.destination(north), Some(garden));
    assert_eq!(world.location(copy), world.location(garden));
    assert!(world.check_indices());
}

#[test]
fn missing_things_read_as_absent() {
    let world = World::in_memory("absent").unwrap();
    assert!(world.get(9_999).is_none());
    assert!(world.contents(9_999).is_empty());
    assert_eq!(world.location(9_999), None);
    assert!(world.find_connected(9_999).is_empty());
}
