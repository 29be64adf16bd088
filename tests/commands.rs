/// Integration tests for command dispatch: built-in verbs, command templates
/// stored on things, scripted templates and reactions that veto movement.
use textcraft::world::{OutputBuffer, ThingId, World, WorldError, PROTO_PERSON, PROTO_ROOM};

struct Players {
    world: World,
    alice: ThingId,
    alice_out: OutputBuffer,
    bob: ThingId,
    bob_out: OutputBuffer,
}

fn two_players() -> Players {
    let mut world = World::in_memory("commands").unwrap();
    let person = world.prototype(PROTO_PERSON);
    let lobby = world.lobby();
    let alice = world.create_from(person, "alice", "").unwrap();
    let bob = world.create_from(person, "bob", "").unwrap();
    world.set_location(alice, lobby).unwrap();
    world.set_location(bob, lobby).unwrap();
    let alice_out = OutputBuffer::admin();
    let bob_out = OutputBuffer::new();
    world.attach_listener(alice, Box::new(alice_out.clone()));
    world.attach_listener(bob, Box::new(bob_out.clone()));
    Players {
        world,
        alice,
        alice_out,
        bob,
        bob_out,
    }
}

/// A garden north of the lobby; returns (garden, north exit).
fn add_garden(world: &mut World) -> (ThingId, ThingId) {
    let room = world.prototype(PROTO_ROOM);
    let garden = world.create_from(room, "garden", "").unwrap();
    let (north, _) = world.link_rooms(world.lobby(), "north", garden, "south").unwrap();
    (garden, north)
}

#[test]
fn look_lists_what_is_in_the_room() {
    let mut p = two_players();
    let rock = p.world.create("rock", "A small, grey rock.").unwrap();
    p.world.set_location(rock, p.world.lobby()).unwrap();

    p.world.command(p.bob, "look").unwrap();
    let text = p.bob_out.take().join("\n");
    assert!(text.starts_with("You are in the lobby."), "{}", text);
    assert!(text.to_lowercase().contains("a rock"), "{}", text);
    assert!(text.contains("Alice is here."));
    assert!(!text.contains("Bob"), "viewers do not see themselves: {}", text);

    p.world.command(p.bob, "look rock").unwrap();
    assert_eq!(p.bob_out.take(), vec!["A small, grey rock.".to_string()]);
}

#[test]
fn say_and_emote_render_per_viewer() {
    let mut p = two_players();
    p.world.command(p.alice, "'hello there").unwrap();
    assert_eq!(p.alice_out.take(), vec!["You say, \"hello there\".".to_string()]);
    assert_eq!(p.bob_out.take(), vec!["Alice says, \"hello there\".".to_string()]);

    p.world.command(p.bob, ":waves happily").unwrap();
    assert_eq!(p.bob_out.take(), vec!["You emote: waves happily".to_string()]);
    assert_eq!(p.alice_out.take(), vec!["Bob waves happily".to_string()]);
}

#[test]
fn walking_through_an_exit() {
    let mut p = two_players();
    let (garden, _north) = add_garden(&mut p.world);

    // the bare exit word runs the exit's own "go $0" template
    p.world.command(p.bob, "north").unwrap();
    assert_eq!(p.world.location(p.bob), Some(garden));
    let seen = p.bob_out.take().join("\n");
    assert!(seen.contains("You are in the garden."), "{}", seen);
    assert_eq!(p.alice_out.take(), vec!["Bob goes north.".to_string()]);

    p.world.command(p.bob, "go south").unwrap();
    assert_eq!(p.world.location(p.bob), Some(p.world.lobby()));
    assert_eq!(p.alice_out.take(), vec!["Bob arrives.".to_string()]);
}

#[test]
fn a_command_template_can_bar_an_exit_word() {
    let mut p = two_players();
    let (garden, north) = add_garden(&mut p.world);
    p.world
        .set_prop(north, "cmd", "@output The gate to $this is chained shut.")
        .unwrap();

    p.world.command(p.bob, "north").unwrap();
    assert_eq!(p.world.location(p.bob), Some(p.world.lobby()));
    assert_eq!(p.bob_out.take(), vec!["The gate to north is chained shut.".to_string()]);

    // `go` is a built-in and still works
    p.world.command(p.bob, "go north").unwrap();
    assert_eq!(p.world.location(p.bob), Some(garden));
}

#[test]
fn a_reaction_can_lock_an_exit() {
    let mut p = two_players();
    let (garden, north) = add_garden(&mut p.world);
    p.world
        .set_prop(
            north,
            "react_go",
            "@fail The door is locked. @others $event.source rattles the door.",
        )
        .unwrap();

    let err = p.world.command(p.bob, "go north").unwrap_err();
    assert!(err.is_event_failure());
    assert_eq!(p.world.location(p.bob), Some(p.world.lobby()));
    assert_eq!(p.bob_out.take(), vec!["The door is locked.".to_string()]);
    assert_eq!(p.alice_out.take(), vec!["bob rattles the door.".to_string()]);

    // unlocking is just removing the reaction
    p.world.unset_prop(north, "react_go").unwrap();
    p.world.command(p.bob, "north").unwrap();
    assert_eq!(p.world.location(p.bob), Some(garden));
}

#[test]
fn a_locked_exit_holds_on_every_try_within_a_tick() {
    let mut p = two_players();
    let (garden, north) = add_garden(&mut p.world);
    p.world
        .set_prop(north, "react_go", "@fail The door is locked.")
        .unwrap();

    for _ in 0..3 {
        let err = p.world.command(p.bob, "go north").unwrap_err();
        assert!(err.is_event_failure());
        assert_eq!(p.world.location(p.bob), Some(p.world.lobby()));
    }
    assert_eq!(p.bob_out.take(), vec!["The door is locked.".to_string(); 3]);
    assert_eq!(p.world.scheduler().pending_count(), 0, "no stale veto left for the next tick");

    p.world.tick().unwrap();
    assert!(p.bob_out.take().is_empty());
    p.world.unset_prop(north, "react_go").unwrap();
    p.world.command(p.bob, "north").unwrap();
    assert_eq!(p.world.location(p.bob), Some(garden));
}

#[test]
fn command_templates_substitute_arguments() {
    let mut p = two_players();
    let mirror = p.world.create("mirror", "").unwrap();
    p.world.set_location(mirror, p.bob).unwrap();
    p.world
        .set_prop(mirror, "cmd_admire", "@output You admire $1 in $this.\nsay $* looks great")
        .unwrap();

    p.world.command(p.bob, "admire my hat").unwrap();
    let bob_sees = p.bob_out.take();
    assert_eq!(
        bob_sees,
        vec![
            "You admire my in a mirror.".to_string(),
            "You say, \"my hat looks great\".".to_string()
        ]
    );
    assert_eq!(p.alice_out.take(), vec!["Bob says, \"my hat looks great\".".to_string()]);

    let err = p.world.command(p.bob, "admire").unwrap_err();
    assert!(matches!(err, WorldError::NotEnoughArguments { needed: 1, .. }));
}

#[test]
fn templates_that_call_themselves_stop() {
    let mut p = two_players();
    let echo = p.world.create("echo", "").unwrap();
    p.world.set_location(echo, p.bob).unwrap();
    p.world.set_prop(echo, "cmd_shout", "shout again").unwrap();

    // the template may not re-enter its own word
    let err = p.world.command(p.bob, "shout").unwrap_err();
    assert!(matches!(err, WorldError::UnknownCommand(word) if word == "shout"));

    p.world.set_prop(echo, "cmd_ping", "pong").unwrap();
    p.world.set_prop(echo, "cmd_pong", "ping").unwrap();
    let err = p.world.command(p.bob, "ping").unwrap_err();
    assert!(matches!(err, WorldError::NestingTooDeep(_)));
}

#[test]
fn scripted_templates() {
    let mut p = two_players();
    let scale = p.world.create("scale", "").unwrap();
    p.world.set_location(scale, p.bob).unwrap();
    let rock = p.world.create("rock", "").unwrap();
    p.world.set_location(rock, p.world.lobby()).unwrap();
    p.world.set_prop(rock, "weight", 5i64).unwrap();
    p.world
        .set_prop(
            scale,
            "cmd_weigh",
            "!output(name(find($1)) + \" weighs \" + prop(find($1), \"weight\") + \".\")",
        )
        .unwrap();

    p.world.command(p.bob, "weigh rock").unwrap();
    assert_eq!(p.bob_out.take(), vec!["a rock weighs 5.".to_string()]);
}

#[test]
fn admin_commands_need_admin_rights() {
    let mut p = two_players();
    let err = p.world.command(p.bob, "@create thing lamp").unwrap_err();
    assert!(matches!(err, WorldError::PermissionDenied(_)));

    p.world.command(p.alice, "@create thing lamp").unwrap();
    let lamp = p
        .world
        .contents(p.world.lobby())
        .into_iter()
        .find(|id| p.world.name_of(*id) == "lamp")
        .expect("lamp created in the lobby");
    p.world
        .command(p.alice, &format!("@set %{} description A brass lamp.", lamp))
        .unwrap();
    p.alice_out.take();
    p.world.command(p.alice, "look lamp").unwrap();
    assert_eq!(p.alice_out.take(), vec!["A brass lamp.".to_string()]);

    // ordinary players may only change themselves
    let err = p.world.command(p.bob, "@set lamp description Mine now.").unwrap_err();
    assert!(matches!(err, WorldError::PermissionDenied(_)));
    p.world.command(p.bob, "@set me mood grumpy").unwrap();
    assert_eq!(p.world.choose_text(p.bob, &["mood"]).as_deref(), Some("grumpy"));
}

#[test]
fn errors_are_told_to_the_actor() {
    let mut p = two_players();
    assert!(p.world.command(p.bob, "dance").is_err());
    assert_eq!(p.bob_out.take(), vec!["unknown command: dance".to_string()]);
    assert!(p.alice_out.take().is_empty());
}

#[test]
fn every_command_bumps_the_version_once() {
    let mut p = two_players();
    let before = p.world.version();
    p.world.command(p.bob, "look").unwrap();
    let _ = p.world.command(p.bob, "nonsense");
    assert_eq!(p.world.version(), before + 2);
}
