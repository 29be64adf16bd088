/// Integration tests for the tick clock task: commands serialized through the
/// handle, periodic ticks for subscribers, runtime start/stop and rate changes.
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use textcraft::world::{
    start_clock, ClockConfig, Descripton, OutputBuffer, ThingId, World, WorldError, PROTO_PERSON,
};

const COUNTER: &str = "!set($this, \"count\", prop($this, \"count\") + 1)";

/// World with a ticking counter in the lobby, clocked every 20 ms.
fn counting_world() -> (World, ThingId) {
    let mut world = World::in_memory("clock").unwrap();
    let counter = world.create("counter", "").unwrap();
    world.set_location(counter, world.lobby()).unwrap();
    world.set_prop(counter, "count", 0i64).unwrap();
    world.set_prop(counter, "react_tick", COUNTER).unwrap();
    world.subscribe_ticks(counter).unwrap();
    world.set_clock_interval_ms(20);
    (world, counter)
}

fn count_of(world: &World, id: ThingId) -> i64 {
    world.choose_number(id, &["count"]).unwrap_or_default()
}

#[tokio::test]
async fn subscribers_tick_while_the_clock_runs() {
    let (world, counter) = counting_world();
    let handle = start_clock(world, ClockConfig::default());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let counted = handle.with(move |w| count_of(w, counter)).await.unwrap();
    assert!(counted >= 3, "only {} ticks in 200ms", counted);

    let stats = handle.stats().await.unwrap();
    assert!(stats.running);
    assert_eq!(stats.interval_ms, 20);
    assert!(stats.tick as i64 >= counted);

    let world = assert_ok!(handle.shutdown().await);
    assert!(count_of(&world, counter) >= counted);
}

#[tokio::test]
async fn stopping_and_restarting_the_clock() {
    let (world, counter) = counting_world();
    let handle = start_clock(world, ClockConfig::default());
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_ok!(handle.stop().await);
    let stopped_at = handle.with(move |w| count_of(w, counter)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let still = handle.with(move |w| count_of(w, counter)).await.unwrap();
    assert_eq!(stopped_at, still, "no ticks while stopped");

    // manual ticks still work on a stopped clock
    let outcome = handle.tick().await.unwrap();
    assert_eq!(outcome.ran, 1);

    assert_ok!(handle.start().await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let resumed = handle.with(move |w| count_of(w, counter)).await.unwrap();
    assert!(resumed > still + 1, "clock did not resume: {} -> {}", still, resumed);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn clock_rate_changes_at_runtime() {
    let (world, counter) = counting_world();
    let handle = start_clock(world, ClockConfig::default());

    handle.set_interval(10_000).await.unwrap();
    let before = handle.with(move |w| count_of(w, counter)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let after = handle.with(move |w| count_of(w, counter)).await.unwrap();
    assert_eq!(before, after, "slow clock should not have ticked yet");
    assert_eq!(handle.stats().await.unwrap().interval_ms, 10_000);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn commands_run_on_the_clock_task() {
    let mut world = World::in_memory("clock").unwrap();
    let person = world.prototype(PROTO_PERSON);
    let alice = world.create_from(person, "alice", "").unwrap();
    world.set_location(alice, world.lobby()).unwrap();
    let out = OutputBuffer::new();
    world.attach_listener(alice, Box::new(out.clone()));

    let handle = start_clock(
        world,
        ClockConfig {
            enabled: false,
            ..ClockConfig::default()
        },
    );
    handle.command(alice, "say anyone here?").await.unwrap();
    assert_eq!(out.take(), vec!["You say, \"anyone here?\".".to_string()]);

    let err = assert_err!(handle.command(alice, "fly").await);
    assert!(matches!(err, WorldError::UnknownCommand(_)));
    assert_eq!(out.take(), vec!["unknown command: fly".to_string()]);

    let version = handle.stats().await.unwrap().version;
    assert_eq!(version, 2);
    handle.shutdown().await.unwrap();
    assert_err!(handle.stats().await, "a shut down clock answers nothing");
}

#[tokio::test]
async fn deferred_reactions_drain_on_the_next_tick() {
    let mut world = World::in_memory("clock").unwrap();
    let bell = world.create("bell", "").unwrap();
    world.set_location(bell, world.lobby()).unwrap();
    world.set_prop(bell, "count", 0i64).unwrap();
    world.set_prop(bell, "react_ring", COUNTER).unwrap();
    let ringer = world.create("ringer", "").unwrap();
    world.set_location(ringer, world.lobby()).unwrap();

    let handle = start_clock(
        world,
        ClockConfig {
            enabled: false,
            ..ClockConfig::default()
        },
    );
    let pending = handle
        .with(move |w| {
            let lobby = w.lobby();
            for _ in 0..3 {
                w.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
            }
            w.scheduler().pending_count()
        })
        .await
        .unwrap();
    assert_eq!(pending, 1, "later rings collapse into one pending reaction");

    let outcome = handle.tick().await.unwrap();
    assert_eq!(outcome.ran, 1);
    assert_eq!(outcome.pending, 0);
    let world = handle.shutdown().await.unwrap();
    assert_eq!(count_of(&world, bell), 2);
    assert_eq!(world.scheduler().stats().superseded, 1);
}
