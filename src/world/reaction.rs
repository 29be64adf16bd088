//! Reaction scheduling.
//!
//! A thing with no listener reacts to a descripton through its
//! `react_<event>` template. Each thing reacts at most once per tick: a later
//! trigger in the same tick is parked in the pending map (last one wins) and
//! runs when the next tick drains it. Checks (descriptons whose reactions
//! can veto an action) are answered at once instead, since their verdict is
//! needed before the action goes ahead.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, trace, warn};
use serde::Serialize;

use crate::world::arena::World;
use crate::world::command::CommandContext;
use crate::world::descripton::EventInfo;
use crate::world::errors::WorldError;
use crate::world::types::{reaction_prop, ThingId, PROP_ADMIN, PROP_TICKING};

/// Event delivered to tick subscribers.
pub const TICK_EVENT: &str = "tick";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub reactions: u64,
    pub deferred: u64,
    /// Pending triggers replaced by a later one before they ran.
    pub superseded: u64,
}

#[derive(Debug, Default)]
pub struct ReactionScheduler {
    tick: u64,
    reacted: HashSet<ThingId>,
    pending: BTreeMap<ThingId, EventInfo>,
    /// Things currently deciding a check.
    checking: HashSet<ThingId>,
    subscribers: BTreeSet<ThingId>,
    stats: SchedulerStats,
}

impl ReactionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: ThingId) -> bool {
        self.subscribers.insert(id)
    }

    pub fn unsubscribe(&mut self, id: ThingId) -> bool {
        self.subscribers.remove(&id)
    }

    /// Drop everything known about a toasted thing.
    pub fn forget(&mut self, id: ThingId) {
        self.subscribers.remove(&id);
        self.pending.remove(&id);
        self.reacted.remove(&id);
        self.checking.remove(&id);
    }

    pub fn is_subscribed(&self, id: ThingId) -> bool {
        self.subscribers.contains(&id)
    }

    pub fn subscribers(&self) -> Vec<ThingId> {
        self.subscribers.iter().copied().collect()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Claim this tick's reaction for `id`, or park `info` for the next tick.
    fn try_begin(&mut self, id: ThingId, info: &EventInfo) -> bool {
        if self.reacted.insert(id) {
            self.stats.reactions += 1;
            return true;
        }
        self.stats.deferred += 1;
        if self.pending.insert(id, info.clone()).is_some() {
            self.stats.superseded += 1;
        }
        false
    }

    fn has_reacted(&self, id: ThingId) -> bool {
        self.reacted.contains(&id)
    }

    /// Start a new tick and hand back what was deferred during the last one.
    fn advance(&mut self) -> BTreeMap<ThingId, EventInfo> {
        self.tick += 1;
        self.stats.ticks += 1;
        self.reacted.clear();
        std::mem::take(&mut self.pending)
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickOutcome {
    pub tick: u64,
    pub ran: usize,
    pub failed: usize,
    /// Reactions parked for the next tick while this one ran.
    pub pending: usize,
}

impl World {
    /// Run `id`'s reaction to `info`, if it has one. A thing that already
    /// reacted this tick is deferred instead.
    pub fn react(&mut self, id: ThingId, info: &EventInfo) -> Result<(), WorldError> {
        let prop = reaction_prop(&info.event);
        let Some(template) = self.choose_text(id, &[prop.as_str()]) else {
            return Ok(());
        };
        if !self.scheduler.try_begin(id, info) {
            debug!("%{} already reacted this tick; '{}' deferred", id, info.event);
            return Ok(());
        }
        self.run_reaction(id, info.clone(), &prop, &template)
    }

    /// Run `id`'s reaction to a check right away, whether or not it reacted
    /// earlier this tick. A thing already deciding a check does not answer a
    /// nested one.
    pub fn react_to_check(&mut self, id: ThingId, info: &EventInfo) -> Result<(), WorldError> {
        let prop = reaction_prop(&info.event);
        let Some(template) = self.choose_text(id, &[prop.as_str()]) else {
            return Ok(());
        };
        if !self.scheduler.checking.insert(id) {
            debug!("%{} is already deciding a check; '{}' passes", id, info.event);
            return Ok(());
        }
        self.scheduler.reacted.insert(id);
        self.scheduler.stats.reactions += 1;
        let result = self.run_reaction(id, info.clone(), &prop, &template);
        self.scheduler.checking.remove(&id);
        result
    }

    fn run_reaction(
        &mut self,
        id: ThingId,
        info: EventInfo,
        word: &str,
        template: &str,
    ) -> Result<(), WorldError> {
        trace!("%{} reacts to '{}' from %{}", id, info.event, info.source);
        let mut args = Vec::with_capacity(info.args.len() + 1);
        args.push(info.event.clone());
        args.extend(info.args.iter().cloned());
        let admin = self.flag(id, PROP_ADMIN);
        let mut ctx = CommandContext::for_reaction(id, info, admin);
        self.run_template(&mut ctx, id, word, template, &args)
    }

    /// Advance the clock one tick: drain deferred reactions, then give every
    /// subscriber its tick reaction. Failures are logged, never propagated.
    pub fn tick(&mut self) -> Result<TickOutcome, WorldError> {
        self.update(|w| {
            let deferred = w.scheduler.advance();
            let mut outcome = TickOutcome {
                tick: w.scheduler.current_tick(),
                ..TickOutcome::default()
            };
            let ticking = w
                .scheduler
                .subscribers()
                .into_iter()
                .map(|id| (id, EventInfo::new(id, TICK_EVENT), true));
            let work: Vec<(ThingId, EventInfo, bool)> = deferred
                .into_iter()
                .map(|(id, info)| (id, info, false))
                .chain(ticking)
                .collect();
            for (id, info, is_tick) in work {
                if !w.contains(id) {
                    continue;
                }
                let prop = reaction_prop(&info.event);
                let Some(template) = w.choose_text(id, &[prop.as_str()]) else {
                    continue;
                };
                // the next tick brings a fresh tick event anyway
                if is_tick && w.scheduler.has_reacted(id) {
                    trace!("%{} already reacted in tick {}; tick event dropped", id, outcome.tick);
                    continue;
                }
                if !w.scheduler.try_begin(id, &info) {
                    continue;
                }
                match w.run_reaction(id, info, &prop, &template) {
                    Ok(()) => outcome.ran += 1,
                    Err(e) if e.is_event_failure() => outcome.ran += 1,
                    Err(e) => {
                        warn!("tick {}: reaction of %{} failed: {}", outcome.tick, id, e);
                        outcome.failed += 1;
                    }
                }
            }
            outcome.pending = w.scheduler.pending_count();
            Ok(outcome)
        })
    }

    /// Subscribe `id` to tick events; the subscription persists.
    pub fn subscribe_ticks(&mut self, id: ThingId) -> Result<(), WorldError> {
        self.set_prop(id, PROP_TICKING, true)?;
        self.scheduler.subscribe(id);
        Ok(())
    }

    pub fn unsubscribe_ticks(&mut self, id: ThingId) -> Result<(), WorldError> {
        self.unset_prop(id, PROP_TICKING)?;
        self.scheduler.unsubscribe(id);
        Ok(())
    }

    pub fn scheduler(&self) -> &ReactionScheduler {
        &self.scheduler
    }

    pub fn clock_running(&self) -> bool {
        self.clock_running
    }

    pub fn set_clock_running(&mut self, running: bool) {
        self.clock_running = running;
    }

    pub fn clock_interval_ms(&self) -> u64 {
        self.info.clock_interval_ms
    }

    pub fn set_clock_interval_ms(&mut self, ms: u64) {
        let ms = ms.max(1);
        if self.info.clock_interval_ms != ms {
            self.info.clock_interval_ms = ms;
            self.info_dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::descripton::Descripton;

    fn counter_world() -> (World, ThingId, ThingId) {
        let mut world = World::in_memory("react").unwrap();
        let lobby = world.lobby();
        let bell = world.create("bell", "").unwrap();
        world.set_location(bell, lobby).unwrap();
        world
            .set_prop(bell, "react_ring", "!set($this, \"rings\", prop($this, \"rings\") + 1)")
            .unwrap();
        world.set_prop(bell, "rings", 0i64).unwrap();
        let ringer = world.create("ringer", "").unwrap();
        world.set_location(ringer, lobby).unwrap();
        (world, bell, ringer)
    }

    #[test]
    fn second_trigger_in_a_tick_is_deferred() {
        let (mut world, bell, ringer) = counter_world();
        let lobby = world.lobby();
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        assert_eq!(world.choose_number(bell, &["rings"]), Some(1));
        assert_eq!(world.scheduler().pending_count(), 1);

        let outcome = world.tick().unwrap();
        assert_eq!(outcome.ran, 1);
        assert_eq!(outcome.pending, 0);
        assert_eq!(world.choose_number(bell, &["rings"]), Some(2));
    }

    #[test]
    fn later_trigger_replaces_pending_one() {
        let (mut world, bell, ringer) = counter_world();
        world.set_prop(bell, "react_ring", "@set %this last $1").unwrap();
        let lobby = world.lobby();
        for word in ["first", "second", "third"] {
            let desc = Descripton::new(ringer, "ring").with_args(vec![word.to_string()]);
            world.emit(lobby, desc, &[]).unwrap();
        }
        assert_eq!(world.choose_text(bell, &["last"]).as_deref(), Some("first"));
        assert_eq!(world.scheduler().stats().superseded, 1);
        world.tick().unwrap();
        assert_eq!(world.choose_text(bell, &["last"]).as_deref(), Some("third"));
    }

    #[test]
    fn subscribers_get_tick_events() {
        let (mut world, bell, _) = counter_world();
        world
            .set_prop(bell, "react_tick", "!set($this, \"rings\", prop($this, \"rings\") + 1)")
            .unwrap();
        world.subscribe_ticks(bell).unwrap();
        world.tick().unwrap();
        world.tick().unwrap();
        assert_eq!(world.choose_number(bell, &["rings"]), Some(2));
        world.unsubscribe_ticks(bell).unwrap();
        world.tick().unwrap();
        assert_eq!(world.choose_number(bell, &["rings"]), Some(2));
        assert_eq!(world.scheduler().current_tick(), 3);
    }

    #[test]
    fn a_subscriber_with_a_deferred_reaction_drains() {
        let (mut world, bell, ringer) = counter_world();
        world.set_prop(bell, "ticks", 0i64).unwrap();
        world
            .set_prop(bell, "react_tick", "!set($this, \"ticks\", prop($this, \"ticks\") + 1)")
            .unwrap();
        world.subscribe_ticks(bell).unwrap();
        let lobby = world.lobby();
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        assert_eq!(world.scheduler().pending_count(), 1);

        // the deferred ring takes this tick's reaction; the tick event is dropped
        let outcome = world.tick().unwrap();
        assert_eq!(outcome.ran, 1);
        assert_eq!(outcome.pending, 0);
        assert_eq!(world.choose_number(bell, &["rings"]), Some(2));
        assert_eq!(world.choose_number(bell, &["ticks"]), Some(0));

        for _ in 0..3 {
            assert_eq!(world.tick().unwrap().pending, 0);
        }
        assert_eq!(world.choose_number(bell, &["ticks"]), Some(3));
    }

    #[test]
    fn checks_are_answered_even_after_reacting() {
        let (mut world, bell, ringer) = counter_world();
        let lobby = world.lobby();
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        world.set_prop(bell, "react_take", "@fail The bell is bolted down.").unwrap();

        for _ in 0..2 {
            let passed = world
                .emit(bell, Descripton::new(ringer, "take").as_check(), &[ringer])
                .unwrap();
            assert!(!passed);
        }
        assert_eq!(world.scheduler().pending_count(), 0);

        // an ordinary event in the same tick still waits
        world.emit(lobby, Descripton::new(ringer, "ring"), &[]).unwrap();
        assert_eq!(world.scheduler().pending_count(), 1);
    }

    #[test]
    fn things_do_not_react_to_their_own_events() {
        let (mut world, bell, _) = counter_world();
        let lobby = world.lobby();
        world.emit(lobby, Descripton::new(bell, "ring"), &[]).unwrap();
        assert_eq!(world.choose_number(bell, &["rings"]), Some(0));
    }
}
