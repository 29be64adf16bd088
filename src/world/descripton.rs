//! Descriptons: perceivable events travelling through the world.
//!
//! One propagation pass answers both "who hears this" and "who reacts to
//! this". Things with a listener get the event rendered as text; everything
//! else is handed to the reaction scheduler.
//!
//! Propagation goes inward to contents (and optionally through links), and
//! outward to the thing's location unless the thing is closed. Every thing is
//! visited at most once per pass.

use std::collections::HashSet;
use std::fmt;

use log::{debug, warn};

use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::format::{render, FormatContext};
use crate::world::types::ThingId;

/// The parts of a descripton that reactions and format strings can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub source: ThingId,
    pub event: String,
    pub args: Vec<String>,
}

impl EventInfo {
    pub fn new(source: ThingId, event: &str) -> Self {
        Self {
            source,
            event: event.to_string(),
            args: Vec::new(),
        }
    }
}

/// Runs once after propagation, depending on how it ended.
pub type Hook = Box<dyn FnOnce(&mut World, &EventInfo) -> Result<(), WorldError>>;

pub struct Descripton {
    pub source: ThingId,
    pub event: String,
    pub args: Vec<String>,
    pub failed: bool,
    /// Things that will not be visited; seeded from the exclude list.
    pub visited: HashSet<ThingId>,
    /// Text rendered for each listener; `None` means silent.
    pub format: Option<String>,
    pub visit_links: bool,
    pub ignore_closed: bool,
    /// Whether listener-less things react.
    pub reactions: bool,
    /// Reactions decide the outcome now and skip the once-per-tick bound.
    pub checked: bool,
    on_success: Option<Hook>,
    on_fail: Option<Hook>,
}

impl fmt::Debug for Descripton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descripton")
            .field("source", &self.source)
            .field("event", &self.event)
            .field("args", &self.args)
            .field("failed", &self.failed)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Descripton {
    pub fn new(source: ThingId, event: &str) -> Self {
        Self {
            source,
            event: event.to_string(),
            args: Vec::new(),
            failed: false,
            visited: HashSet::new(),
            format: None,
            visit_links: false,
            ignore_closed: false,
            reactions: true,
            checked: false,
            on_success: None,
            on_fail: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn visiting_links(mut self) -> Self {
        self.visit_links = true;
        self
    }

    pub fn ignoring_closed(mut self) -> Self {
        self.ignore_closed = true;
        self
    }

    pub fn without_reactions(mut self) -> Self {
        self.reactions = false;
        self
    }

    /// Make this a check whose reactions may fail it: they run immediately,
    /// even for things that already reacted this tick.
    pub fn as_check(mut self) -> Self {
        self.checked = true;
        self
    }

    pub fn on_success(
        mut self,
        hook: impl FnOnce(&mut World, &EventInfo) -> Result<(), WorldError> + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_fail(
        mut self,
        hook: impl FnOnce(&mut World, &EventInfo) -> Result<(), WorldError> + 'static,
    ) -> Self {
        self.on_fail = Some(Box::new(hook));
        self
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn info(&self) -> EventInfo {
        EventInfo {
            source: self.source,
            event: self.event.clone(),
            args: self.args.clone(),
        }
    }
}

impl World {
    /// Propagate `desc` from `start`. Returns `Ok(true)` when nothing failed it.
    pub fn emit(
        &mut self,
        start: ThingId,
        mut desc: Descripton,
        exclude: &[ThingId],
    ) -> Result<bool, WorldError> {
        let info = desc.info();
        let mut visited = std::mem::take(&mut desc.visited);
        visited.extend(exclude.iter().copied());
        let format = desc.format.take();
        let reactions = desc.reactions;
        let checked = desc.checked;
        let mut failed = desc.failed;

        self.propagate(
            start,
            &mut visited,
            desc.visit_links,
            desc.ignore_closed,
            &mut |w: &mut World, id: ThingId| match w.visit_thing(id, &info, format.as_deref(), reactions, checked) {
                Ok(()) => Ok(true),
                Err(e) if e.is_event_failure() => {
                    debug!("%{} failed '{}'", id, info.event);
                    failed = true;
                    Ok(false)
                }
                Err(e) => Err(e),
            },
        )?;

        desc.failed = failed;
        let hook = if failed {
            desc.on_fail.take()
        } else {
            desc.on_success.take()
        };
        if let Some(hook) = hook {
            hook(self, &info)?;
        }
        Ok(!failed)
    }

    /// Walk from `start`, calling `visit` on every thing reached. Contents are
    /// entered unconditionally; links (and through open links, their
    /// destinations) when `visit_links`; the location when the thing is not
    /// closed or `ignore_closed` is set. Limbo is never entered from below.
    /// A `visit` returning `false` stops the walk, and `propagate` returns
    /// `false` as well.
    pub fn propagate(
        &mut self,
        start: ThingId,
        visited: &mut HashSet<ThingId>,
        visit_links: bool,
        ignore_closed: bool,
        visit: &mut dyn FnMut(&mut World, ThingId) -> Result<bool, WorldError>,
    ) -> Result<bool, WorldError> {
        let limbo = self.limbo();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !self.contains(id) || !visited.insert(id) {
                continue;
            }
            if !visit(self, id)? {
                return Ok(false);
            }
            let mut next = self.contents(id);
            if visit_links {
                for link in self.links(id) {
                    next.push(link);
                    if !self.is_closed(link) {
                        next.extend(self.destination(link));
                    }
                }
            }
            if ignore_closed || !self.is_closed(id) {
                if let Some(location) = self.location(id).filter(|l| *l != limbo) {
                    next.push(location);
                }
            }
            stack.extend(next.into_iter().rev().filter(|n| !visited.contains(n)));
        }
        Ok(true)
    }

    /// Deliver a failure: `for_actor` straight to `actor`, `for_others` to
    /// everyone around `start`. Returns the error that unwinds the command.
    pub fn emit_fail(
        &mut self,
        actor: ThingId,
        start: Option<ThingId>,
        event: &str,
        for_actor: &str,
        for_others: Option<&str>,
        args: &[String],
    ) -> WorldError {
        let info = EventInfo {
            source: actor,
            event: event.to_string(),
            args: args.to_vec(),
        };
        if !for_actor.is_empty() {
            let text = {
                let ctx = FormatContext::for_viewer(self, actor, actor)
                    .with_actor(actor)
                    .with_event(&info)
                    .with_args(args);
                render(self, for_actor, &ctx)
            };
            self.tell(actor, &text);
        }
        if let (Some(start), Some(others)) = (start, for_others) {
            let mut desc = Descripton::new(actor, event)
                .with_args(args.to_vec())
                .with_format(others)
                .without_reactions();
            desc.fail();
            if let Err(e) = self.emit(start, desc, &[actor]) {
                warn!("could not deliver failure of '{}': {}", event, e);
            }
        }
        WorldError::EventFailed(event.to_string())
    }

    fn visit_thing(
        &mut self,
        id: ThingId,
        info: &EventInfo,
        format: Option<&str>,
        reactions: bool,
        checked: bool,
    ) -> Result<(), WorldError> {
        if self.has_listener(id) {
            if let Some(format) = format {
                let text = {
                    let ctx = FormatContext::for_viewer(self, id, info.source)
                        .with_actor(info.source)
                        .with_event(info)
                        .with_args(&info.args);
                    render(self, format, &ctx)
                };
                self.tell(id, &text);
            }
            return Ok(());
        }
        if !reactions || id == info.source {
            return Ok(());
        }
        let reacted = if checked {
            self.react_to_check(id, info)
        } else {
            self.react(id, info)
        };
        match reacted {
            Err(e) if !e.is_event_failure() => {
                warn!("reaction of %{} to '{}' failed: {}", id, info.event, e);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::listener::OutputBuffer;
    use crate::world::types::PROP_CLOSED;

    #[test]
    fn propagate_visits_each_thing_once_even_with_cycles() {
        let mut world = World::in_memory("prop").unwrap();
        let a = world.create("a", "").unwrap();
        let b = world.create("b", "").unwrap();
        let c = world.create("c", "").unwrap();
        world.set_location(a, b).unwrap();
        world.set_location(b, a).unwrap();
        world.set_location(c, a).unwrap();

        let mut seen = Vec::new();
        let mut visited = HashSet::new();
        let finished = world
            .propagate(a, &mut visited, true, true, &mut |_w: &mut World, id: ThingId| {
                seen.push(id);
                Ok(true)
            })
            .unwrap();
        assert!(finished);
        seen.sort_unstable();
        assert_eq!(seen, vec![a, b, c]);
    }

    #[test]
    fn closed_containers_stop_outward_bubbling() {
        let mut world = World::in_memory("prop").unwrap();
        let lobby = world.lobby();
        let listener = world.create("bob", "").unwrap();
        world.set_location(listener, lobby).unwrap();
        let out = OutputBuffer::new();
        world.attach_listener(listener, Box::new(out.clone()));

        let chest = world.create("chest", "").unwrap();
        world.set_location(chest, lobby).unwrap();
        let mouse = world.create("mouse", "").unwrap();
        world.set_location(mouse, chest).unwrap();

        let squeak = || Descripton::new(mouse, "squeak").with_format("$This squeaks.");
        world.emit(mouse, squeak(), &[]).unwrap();
        assert_eq!(out.take(), vec!["A mouse squeaks.".to_string()]);

        world.set_prop(chest, PROP_CLOSED, true).unwrap();
        world.emit(mouse, squeak(), &[]).unwrap();
        assert!(out.take().is_empty());

        world.emit(mouse, squeak().ignoring_closed(), &[]).unwrap();
        assert_eq!(out.take().len(), 1);
    }

    #[test]
    fn links_carry_events_to_destinations() {
        let mut world = World::in_memory("prop").unwrap();
        let lobby = world.lobby();
        let room = world.prototype("room").unwrap();
        let garden = world.create_from(Some(room), "garden", "").unwrap();
        world.link_rooms(lobby, "north", garden, "south").unwrap();
        let gardener = world.create("gardener", "").unwrap();
        world.set_location(gardener, garden).unwrap();
        let out = OutputBuffer::new();
        world.attach_listener(gardener, Box::new(out.clone()));

        let shout = Descripton::new(lobby, "shout").with_format("A shout echoes.");
        world.emit(lobby, shout, &[]).unwrap();
        assert!(out.take().is_empty());

        let shout = Descripton::new(lobby, "shout")
            .with_format("A shout echoes.")
            .visiting_links();
        world.emit(lobby, shout, &[]).unwrap();
        assert_eq!(out.take(), vec!["A shout echoes.".to_string()]);
    }

    #[test]
    fn emit_fail_messages_actor_and_others() {
        let mut world = World::in_memory("prop").unwrap();
        let lobby = world.lobby();
        let person = world.prototype("person");
        let alice = world.create_from(person, "alice", "").unwrap();
        let bob = world.create_from(person, "bob", "").unwrap();
        for who in [alice, bob] {
            world.set_location(who, lobby).unwrap();
        }
        let alice_out = OutputBuffer::new();
        let bob_out = OutputBuffer::new();
        world.attach_listener(alice, Box::new(alice_out.clone()));
        world.attach_listener(bob, Box::new(bob_out.clone()));

        let err = world.emit_fail(
            alice,
            Some(lobby),
            "go",
            "You can't.",
            Some("$This tries and fails."),
            &[],
        );
        assert!(err.is_event_failure());
        assert_eq!(alice_out.take(), vec!["You can't.".to_string()]);
        assert_eq!(bob_out.take(), vec!["Alice tries and fails.".to_string()]);
    }

    #[test]
    fn hooks_follow_outcome() {
        let mut world = World::in_memory("prop").unwrap();
        let lobby = world.lobby();
        let desc = Descripton::new(lobby, "ping").on_success(|w: &mut World, info: &EventInfo| {
            w.set_prop(info.source, "pinged", true)
        });
        assert!(world.emit(lobby, desc, &[]).unwrap());
        assert!(world.flag(lobby, "pinged"));
    }
}
