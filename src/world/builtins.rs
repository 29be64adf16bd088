//! Built-in commands.
//!
//! Only a small catalog: enough to move around, handle things, talk, and
//! build and script the world. Everything else is meant to be written as
//! per-thing templates.
//!
//! Commands that announce something split the work in two emissions: a silent
//! one with reactions, which any reacting thing can fail with `@fail`, and a
//! formatted announcement once the change is made.

use std::collections::BTreeSet;

use log::info;

use crate::world::arena::{World, PROTO_ROOM};
use crate::world::command::{CommandContext, CommandRegistry, CommandSpec, ParsedCommand};
use crate::world::descripton::Descripton;
use crate::world::errors::WorldError;
use crate::world::format::{render, tidy_lines, FormatContext};
use crate::world::script::{validate_script, Value};
use crate::world::types::{
    command_prop, reaction_prop, PropValue, ThingId, PROP_DESCRIPTION, PROP_EXAMINE_FORMAT,
    PROP_LOOK_FORMAT,
};

type CmdResult = Result<(), WorldError>;

const SAY_FORMAT: &str = "$forme You say, \"$arg\". $forothers $This says, \"$arg\".";
const EMOTE_FORMAT: &str = "$forme You emote: $arg $forothers $This $arg";
const GET_FORMAT: &str = "$forme You pick up $arg. $forothers $This picks up $arg.";
const DROP_FORMAT: &str = "$forme You drop $arg. $forothers $This drops $arg.";
const LEAVE_FORMAT: &str = "$This goes $arg.";
const ARRIVE_FORMAT: &str = "$This arrives.";

const THEN: &str = " @then ";
const ELSE: &str = " @else ";
const OTHERS: &str = " @others ";

/// Add every built-in to `registry`.
pub fn register_all(registry: &mut CommandRegistry) {
    let specs: [(&'static str, usize, bool, &'static str, crate::world::command::Handler); 30] = [
        ("look", 0, false, "look [THING] - describe your surroundings or a thing", look),
        ("examine", 1, false, "examine THING - look closely at a thing", examine),
        ("go", 1, false, "go EXIT - leave through an exit", go),
        ("get", 1, false, "get THING - pick something up", get),
        ("drop", 1, false, "drop THING - put something down", drop_thing),
        ("inventory", 0, false, "inventory - list what you carry", inventory),
        ("say", 1, false, "say TEXT - talk to the room ('TEXT works too)", say),
        ("emote", 1, false, "emote TEXT - act something out (:TEXT works too)", emote),
        ("help", 0, false, "help - list commands", help),
        ("@create", 2, true, "@create PROTO NAME - make a new thing", create),
        ("@set", 3, false, "@set THING PROP VALUE - set a property", set),
        ("@unset", 2, false, "@unset THING PROP - remove a property", unset),
        ("@reproto", 2, true, "@reproto THING PROTO - change a prototype", reproto),
        ("@move", 2, false, "@move THING DEST - relocate a thing", move_thing),
        ("@link", 4, true, "@link ROOM EXIT DEST BACK - join two rooms", link),
        ("@toast", 1, true, "@toast THING - delete a thing and what it holds", toast),
        ("@copy", 1, true, "@copy THING - duplicate a thing and what it holds", copy),
        ("@command", 2, true, "@command THING WORD [TEMPLATE] - define a verb", command_template),
        ("@react", 2, true, "@react THING EVENT [TEMPLATE] - define a reaction", react_template),
        ("@subscribe", 1, true, "@subscribe THING - send tick events to a thing", subscribe),
        ("@unsubscribe", 1, true, "@unsubscribe THING - stop tick events", unsubscribe),
        ("@output", 1, false, "@output TEXT - show formatted text to whoever acted", output),
        ("@emit", 1, false, "@emit TEXT - show formatted text around this thing", emit),
        ("@fail", 1, false, "@fail TEXT [@others TEXT] - refuse the current event", fail),
        ("@if", 3, false, "@if EXPR @then LINE [@else LINE] - conditional", if_then),
        ("@script", 1, false, "@script EXPR - run a script (!EXPR works too)", script),
        ("@tick", 0, true, "@tick - advance the clock by one tick", tick),
        ("@clock", 0, true, "@clock [start|stop|MS] - show or change the clock", clock),
        ("@check", 0, true, "@check - verify the association indices", check),
        ("@who", 0, false, "@who - list connected players", who),
    ];
    for (name, min_args, admin_only, help, handler) in specs {
        registry.register(CommandSpec {
            name,
            min_args,
            admin_only,
            help,
            handler,
        });
    }
}

fn target(world: &World, ctx: &CommandContext, reference: &str) -> Result<ThingId, WorldError> {
    world.resolve_one(&ctx.resolution(), reference)
}

fn found_among(world: &World, candidates: &[ThingId], query: &str) -> Result<ThingId, WorldError> {
    world.match_among(candidates, query).into_result(query)
}

fn require_control(ctx: &CommandContext, id: ThingId) -> CmdResult {
    if ctx.controls(id) {
        Ok(())
    } else {
        Err(WorldError::PermissionDenied(format!("%{} is not yours to change", id)))
    }
}

fn current_room(world: &World, ctx: &CommandContext) -> Result<ThingId, WorldError> {
    world
        .location(ctx.actor)
        .ok_or_else(|| WorldError::InvalidCommand("you are nowhere".into()))
}

/// Where an emission by `id` should start: its location, or the room owning
/// it for links, which live in limbo.
fn origin(world: &World, id: ThingId) -> ThingId {
    world
        .location(id)
        .filter(|l| *l != world.limbo())
        .or_else(|| world.link_owner(id))
        .unwrap_or(id)
}

fn inherits_from(world: &World, id: ThingId, ancestor: Option<ThingId>) -> bool {
    let Some(ancestor) = ancestor else {
        return false;
    };
    let mut current = Some(id);
    for _ in 0..64 {
        match current {
            Some(c) if c == ancestor => return true,
            Some(c) => current = world.get(c).and_then(|t| t.prototype),
            None => return false,
        }
    }
    false
}

/// Render `target`'s `slot` format (or its description) for the actor.
fn describe(world: &World, ctx: &CommandContext, target: ThingId, slot: &str) -> String {
    let template = world
        .choose_text(target, &[slot])
        .or_else(|| world.choose_text(target, &[PROP_DESCRIPTION]))
        .unwrap_or_default();
    let fctx = FormatContext::for_viewer(world, ctx.actor, target)
        .with_actor(ctx.actor)
        .with_result(ctx.result.as_ref());
    tidy_lines(&render(world, &template, &fctx))
}

/// Emit a silent descripton that reacting things may fail.
fn veto(world: &mut World, ctx: &CommandContext, start: ThingId, event: &str, args: &[String]) -> CmdResult {
    let desc = Descripton::new(ctx.actor, event)
        .with_args(args.to_vec())
        .as_check();
    if world.emit(start, desc, &[ctx.actor])? {
        Ok(())
    } else {
        Err(WorldError::EventFailed(event.to_string()))
    }
}

fn announce(world: &mut World, ctx: &CommandContext, start: ThingId, event: &str, format: &str, args: Vec<String>) -> CmdResult {
    let desc = Descripton::new(ctx.actor, event)
        .with_args(args)
        .with_format(format)
        .without_reactions();
    world.emit(start, desc, &[])?;
    Ok(())
}

fn look(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let target = if cmd.args().is_empty() {
        current_room(world, ctx)?
    } else {
        target(world, ctx, &cmd.rest())?
    };
    let text = describe(world, ctx, target, PROP_LOOK_FORMAT);
    world.tell(ctx.actor, &text);
    Ok(())
}

fn examine(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let target = target(world, ctx, &cmd.rest())?;
    let mut text = describe(world, ctx, target, PROP_EXAMINE_FORMAT);
    if ctx.admin {
        if let Some(thing) = world.get(target) {
            let proto = thing
                .prototype
                .map(|p| format!("{} (%{})", world.name_of(p), p))
                .unwrap_or_else(|| "none".into());
            text.push_str(&format!("\n%{} prototype: {}", target, proto));
            for (name, value) in &thing.props {
                text.push_str(&format!("\n  {}: {}", name, value.as_text()));
            }
            for edge in &thing.associations {
                text.push_str(&format!("\n  {} -> %{}", edge.prop, edge.target));
            }
        }
    }
    world.tell(ctx.actor, &text);
    Ok(())
}

fn go(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let here = current_room(world, ctx)?;
    let exit = found_among(world, &world.links(here), &cmd.rest())?;
    let name = world.name_of(exit);
    let dest = world
        .destination(exit)
        .ok_or_else(|| WorldError::InvalidCommand(format!("{} leads nowhere", name)))?;
    let args = vec![name];

    veto(world, ctx, exit, "go", &args)?;
    let leave = Descripton::new(ctx.actor, "leave")
        .with_args(args)
        .with_format(LEAVE_FORMAT);
    world.emit(here, leave, &[ctx.actor])?;
    world.set_location(ctx.actor, dest)?;
    let arrive = Descripton::new(ctx.actor, "arrive").with_format(ARRIVE_FORMAT);
    world.emit(dest, arrive, &[ctx.actor])?;
    world.dispatch(ctx, "look")
}

fn get(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let here = current_room(world, ctx)?;
    let candidates: Vec<ThingId> = world
        .contents(here)
        .into_iter()
        .filter(|id| *id != ctx.actor)
        .collect();
    let item = found_among(world, &candidates, &cmd.rest())?;
    if world.has_listener(item) {
        return Err(WorldError::InvalidCommand(format!(
            "{} would rather stay on the ground",
            world.display_name(item)
        )));
    }
    let args = vec![world.display_name(item)];
    veto(world, ctx, item, "get", &args)?;
    world.set_location(item, ctx.actor)?;
    announce(world, ctx, here, "get", GET_FORMAT, args)
}

fn drop_thing(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let here = current_room(world, ctx)?;
    let item = found_among(world, &world.contents(ctx.actor), &cmd.rest())?;
    let args = vec![world.display_name(item)];
    veto(world, ctx, item, "drop", &args)?;
    world.set_location(item, here)?;
    announce(world, ctx, here, "drop", DROP_FORMAT, args)
}

fn inventory(world: &mut World, ctx: &mut CommandContext, _cmd: &ParsedCommand) -> CmdResult {
    let held: Vec<String> = world
        .contents(ctx.actor)
        .into_iter()
        .map(|id| world.display_name(id))
        .collect();
    let text = if held.is_empty() {
        "You are carrying nothing.".to_string()
    } else {
        format!("You are carrying: {}", held.join(", "))
    };
    world.tell(ctx.actor, &text);
    Ok(())
}

fn say(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let start = origin(world, ctx.actor);
    let desc = Descripton::new(ctx.actor, "say")
        .with_args(vec![cmd.rest()])
        .with_format(SAY_FORMAT);
    world.emit(start, desc, &[])?;
    Ok(())
}

fn emote(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let start = origin(world, ctx.actor);
    let desc = Descripton::new(ctx.actor, "emote")
        .with_args(vec![cmd.rest()])
        .with_format(EMOTE_FORMAT);
    world.emit(start, desc, &[])?;
    Ok(())
}

fn help(world: &mut World, ctx: &mut CommandContext, _cmd: &ParsedCommand) -> CmdResult {
    let lines: Vec<String> = world
        .registry
        .specs()
        .filter(|spec| ctx.admin || !spec.admin_only)
        .map(|spec| spec.help.to_string())
        .collect();
    world.tell(ctx.actor, &lines.join("\n"));
    Ok(())
}

fn create(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let proto_ref = cmd.arg(0).unwrap_or_default();
    let proto = match world.prototype(&proto_ref.to_lowercase()) {
        Some(id) => id,
        None => target(world, ctx, proto_ref)?,
    };
    let name = cmd.rest_from(1);
    let id = world.create_from(Some(proto), &name, "")?;
    if !inherits_from(world, id, world.prototype(PROTO_ROOM)) {
        let place = world.location(ctx.actor).unwrap_or(ctx.actor);
        world.set_location(id, place)?;
    }
    let text = format!("Created {} (%{}).", world.display_name(id), id);
    world.tell(ctx.actor, &text);
    ctx.result = Some(Value::Thing(id));
    Ok(())
}

fn set(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    require_control(ctx, id)?;
    let prop = cmd.arg(1).unwrap_or_default().to_string();
    let value = PropValue::parse(&prop, &cmd.rest_from(2));
    world.set_prop(id, &prop, value)?;
    world.tell(ctx.actor, &format!("Set {} of %{}.", prop, id));
    Ok(())
}

fn unset(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    require_control(ctx, id)?;
    let prop = cmd.arg(1).unwrap_or_default();
    if world.unset_prop(id, prop)?.is_none() {
        return Err(WorldError::NotFound(format!("%{} has no {}", id, prop)));
    }
    world.tell(ctx.actor, &format!("Removed {} from %{}.", prop, id));
    Ok(())
}

fn reproto(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    let proto_ref = cmd.arg(1).unwrap_or_default();
    let proto = match world.prototype(&proto_ref.to_lowercase()) {
        Some(p) => p,
        None => target(world, ctx, proto_ref)?,
    };
    world.set_prototype(id, Some(proto))?;
    world.tell(ctx.actor, &format!("%{} now inherits from %{}.", id, proto));
    Ok(())
}

fn move_thing(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    require_control(ctx, id)?;
    let dest = target(world, ctx, &cmd.rest_from(1))?;
    if world.find_connected(id).contains(&dest) {
        return Err(WorldError::InvalidCommand(format!(
            "{} cannot go inside itself",
            world.display_name(id)
        )));
    }
    world.set_location(id, dest)?;
    world.tell(ctx.actor, &format!("Moved %{} to %{}.", id, dest));
    Ok(())
}

fn link(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let args = cmd.args();
    let from = target(world, ctx, &args[0])?;
    let to = target(world, ctx, &args[2])?;
    let (there, back) = world.link_rooms(from, &args[1], to, &args[3])?;
    world.tell(
        ctx.actor,
        &format!("Linked %{} to %{} (%{} and %{}).", from, to, there, back),
    );
    Ok(())
}

fn toast(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, &cmd.rest())?;
    if world.has_listener(id) {
        return Err(WorldError::PermissionDenied(format!("%{} is someone", id)));
    }
    // connected players are moved out, never toasted
    let doomed: BTreeSet<ThingId> = world
        .find_connected(id)
        .into_iter()
        .filter(|t| !world.has_listener(*t))
        .collect();
    let count = doomed.len();
    world.toast(&doomed)?;
    info!(target: "audit", "%{} toasted %{} ({} things)", ctx.actor, id, count);
    world.tell(ctx.actor, &format!("Toasted %{} ({} thing(s)).", id, count));
    Ok(())
}

fn copy(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, &cmd.rest())?;
    let copied = world.copy(id)?;
    world.tell(ctx.actor, &format!("Copied %{} to %{}.", id, copied));
    ctx.result = Some(Value::Thing(copied));
    Ok(())
}

/// Store or clear a template property after validating scripts.
fn store_template(world: &mut World, ctx: &mut CommandContext, id: ThingId, prop: &str, template: String) -> CmdResult {
    if template.is_empty() {
        world.unset_prop(id, prop)?;
        world.tell(ctx.actor, &format!("Cleared {} on %{}.", prop, id));
        return Ok(());
    }
    if let Some(source) = template.trim_start().strip_prefix('!') {
        validate_script(source.trim(), &world.limits())?;
    }
    // templates use literal newlines; `\n` typed on one line splits them
    let template = template.replace("\\n", "\n");
    world.set_prop(id, prop, PropValue::Text(template))?;
    world.tell(ctx.actor, &format!("Set {} on %{}.", prop, id));
    Ok(())
}

fn command_template(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    let prop = command_prop(cmd.arg(1).unwrap_or_default());
    store_template(world, ctx, id, &prop, cmd.rest_from(2))
}

fn react_template(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, cmd.arg(0).unwrap_or_default())?;
    let prop = reaction_prop(cmd.arg(1).unwrap_or_default());
    store_template(world, ctx, id, &prop, cmd.rest_from(2))
}

fn subscribe(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, &cmd.rest())?;
    world.subscribe_ticks(id)?;
    world.tell(ctx.actor, &format!("%{} now receives ticks.", id));
    Ok(())
}

fn unsubscribe(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let id = target(world, ctx, &cmd.rest())?;
    world.unsubscribe_ticks(id)?;
    world.tell(ctx.actor, &format!("%{} no longer receives ticks.", id));
    Ok(())
}

fn output(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    world.output_for(ctx, &cmd.rest());
    Ok(())
}

fn emit(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let start = origin(world, ctx.this);
    let args = ctx.event.as_ref().map(|e| e.args.clone()).unwrap_or_default();
    let desc = Descripton::new(ctx.this, "emit")
        .with_args(args)
        .with_format(cmd.rest())
        .without_reactions();
    world.emit(start, desc, &[])?;
    Ok(())
}

fn fail(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let text = cmd.rest();
    let (for_actor, for_others) = match text.split_once(OTHERS) {
        Some((mine, theirs)) => (mine.trim().to_string(), Some(theirs.trim().to_string())),
        None => (text, None),
    };
    let who = ctx.event_source();
    let (event, args) = match &ctx.event {
        Some(e) => (e.event.clone(), e.args.clone()),
        None => ("fail".to_string(), Vec::new()),
    };
    let start = origin(world, who);
    Err(world.emit_fail(who, Some(start), &event, &for_actor, for_others.as_deref(), &args))
}

fn if_then(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let text = cmd.rest();
    let (expr, branches) = text
        .split_once(THEN)
        .ok_or_else(|| WorldError::InvalidCommand("@if needs @then".into()))?;
    let (then_line, else_line) = match branches.split_once(ELSE) {
        Some((t, e)) => (t.trim(), Some(e.trim())),
        None => (branches.trim(), None),
    };
    let owner = ctx.this;
    let previous = ctx.result.clone();
    let value = world.run_script_for(ctx, owner, "@if", expr.trim(), cmd.words())?;
    let line = if value.is_truthy() {
        ctx.result = Some(value);
        then_line
    } else {
        ctx.result = previous;
        match else_line {
            Some(line) => line,
            None => return Ok(()),
        }
    };
    let mut inner = ctx.deeper();
    world.dispatch(&mut inner, line)?;
    if inner.result.is_some() {
        ctx.result = inner.result;
    }
    Ok(())
}

fn script(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    let owner = ctx.this;
    world.run_script_for(ctx, owner, "@script", &cmd.rest(), cmd.words())?;
    Ok(())
}

fn tick(world: &mut World, ctx: &mut CommandContext, _cmd: &ParsedCommand) -> CmdResult {
    let outcome = world.tick()?;
    world.tell(
        ctx.actor,
        &format!(
            "Tick {}: {} reaction(s), {} failed, {} pending.",
            outcome.tick, outcome.ran, outcome.failed, outcome.pending
        ),
    );
    Ok(())
}

fn clock(world: &mut World, ctx: &mut CommandContext, cmd: &ParsedCommand) -> CmdResult {
    match cmd.arg(0) {
        None => {}
        Some("start") => world.set_clock_running(true),
        Some("stop") => world.set_clock_running(false),
        Some(ms) => {
            let ms: u64 = ms
                .parse()
                .map_err(|_| WorldError::InvalidCommand(format!("not a clock rate: {}", ms)))?;
            if ms == 0 {
                return Err(WorldError::InvalidCommand("clock rate must be positive".into()));
            }
            world.set_clock_interval_ms(ms);
        }
    }
    let state = if world.clock_running() { "running" } else { "stopped" };
    world.tell(
        ctx.actor,
        &format!(
            "Clock {} every {} ms at tick {}.",
            state,
            world.clock_interval_ms(),
            world.scheduler().current_tick()
        ),
    );
    Ok(())
}

fn check(world: &mut World, ctx: &mut CommandContext, _cmd: &ParsedCommand) -> CmdResult {
    let text = if world.check_indices() {
        format!("Indices consistent across {} things.", world.thing_count())
    } else {
        "Index mismatch: incremental indices differ from a rebuild.".to_string()
    };
    world.tell(ctx.actor, &text);
    Ok(())
}

fn who(world: &mut World, ctx: &mut CommandContext, _cmd: &ParsedCommand) -> CmdResult {
    let mut names: Vec<String> = world
        .listeners
        .keys()
        .filter(|id| world.contains(**id))
        .map(|id| world.display_name(*id))
        .collect();
    names.sort();
    world.tell(ctx.actor, &format!("Connected: {}", names.join(", ")));
    Ok(())
}
