//! Command dispatch and template substitution.
//!
//! A raw line is normalized (leading shorthand punctuation becomes a command
//! word), tokenized with quote awareness, and looked up in the registry.
//! Words the registry does not know are searched for as per-thing command
//! templates, in this order: what the actor holds, links the actor owns, the
//! actor's location, the location's links, then globally advertising things.
//! A template expands into lines that re-enter dispatch one level deeper.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::logutil::escape_log;
use crate::world::arena::World;
use crate::world::builtins;
use crate::world::descripton::EventInfo;
use crate::world::errors::WorldError;
use crate::world::format::{render, FormatContext};
use crate::world::resolver::ResolutionContext;
use crate::world::script::{run_script, ScriptContext, Value};
use crate::world::types::{command_prop, ThingId, PROP_COMMAND};

/// A stored template: command lines, or a script when the text starts with `!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template<'a> {
    Lines(&'a str),
    Script(&'a str),
}

impl<'a> Template<'a> {
    pub fn parse(text: &'a str) -> Self {
        let trimmed = text.trim_start();
        match trimmed.strip_prefix('!') {
            Some(script) => Template::Script(script.trim()),
            None => Template::Lines(text),
        }
    }
}

/// Rewrite leading shorthand into command words.
pub fn normalize(line: &str) -> String {
    let line = line.trim();
    let mut chars = line.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest = chars.as_str().trim();
    match first {
        '\'' | '"' => {
            let rest = rest.strip_suffix(first).unwrap_or(rest);
            format!("say {}", rest)
        }
        ':' => format!("emote {}", rest),
        '!' => format!("@script {}", rest),
        _ => line.to_string(),
    }
}

/// Split on whitespace; a token starting with a quote runs to the matching
/// quote. Returns each token with its byte offset in `line`.
pub fn tokenize(line: &str) -> Vec<(usize, String)> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if ch == '"' || ch == '\'' {
            chars.next();
            for (_, c) in chars.by_ref() {
                if c == ch {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&(_, c)) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push((start, token));
    }
    tokens
}

/// One tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub line: String,
    words: Vec<String>,
    offsets: Vec<usize>,
}

impl ParsedCommand {
    pub fn parse(line: &str) -> Self {
        let (offsets, words) = tokenize(line).into_iter().unzip();
        Self {
            line: line.to_string(),
            words,
            offsets,
        }
    }

    pub fn verb(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }

    /// All words, command word included.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Words after the command word.
    pub fn args(&self) -> &[String] {
        self.words.get(1..).unwrap_or(&[])
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args().get(index).map(String::as_str)
    }

    /// Raw text from argument `index` to the end of the line. A lone quoted
    /// argument comes back without its quotes.
    pub fn rest_from(&self, index: usize) -> String {
        let word = index + 1;
        match self.words.len().checked_sub(word) {
            None | Some(0) => String::new(),
            Some(1) => self.words[word].clone(),
            Some(_) => self.line[self.offsets[word]..].trim().to_string(),
        }
    }

    pub fn rest(&self) -> String {
        self.rest_from(0)
    }
}

/// Expand `$0..$N`, `$*` and `%this` in a line template. Other `$` tokens are
/// left for the format engine.
pub fn substitute(template: &str, args: &[String], this: ThingId) -> Result<Vec<String>, WorldError> {
    let mut lines = Vec::new();
    let this_ref = format!("%{}", this);
    for raw in template.lines() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        // owner references are fixed before argument text is spliced in
        let raw = raw.replace("%this", &this_ref);
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '$' {
                out.push(ch);
                continue;
            }
            match chars.peek() {
                Some('*') => {
                    chars.next();
                    out.push_str(&args.get(1..).unwrap_or(&[]).join(" "));
                }
                Some(c) if c.is_ascii_digit() => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        digits.push(*d);
                        chars.next();
                    }
                    let index: usize = digits.parse().unwrap_or(usize::MAX);
                    let value = args.get(index).ok_or_else(|| WorldError::NotEnoughArguments {
                        command: args.first().cloned().unwrap_or_default(),
                        needed: index,
                    })?;
                    out.push_str(value);
                }
                _ => out.push('$'),
            }
        }
        lines.push(out);
    }
    Ok(lines)
}

pub type Handler = fn(&mut World, &mut CommandContext, &ParsedCommand) -> Result<(), WorldError>;

/// Registry entry for a built-in command.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Arguments required after the command word.
    pub min_args: usize,
    pub admin_only: bool,
    pub help: &'static str,
    pub handler: Handler,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("admin_only", &self.admin_only)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name.to_string(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }
}

/// Execution context threaded through one command chain.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub actor: ThingId,
    /// Thing whose template is running; the actor at top level.
    pub this: ThingId,
    pub admin: bool,
    pub depth: u8,
    pub event: Option<EventInfo>,
    /// Value of the last successful `@if` or script.
    pub result: Option<Value>,
    skip_templates_for: Option<String>,
}

impl CommandContext {
    pub fn new(actor: ThingId, admin: bool) -> Self {
        Self {
            actor,
            this: actor,
            admin,
            depth: 0,
            event: None,
            result: None,
            skip_templates_for: None,
        }
    }

    /// Context for `this` reacting to `event`: the reacting thing acts.
    pub fn for_reaction(this: ThingId, event: EventInfo, admin: bool) -> Self {
        Self {
            event: Some(event),
            ..Self::new(this, admin)
        }
    }

    fn child(&self, this: ThingId, word: &str) -> Self {
        Self {
            this,
            depth: self.depth + 1,
            skip_templates_for: Some(word.to_string()),
            ..self.clone()
        }
    }

    /// Same chain, one substitution level deeper.
    pub(crate) fn deeper(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    /// Whoever caused the current chain: the event's source in reactions.
    pub fn event_source(&self) -> ThingId {
        self.event.as_ref().map(|e| e.source).unwrap_or(self.actor)
    }

    pub fn resolution(&self) -> ResolutionContext {
        ResolutionContext {
            actor: self.actor,
            this: self.this,
            event_source: self.event.as_ref().map(|e| e.source),
        }
    }

    /// Whether this chain may modify `id`.
    pub fn controls(&self, id: ThingId) -> bool {
        self.admin || id == self.this
    }
}

impl World {
    /// Run one line typed by `actor` in its own update transaction. Errors are
    /// reported to the actor and returned; event failures were already told.
    pub fn command(&mut self, actor: ThingId, line: &str) -> Result<(), WorldError> {
        let mut ctx = CommandContext::new(actor, self.is_admin(actor));
        let result = self.update(|w| w.dispatch(&mut ctx, line));
        if let Err(e) = &result {
            trace!("command from %{} failed: {}", actor, e);
            if !e.is_event_failure() {
                self.tell(actor, &e.to_string());
            }
        }
        result
    }

    pub fn dispatch(&mut self, ctx: &mut CommandContext, line: &str) -> Result<(), WorldError> {
        let limit = self.limits.max_substitution_depth;
        if ctx.depth > limit {
            return Err(WorldError::NestingTooDeep(limit));
        }
        let line = normalize(line);
        let parsed = ParsedCommand::parse(&line);
        let Some(word) = parsed.verb().map(str::to_lowercase) else {
            return Ok(());
        };
        trace!("dispatch %{} depth {}: {}", ctx.actor, ctx.depth, escape_log(&line));

        let registry = Arc::clone(&self.registry);
        if let Some(spec) = registry.get(&word) {
            if spec.admin_only && !ctx.admin {
                return Err(WorldError::PermissionDenied(spec.name.to_string()));
            }
            if parsed.args().len() < spec.min_args {
                return Err(WorldError::NotEnoughArguments {
                    command: spec.name.to_string(),
                    needed: spec.min_args,
                });
            }
            return (spec.handler)(self, ctx, &parsed);
        }
        if ctx.skip_templates_for.as_deref() != Some(word.as_str()) {
            if let Some((owner, template)) = self.find_template(ctx.actor, &word) {
                return self.run_template(ctx, owner, &word, &template, parsed.words());
            }
        }
        Err(WorldError::UnknownCommand(word))
    }

    /// First thing around `actor` offering a template for `word`.
    pub fn find_template(&self, actor: ThingId, word: &str) -> Option<(ThingId, String)> {
        let prop = command_prop(word);
        let mut scope = self.contents(actor);
        scope.extend(self.links(actor));
        if let Some(here) = self.location(actor) {
            scope.push(here);
            scope.extend(self.links(here));
        }
        scope.extend(self.global_things());
        scope.into_iter().find_map(|id| {
            if let Some(template) = self.choose_text(id, &[prop.as_str()]) {
                return Some((id, template));
            }
            if self.answers_to(id, word) {
                return self.choose_text(id, &[PROP_COMMAND]).map(|t| (id, t));
            }
            None
        })
    }

    /// Expand and run `template` owned by `owner` with `args` (`args[0]` is
    /// the command word). Any failing line aborts the rest of the chain.
    pub(crate) fn run_template(
        &mut self,
        ctx: &mut CommandContext,
        owner: ThingId,
        word: &str,
        template: &str,
        args: &[String],
    ) -> Result<(), WorldError> {
        match Template::parse(template) {
            Template::Lines(text) => {
                for line in substitute(text, args, owner)? {
                    self.run_child(ctx, owner, word, &line)?;
                }
            }
            Template::Script(source) => {
                self.run_script_for(ctx, owner, word, source, args)?;
            }
        }
        Ok(())
    }

    /// Run `source` as `owner`'s script, deliver its output and dispatch the
    /// lines it queued. A non-null value becomes the chain's result.
    pub(crate) fn run_script_for(
        &mut self,
        ctx: &mut CommandContext,
        owner: ThingId,
        word: &str,
        source: &str,
        args: &[String],
    ) -> Result<Value, WorldError> {
        let mut script = ScriptContext::new(owner, ctx.actor, self.limits.max_script_actions);
        script.actor = ctx.event_source();
        script.event = ctx.event.as_ref().map(|e| e.event.clone());
        script.args = args.to_vec();
        script.admin = ctx.admin;
        let outcome = run_script(self, &mut script, source)?;
        if outcome.value != Value::Null {
            ctx.result = Some(outcome.value.clone());
        }
        for text in &outcome.outputs {
            self.output_for(ctx, text);
        }
        for line in &outcome.commands {
            self.run_child(ctx, owner, word, line)?;
        }
        Ok(outcome.value)
    }

    fn run_child(
        &mut self,
        ctx: &mut CommandContext,
        owner: ThingId,
        word: &str,
        line: &str,
    ) -> Result<(), WorldError> {
        let mut child = ctx.child(owner, word);
        self.dispatch(&mut child, line)?;
        if child.result.is_some() {
            ctx.result = child.result;
        }
        Ok(())
    }

    /// Render `text` as a format string and tell whoever caused the chain.
    pub(crate) fn output_for(&mut self, ctx: &CommandContext, text: &str) {
        let viewer = ctx.event_source();
        let rendered = {
            let mut fctx = FormatContext::for_viewer(self, viewer, ctx.this)
                .with_actor(viewer)
                .with_result(ctx.result.as_ref());
            if let Some(event) = &ctx.event {
                fctx = fctx.with_event(event).with_args(&event.args);
            }
            render(self, text, &fctx)
        };
        self.tell(viewer, &rendered);
    }
}
