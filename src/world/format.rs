//! Viewer-relative format strings.
//!
//! The same stored template renders differently for each viewer: the
//! viewer's own thing is "you", verbs agree in number, and `$forme` /
//! `$forothers` split one template into an actor half and an observer half.
//!
//! Tokens are `$word` or `$word.prop`; a capitalized word capitalizes its
//! output. Unknown words fall back to the subject's property of that name and
//! stay literal when it has none. `$$` is a literal dollar sign.

use crate::world::arena::World;
use crate::world::descripton::EventInfo;
use crate::world::script::Value;
use crate::world::types::{
    ThingId, PROP_CONTENTS_FORMAT, PROP_DESCRIPTION, PROP_LINK_FORMAT, PROP_NAME,
};

/// `$contents`/`$links`/`$description` stop expanding past this depth.
pub const MAX_FORMAT_DEPTH: u8 = 4;

const DEFAULT_CONTENTS_FORMAT: &str = "$This $is here.";
const DEFAULT_LINK_FORMAT: &str = "$This leads to $link.";

const FOR_ME: &str = "$forme";
const FOR_OTHERS: &str = "$forothers";

#[derive(Debug, Clone, Copy)]
pub struct FormatContext<'a> {
    pub viewer: Option<ThingId>,
    pub subject: ThingId,
    pub actor: Option<ThingId>,
    pub args: &'a [String],
    pub event: Option<&'a EventInfo>,
    pub result: Option<&'a Value>,
    pub admin: bool,
    pub verbose: bool,
    pub depth: u8,
}

impl<'a> FormatContext<'a> {
    pub fn new(subject: ThingId) -> Self {
        Self {
            viewer: None,
            subject,
            actor: None,
            args: &[],
            event: None,
            result: None,
            admin: false,
            verbose: false,
            depth: 0,
        }
    }

    /// Context for `viewer`, taking admin and verbose flags from its listener.
    pub fn for_viewer(world: &World, viewer: ThingId, subject: ThingId) -> Self {
        Self {
            viewer: Some(viewer),
            admin: world.is_admin(viewer),
            verbose: world.is_verbose(viewer),
            ..Self::new(subject)
        }
    }

    pub fn with_actor(mut self, actor: ThingId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_args(mut self, args: &'a [String]) -> Self {
        self.args = args;
        self
    }

    pub fn with_event(mut self, event: &'a EventInfo) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_result(mut self, result: Option<&'a Value>) -> Self {
        self.result = result;
        self
    }

    fn nested(&self, subject: ThingId) -> Self {
        Self {
            subject,
            depth: self.depth + 1,
            ..*self
        }
    }

    fn is_viewer(&self, id: ThingId) -> bool {
        self.viewer == Some(id)
    }
}

/// Render `template` for `ctx`.
pub fn render(world: &World, template: &str, ctx: &FormatContext<'_>) -> String {
    let template = select_half(template, ctx);
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < chars.len() && is_word_char(chars[end]) {
            end += 1;
        }
        if end == start {
            if chars.get(start) == Some(&'$') {
                i += 2;
            } else {
                i += 1;
            }
            out.push('$');
            continue;
        }
        let word: String = chars[start..end].iter().collect();
        let mut prop = None;
        if chars.get(end) == Some(&'.') && chars.get(end + 1).map_or(false, |c| is_word_char(*c)) {
            let mut prop_end = end + 1;
            while prop_end < chars.len() && is_word_char(chars[prop_end]) {
                prop_end += 1;
            }
            prop = Some(chars[end + 1..prop_end].iter().collect::<String>());
            end = prop_end;
        }
        let capitalized = word.starts_with(|c: char| c.is_uppercase());
        let key = lower_first(&word);
        match key.as_str() {
            "quote" => {
                let rest: String = chars[end..].iter().collect();
                out.push_str(rest.strip_prefix(' ').unwrap_or(&rest));
                return out;
            }
            "admin" => {
                if !ctx.admin {
                    return out.trim_end().to_string();
                }
                if chars.get(end) == Some(&' ') {
                    end += 1;
                }
            }
            _ => match expand(world, &key, prop.as_deref(), ctx) {
                Some(text) if capitalized => out.push_str(&capitalize(&text)),
                Some(text) => out.push_str(&text),
                None => out.extend(&chars[i..end]),
            },
        }
        i = end;
    }
    out
}

/// Drop blank lines left behind by empty sections.
pub fn tidy_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Name of `id` as `ctx`'s viewer should read it.
pub fn format_name(world: &World, id: ThingId, ctx: &FormatContext<'_>) -> String {
    if ctx.is_viewer(id) {
        return "you".to_string();
    }
    let name = world.display_name(id);
    if ctx.verbose {
        format!("{} (%{})", name, id)
    } else {
        name
    }
}

fn expand(world: &World, key: &str, prop: Option<&str>, ctx: &FormatContext<'_>) -> Option<String> {
    let subject = ctx.subject;
    if let Some(index) = key.strip_prefix("arg").and_then(|n| n.parse::<usize>().ok()) {
        return Some(ctx.args.get(index).cloned().unwrap_or_default());
    }
    let thing_ref = |id: Option<ThingId>| -> Option<String> {
        let id = id?;
        match prop {
            Some(p) => Some(world.choose_text(id, &[p]).unwrap_or_default()),
            None => Some(format_name(world, id, ctx)),
        }
    };
    match key {
        "this" => thing_ref(Some(subject)),
        "name" => Some(if ctx.is_viewer(subject) {
            "you".to_string()
        } else {
            world.choose_text(subject, &[PROP_NAME]).unwrap_or_default()
        }),
        "is" => Some(if ctx.is_viewer(subject) { "are" } else { "is" }.to_string()),
        "s" => Some(if ctx.is_viewer(subject) { "" } else { "s" }.to_string()),
        "location" => thing_ref(world.location(subject)).or_else(|| Some(String::new())),
        "owner" => thing_ref(world.link_owner(subject)).or_else(|| Some(String::new())),
        "link" => thing_ref(world.destination(subject)).or_else(|| Some("nowhere".to_string())),
        "actor" => thing_ref(ctx.actor).or_else(|| Some(String::new())),
        "me" => thing_ref(ctx.viewer).or_else(|| Some(String::new())),
        "contents" => Some(render_list(world, ctx, world.contents(subject), PROP_CONTENTS_FORMAT, DEFAULT_CONTENTS_FORMAT)),
        "links" => Some(render_list(world, ctx, world.links(subject), PROP_LINK_FORMAT, DEFAULT_LINK_FORMAT)),
        "description" => {
            if ctx.depth >= MAX_FORMAT_DEPTH {
                return Some(String::new());
            }
            let text = world.choose_text(subject, &[PROP_DESCRIPTION]).unwrap_or_default();
            Some(render(world, &text, &ctx.nested(subject)))
        }
        "arg" => Some(ctx.args.join(" ")),
        "forme" | "forothers" => Some(String::new()),
        "event" => {
            let event = ctx.event?;
            Some(match prop {
                None => event.event.clone(),
                Some("source") => format_name(world, event.source, ctx),
                Some(p) => match p.strip_prefix("arg").and_then(|n| n.parse::<usize>().ok()) {
                    Some(index) => event.args.get(index).cloned().unwrap_or_default(),
                    None => world.choose_text(event.source, &[p]).unwrap_or_default(),
                },
            })
        }
        "result" => {
            let result = ctx.result?;
            Some(match (result, prop) {
                (Value::Thing(id), Some(p)) => world.choose_text(*id, &[p]).unwrap_or_default(),
                (Value::Thing(id), None) => format_name(world, *id, ctx),
                (_, Some(_)) => String::new(),
                (other, None) => other.as_string(),
            })
        }
        other if prop.is_none() => world.choose_text(subject, &[other]),
        _ => None,
    }
}

fn render_list(
    world: &World,
    ctx: &FormatContext<'_>,
    ids: Vec<ThingId>,
    format_prop: &str,
    default_format: &str,
) -> String {
    if ctx.depth >= MAX_FORMAT_DEPTH {
        return String::new();
    }
    ids.into_iter()
        .filter(|id| !ctx.is_viewer(*id))
        .map(|id| {
            let format = world
                .choose_text(id, &[format_prop])
                .unwrap_or_else(|| default_format.to_string());
            render(world, &format, &ctx.nested(id))
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pick the `$forme` half for the actor and the `$forothers` half for
/// everyone else. Templates without either marker pass through.
fn select_half<'t>(template: &'t str, ctx: &FormatContext<'_>) -> &'t str {
    let me = template.find(FOR_ME);
    let others = template.find(FOR_OTHERS);
    if me.is_none() && others.is_none() {
        return template;
    }
    let is_actor = ctx.viewer.is_some() && ctx.viewer == ctx.actor;
    let (marker, at, other_at) = if is_actor {
        (FOR_ME, me, others)
    } else {
        (FOR_OTHERS, others, me)
    };
    let Some(at) = at else {
        return "";
    };
    let begin = at + marker.len();
    let end = match other_at {
        Some(o) if o > at => o,
        _ => template.len(),
    };
    template[begin..end].trim()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
