//! Thing reference resolution
//!
//! Turns the references players and templates type into thing ids.
//!
//! ## Forms
//! - `%42`: a thing by id
//! - `%me`, `%here`, `%this`, `%actor`: relative to the running command
//! - `%limbo`, `%lobby`, `%hall`, `%proto:room`: well-known things
//! - `me`, `here`: keyword forms
//! - anything else: case-insensitive name, full-name or alias match
//!
//! ## Search Priority
//! 1. The actor itself
//! 2. What the actor holds
//! 3. What is in the actor's location
//! 4. The location's links
//! 5. The location itself
//!
//! Exact matches anywhere beat partial ones; within one kind the first scope
//! with a hit wins.

use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::types::{ThingId, PROP_FULL_NAME};

/// Who is asking; the anchors for relative references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionContext {
    pub actor: ThingId,
    /// Thing whose template is running; the actor at top level.
    pub this: ThingId,
    /// Source of the event being reacted to.
    pub event_source: Option<ThingId>,
}

impl ResolutionContext {
    pub fn new(actor: ThingId) -> Self {
        Self {
            actor,
            this: actor,
            event_source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveResult {
    Found(ThingId),
    Ambiguous(Vec<ThingMatch>),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThingMatch {
    pub id: ThingId,
    pub name: String,
}

impl ThingMatch {
    pub fn label(&self) -> String {
        format!("{} (%{})", self.name, self.id)
    }
}

impl ResolveResult {
    /// Turn absence and ambiguity into errors naming `reference`.
    pub fn into_result(self, reference: &str) -> Result<ThingId, WorldError> {
        match self {
            ResolveResult::Found(id) => Ok(id),
            ResolveResult::NotFound => Err(WorldError::NotFound(reference.to_string())),
            ResolveResult::Ambiguous(matches) => Err(WorldError::Ambiguous {
                reference: reference.to_string(),
                candidates: matches.iter().map(ThingMatch::label).collect(),
            }),
        }
    }
}

/// Lowercase, trim, and collapse inner whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Partial,
}

impl World {
    /// Resolve `reference` from `ctx`'s point of view.
    pub fn resolve(&self, ctx: &ResolutionContext, reference: &str) -> ResolveResult {
        let reference = reference.trim();
        if reference.is_empty() {
            return ResolveResult::NotFound;
        }
        if let Some(special) = reference.strip_prefix('%') {
            return self
                .resolve_special(ctx, special)
                .map(ResolveResult::Found)
                .unwrap_or(ResolveResult::NotFound);
        }
        match normalize_name(reference).as_str() {
            "me" | "myself" => return ResolveResult::Found(ctx.actor),
            "here" => {
                return self
                    .location(ctx.actor)
                    .map(ResolveResult::Found)
                    .unwrap_or(ResolveResult::NotFound)
            }
            _ => {}
        }

        let scopes = self.search_scopes(ctx.actor);
        for kind in [MatchKind::Exact, MatchKind::Partial] {
            for scope in &scopes {
                let hits = self.matches_in(scope, reference, kind);
                match hits.len() {
                    0 => continue,
                    1 => return ResolveResult::Found(hits[0]),
                    _ => return ResolveResult::Ambiguous(self.describe_matches(&hits)),
                }
            }
        }
        ResolveResult::NotFound
    }

    /// Like `resolve`, turning absence and ambiguity into errors.
    pub fn resolve_one(&self, ctx: &ResolutionContext, reference: &str) -> Result<ThingId, WorldError> {
        self.resolve(ctx, reference).into_result(reference)
    }

    /// Match `query` against an explicit candidate list.
    pub fn match_among(&self, candidates: &[ThingId], query: &str) -> ResolveResult {
        for kind in [MatchKind::Exact, MatchKind::Partial] {
            let hits = self.matches_in(candidates, query, kind);
            match hits.len() {
                0 => continue,
                1 => return ResolveResult::Found(hits[0]),
                _ => return ResolveResult::Ambiguous(self.describe_matches(&hits)),
            }
        }
        ResolveResult::NotFound
    }

    /// Whether `word` is `id`'s name, full name or one of its aliases.
    pub fn answers_to(&self, id: ThingId, word: &str) -> bool {
        let word = normalize_name(word);
        self.names_of(id).iter().any(|n| *n == word)
    }

    fn resolve_special(&self, ctx: &ResolutionContext, special: &str) -> Option<ThingId> {
        let lowered = special.to_ascii_lowercase();
        let id = match lowered.as_str() {
            "me" => ctx.actor,
            "this" => ctx.this,
            "here" => self.location(ctx.actor)?,
            "actor" => ctx.event_source.unwrap_or(ctx.actor),
            "limbo" => self.limbo(),
            "lobby" => self.lobby(),
            "hall" => self.hall(),
            other => match other.strip_prefix("proto:") {
                Some(name) => self.prototype(name.trim())?,
                None => other.parse::<ThingId>().ok()?,
            },
        };
        self.contains(id).then_some(id)
    }

    fn search_scopes(&self, actor: ThingId) -> Vec<Vec<ThingId>> {
        let mut scopes = vec![vec![actor], self.contents(actor)];
        if let Some(here) = self.location(actor) {
            scopes.push(
                self.contents(here)
                    .into_iter()
                    .filter(|id| *id != actor)
                    .collect(),
            );
            scopes.push(self.links(here));
            scopes.push(vec![here]);
        }
        scopes
    }

    fn names_of(&self, id: ThingId) -> Vec<String> {
        let mut names = vec![normalize_name(&self.name_of(id))];
        if let Some(full) = self.choose_text(id, &[PROP_FULL_NAME]) {
            if !full.is_empty() {
                names.push(normalize_name(&full));
            }
        }
        names.extend(self.aliases(id).iter().map(|a| normalize_name(a)));
        names
    }

    fn matches_in(&self, candidates: &[ThingId], query: &str, kind: MatchKind) -> Vec<ThingId> {
        let query = normalize_name(query);
        candidates
            .iter()
            .copied()
            .filter(|id| {
                self.names_of(*id).iter().any(|name| match kind {
                    MatchKind::Exact => *name == query,
                    MatchKind::Partial => name.contains(&query),
                })
            })
            .collect()
    }

    fn describe_matches(&self, ids: &[ThingId]) -> Vec<ThingMatch> {
        ids.iter()
            .map(|id| ThingMatch {
                id: *id,
                name: self.display_name(*id),
            })
            .collect()
    }
}
