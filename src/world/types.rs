use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::world::errors::WorldError;

pub type ThingId = u64;

pub const THING_SCHEMA_VERSION: u8 = 1;
pub const WORLD_SCHEMA_VERSION: u8 = 1;

// Scalar property names.
pub const PROP_NAME: &str = "name";
pub const PROP_FULL_NAME: &str = "fullName";
pub const PROP_ARTICLE: &str = "article";
pub const PROP_DESCRIPTION: &str = "description";
pub const PROP_CONTENTS_FORMAT: &str = "contentsFormat";
pub const PROP_LINK_FORMAT: &str = "linkFormat";
pub const PROP_EXAMINE_FORMAT: &str = "examineFormat";
pub const PROP_LOOK_FORMAT: &str = "lookFormat";
pub const PROP_CLOSED: &str = "closed";
pub const PROP_PRIORITY: &str = "priority";
pub const PROP_KEYS: &str = "keys";
pub const PROP_ALIASES: &str = "aliases";
/// Things with this flag advertise their commands world-wide.
pub const PROP_GLOBAL: &str = "global";
pub const PROP_ADMIN: &str = "admin";
/// Persisted tick subscription; the scheduler keeps the live set.
pub const PROP_TICKING: &str = "ticking";
/// Generic command template used when the command word names the thing itself.
pub const PROP_COMMAND: &str = "cmd";

pub const COMMAND_PREFIX: &str = "cmd_";
pub const REACTION_PREFIX: &str = "react_";

/// Properties whose values are lists; `PropValue::parse` splits them on commas.
pub const LIST_PROPS: &[&str] = &[PROP_KEYS, PROP_ALIASES];

// Association names.
pub const ASSOC_LOCATION: &str = "location";
pub const ASSOC_LINK_OWNER: &str = "linkOwner";
pub const ASSOC_OTHER_LINK: &str = "otherLink";

/// Property name holding the command template for `word`.
pub fn command_prop(word: &str) -> String {
    format!("{}{}", COMMAND_PREFIX, word.to_ascii_lowercase())
}

/// Property name holding the reaction template for `event`.
pub fn reaction_prop(event: &str) -> String {
    format!("{}{}", REACTION_PREFIX, event.to_ascii_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropValue {
    Text(String),
    Number(i64),
    Bool(bool),
    List(Vec<String>),
}

impl PropValue {
    /// Interpret raw command input for property `name`.
    pub fn parse(name: &str, raw: &str) -> Self {
        let raw = raw.trim();
        if LIST_PROPS.contains(&name) {
            return PropValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        match raw {
            "true" => PropValue::Bool(true),
            "false" => PropValue::Bool(false),
            _ => match raw.parse::<i64>() {
                Ok(n) => PropValue::Number(n),
                Err(_) => PropValue::Text(raw.to_string()),
            },
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            PropValue::Text(s) => s.clone(),
            PropValue::Number(n) => n.to_string(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::List(items) => items.join(", "),
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            PropValue::Bool(b) => *b,
            PropValue::Number(n) => *n != 0,
            PropValue::Text(s) => !s.is_empty() && s != "false",
            PropValue::List(items) => !items.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            PropValue::Number(n) => Some(*n),
            PropValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            PropValue::List(items) => items.clone(),
            PropValue::Text(s) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Text(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Number(value)
    }
}

/// A named, directed edge from the owning thing to `target`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Association {
    pub prop: String,
    pub target: ThingId,
}

impl Association {
    pub fn new(prop: impl Into<String>, target: ThingId) -> Self {
        Self {
            prop: prop.into(),
            target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thing {
    pub id: ThingId,
    pub prototype: Option<ThingId>,
    #[serde(default)]
    pub props: BTreeMap<String, PropValue>,
    #[serde(default)]
    pub associations: Vec<Association>,
    pub schema_version: u8,
}

impl Thing {
    pub fn new(id: ThingId, prototype: Option<ThingId>) -> Self {
        Self {
            id,
            prototype,
            props: BTreeMap::new(),
            associations: Vec::new(),
            schema_version: THING_SCHEMA_VERSION,
        }
    }

    /// Own (non-inherited) property.
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    pub fn name(&self) -> String {
        self.props
            .get(PROP_NAME)
            .map(PropValue::as_text)
            .unwrap_or_default()
    }

    /// Targets of every edge named `prop`, in insertion order.
    pub fn associated<'a>(&'a self, prop: &'a str) -> impl Iterator<Item = ThingId> + 'a {
        self.associations
            .iter()
            .filter(move |a| a.prop == prop)
            .map(|a| a.target)
    }

    pub fn first_associated(&self, prop: &str) -> Option<ThingId> {
        self.associated(prop).next()
    }

    /// Distinct `(prop, target)` pairs; duplicate edges collapse.
    pub fn edge_set(&self) -> BTreeSet<Association> {
        self.associations.iter().cloned().collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WorldError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorldError> {
        let thing: Thing = bincode::deserialize(bytes)?;
        if thing.schema_version != THING_SCHEMA_VERSION {
            return Err(WorldError::SchemaMismatch {
                entity: "thing",
                expected: THING_SCHEMA_VERSION,
                found: thing.schema_version,
            });
        }
        Ok(thing)
    }
}

/// World-level record persisted beside the things: id counter and well-known ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldInfo {
    pub name: String,
    pub next_id: ThingId,
    pub limbo: ThingId,
    pub lobby: ThingId,
    pub hall_of_prototypes: ThingId,
    /// Standard prototypes by name ("thing", "room", "link", "person").
    pub prototypes: BTreeMap<String, ThingId>,
    pub clock_interval_ms: u64,
    pub schema_version: u8,
}

impl WorldInfo {
    pub fn new(name: &str, clock_interval_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            next_id: 0,
            limbo: 0,
            lobby: 0,
            hall_of_prototypes: 0,
            prototypes: BTreeMap::new(),
            clock_interval_ms,
            schema_version: WORLD_SCHEMA_VERSION,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WorldError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorldError> {
        let info: WorldInfo = bincode::deserialize(bytes)?;
        if info.schema_version != WORLD_SCHEMA_VERSION {
            return Err(WorldError::SchemaMismatch {
                entity: "world",
                expected: WORLD_SCHEMA_VERSION,
                found: info.schema_version,
            });
        }
        Ok(info)
    }
}

/// Limits applied to command substitution and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_substitution_depth: u8,
    pub max_script_length: usize,
    pub max_script_actions: u16,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_substitution_depth: 8,
            max_script_length: 512,
            max_script_actions: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thing_snapshot_round_trips() {
        let mut thing = Thing::new(7, Some(3));
        thing.props.insert(PROP_NAME.into(), "rock".into());
        thing.props.insert(PROP_CLOSED.into(), true.into());
        thing.props.insert(
            PROP_ALIASES.into(),
            PropValue::List(vec!["stone".into(), "pebble".into()]),
        );
        thing.associations.push(Association::new(ASSOC_LOCATION, 1));
        thing.associations.push(Association::new("key", 9));
        let bytes = thing.to_bytes().expect("serialize");
        let back = Thing::from_bytes(&bytes).expect("deserialize");
        assert_eq!(back, thing);
        assert_eq!(back.to_bytes().expect("reserialize"), bytes);
    }

    #[test]
    fn snapshot_with_foreign_schema_is_rejected() {
        let mut thing = Thing::new(1, None);
        thing.schema_version = 99;
        let bytes = bincode::serialize(&thing).expect("serialize");
        let err = Thing::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, WorldError::SchemaMismatch { found: 99, .. }));
    }

    #[test]
    fn parse_infers_value_kinds() {
        assert_eq!(PropValue::parse("closed", "true"), PropValue::Bool(true));
        assert_eq!(PropValue::parse("priority", " 12 "), PropValue::Number(12));
        assert_eq!(
            PropValue::parse(PROP_ALIASES, "north, n,,"),
            PropValue::List(vec!["north".into(), "n".into()])
        );
        assert_eq!(
            PropValue::parse("description", "A flat stone"),
            PropValue::Text("A flat stone".into())
        );
    }

    #[test]
    fn edge_set_collapses_duplicates() {
        let mut thing = Thing::new(1, None);
        thing.associations.push(Association::new("key", 2));
        thing.associations.push(Association::new("key", 2));
        thing.associations.push(Association::new("key", 3));
        assert_eq!(thing.edge_set().len(), 2);
        assert_eq!(thing.associated("key").collect::<Vec<_>>(), vec![2, 2, 3]);
    }
}
