use thiserror::Error;

use crate::world::types::ThingId;

/// Errors raised by the world engine.
///
/// Lookups never produce these for a missing thing; `World::get` and the
/// reverse index queries return `None`/empty instead. Everything here unwinds
/// the current command.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// World export/import.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A reference named by a command did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// A name matched more than one thing.
    #[error("'{reference}' is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Toast refused because other things still inherit from the target.
    #[error("%{id} is the prototype of {}", users.iter().map(|u| format!("%{}", u)).collect::<Vec<_>>().join(", "))]
    PrototypeInUse { id: ThingId, users: Vec<ThingId> },

    #[error("{command} needs at least {needed} argument(s)")]
    NotEnoughArguments { command: String, needed: usize },

    /// Permission denied (admin-only command, protected thing)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A descripton was failed; actor and observer messages were already delivered.
    #[error("{0} failed")]
    EventFailed(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("command substitution nested deeper than {0}")]
    NestingTooDeep(u8),

    /// The clock task that owns the world has shut down.
    #[error("world clock is not running")]
    ClockStopped,

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorldError {
    /// Whether the error only exists to unwind a command whose failure message
    /// has already reached the actor.
    pub fn is_event_failure(&self) -> bool {
        matches!(self, WorldError::EventFailed(_))
    }
}
