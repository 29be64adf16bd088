//! The world engine: a persistent arena of prototype-inheriting things, the
//! association indices over them, descripton propagation, the command and
//! format template engines, and the reaction scheduler with its tick clock.
//!
//! A `World` is single-writer. Embedders either own it directly or hand it to
//! `clock::start_clock` and talk to it through a `WorldHandle`.

pub mod arena;
pub mod builtins;
pub mod clock;
pub mod command;
pub mod descripton;
pub mod errors;
pub mod format;
pub mod index;
pub mod listener;
pub mod reaction;
pub mod resolver;
pub mod script;
pub mod storage;
pub mod transaction;
pub mod transfer;
pub mod types;

pub use arena::{World, WorldOptions, PROTO_LINK, PROTO_PERSON, PROTO_ROOM, PROTO_THING};
pub use clock::{start_clock, ClockConfig, ClockStats, WorldHandle};
pub use command::{CommandContext, CommandRegistry, CommandSpec, ParsedCommand};
pub use descripton::{Descripton, EventInfo};
pub use errors::WorldError;
pub use format::{render, FormatContext};
pub use listener::{Listener, OutputBuffer};
pub use reaction::{SchedulerStats, TickOutcome};
pub use resolver::{ResolutionContext, ResolveResult};
pub use storage::{MemoryStore, ThingBackend, ThingStore, ThingStoreBuilder};
pub use transaction::CommitStats;
pub use transfer::WorldDump;
pub use types::{Association, EngineLimits, PropValue, Thing, ThingId};
