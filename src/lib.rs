//! # textcraft - object world engine for multiplayer text adventures
//!
//! Every room, exit, person and item is a [`world::Thing`]: an integer id, an
//! optional prototype it inherits properties from, a property bag, and a list
//! of named edges to other things ("location", "linkOwner", "otherLink").
//!
//! ## Features
//!
//! - **Live prototype inheritance**: property lookup walks the prototype chain,
//!   so editing or swapping a prototype changes every instance at once.
//! - **Association indices**: reverse lookups ("what is in this room") are
//!   index reads, kept in step with the things by diffing on every write.
//! - **Transactions**: mutations are batched and only real changes reach the
//!   sled store.
//! - **Descriptons**: events travel through contents, links and unsealed
//!   containers; listeners hear them and other things react to them.
//! - **Templates**: things define verbs and reactions as command templates or
//!   small sandboxed scripts; text is rendered per viewer from format strings.
//! - **Tick clock**: a tokio task owns the world, serializes commands and
//!   drives scheduled reactions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use textcraft::world::{OutputBuffer, World, PROTO_PERSON};
//!
//! fn main() -> Result<(), textcraft::world::WorldError> {
//!     let mut world = World::in_memory("demo")?;
//!     let person = world.prototype(PROTO_PERSON);
//!     let me = world.create_from(person, "alice", "")?;
//!     world.set_location(me, world.lobby())?;
//!     let out = OutputBuffer::new();
//!     world.attach_listener(me, Box::new(out.clone()));
//!     world.command(me, "look")?;
//!     println!("{}", out.take().join("\n"));
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - the engine: arena, indices, transactions, propagation,
//!   commands, formats, scripts, reactions, clock, import/export
//! - [`config`] - TOML configuration for the binary
//! - [`logutil`] - helpers for logging user-supplied text

pub mod config;
pub mod logutil;
pub mod world;
