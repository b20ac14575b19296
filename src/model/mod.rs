//! Domain types.
//!
//! Everything here is pure: deriving leaves and nullifiers and building the
//! accumulator need no I/O, so the same code backs the server and `proof-cli`.

pub mod accumulator;
pub mod api;
pub mod digest;
pub mod election;
pub mod identity;
pub mod vote;
