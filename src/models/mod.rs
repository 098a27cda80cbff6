//! Data models for the Truth or Dare backend.
//!
//! Field names serialize as camelCase to match the web client.

mod game;
mod player;
mod tag;
mod task;

pub use game::*;
pub use player::*;
pub use tag::*;
pub use task::*;
