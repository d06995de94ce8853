//! Core domain types, errors, and constants for the `kiln` bakery.
//!
//! This crate establishes the foundational data structures and error handling
//! mechanisms used throughout the workspace.
//!
//! ## Key Components
//!
//! - **`errors`**: Defines the primary `Error` enum and `Result` type alias,
//!   centralizing all possible failure modes for predictable error handling.
//! - **`types`**: Domain structures shared between the template builders and
//!   the job executors: `Artifact`, `BakeRecipe`, `JobRequest`, `BakeStatus`
//!   and the per-renderer bake request shapes.
//! - **`constants`**: Shared static constants such as retry policy and the
//!   bake poll cadence.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    types::*,
};
