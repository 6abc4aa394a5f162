//! asmstep – an execution engine for Abstract State Machine specifications
//!
//! This crate implements:
//! - Resumable, plugin-dispatched evaluation of rule trees
//! - The update-multiset algebra with atomic, consistency-checked commits
//! - Nondeterministic `choose`/`pick` sampling without replacement
//! - Step journaling and periodic state snapshots on disk

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Rule-tree evaluation: node arena, environment, stepper and choice
pub mod interpreter;
/// Built-in node kinds
pub mod plugins;
/// Step controller, storage algebra, registry and persistence
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{Engine, EngineConfig};

/// Current version of the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
