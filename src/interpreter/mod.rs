//! Resumable evaluation of rule trees.
//!
//! Specifications arrive as trees of nodes. Every node carries its own
//! evaluation state, and evaluation proceeds in micro-steps: the stepper
//! repeatedly hands the node at its current position to the handler
//! registered for the node's kind, and the handler either finishes the node
//! or names a child to evaluate first. Constructs that retry (choice,
//! iteration) clear and re-enter parts of their subtree within one step.

/// Node arena and evaluation status.
pub mod ast;
/// Construction of node arenas from parser output.
pub mod builder;
/// Candidate drawing for `choose`/`pick`.
pub mod choice;
/// Capability interfaces and the per-invocation context.
pub mod context;
/// Scoped variable bindings.
pub mod environment;
/// Micro-step driver.
pub mod runtime;
/// Domain values.
pub mod value;

pub use ast::{Ast, GrammarClass, NodeId, SourcePosition};
pub use builder::{NodeSpec, build_ast};
pub use context::{EvalContext, Evaluation, RuleLibrary, Scratch};
pub use environment::{Environment, ScopeHandle};
pub use runtime::{InterpreterRuntime, RuntimeEvent};
pub use value::{Enumerable, Value};
