//! Error types for the engine
//!
//! Errors are split by how far they propagate: a `SpecificationError` aborts
//! only the offending agent's evaluation for the current step, while an
//! `EngineError` aborts the whole step (or the loading of a specification).

use std::fmt;
use thiserror::Error;

use super::signature::DeclarationKind;
use super::state::{Location, UpdateAction};
use super::step::{AgentId, StepNumber};
use crate::interpreter::ast::SourcePosition;
use crate::interpreter::value::Value;

/// Fatal engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two declarations claim the same identifier
    #[error("Name conflict: {0}")]
    NameConflict(#[from] NameConflictError),

    /// A node kind has no registered handler
    #[error("No handler registered for node kind '{kind}' (at {position})")]
    UnregisteredNodeKind {
        /// Offending node kind
        kind: String,
        /// Source position of the first node of that kind
        position: SourcePosition,
    },

    /// Conflicting updates; the step was rejected
    #[error("Inconsistent update: {0}")]
    Inconsistent(#[from] InconsistentUpdateError),

    /// Two agents share a name
    #[error("Agent '{0}' is declared twice")]
    DuplicateAgent(String),

    /// Plugin registration failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The persistence root holds steps that were not restored
    #[error("Journal already records step {0}; restore before stepping")]
    UnrestoredJournal(StepNumber),

    /// Reading or writing the persistence root failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// Broken engine invariant (a programming error, not a specification error)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Conflicting updates to a single location
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct InconsistentUpdateError {
    /// Location the updates disagree on
    pub location: Location,
    /// Every update that took part in the conflict
    pub conflicts: Vec<UpdateConflict>,
}

/// One side of an update conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConflict {
    /// Proposed value
    pub value: Value,
    /// Proposed action
    pub action: UpdateAction,
    /// Proposing agent
    pub agent: AgentId,
}

impl fmt::Display for InconsistentUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "location {} receives ", self.location)?;
        for (idx, conflict) in self.conflicts.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{} ({:?}) from agent {}",
                conflict.value.denotation(),
                conflict.action,
                conflict.agent
            )?;
        }
        Ok(())
    }
}

/// Duplicate identifier in the signature
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{name}' is already declared as {existing}, cannot redeclare it as {attempted}")]
pub struct NameConflictError {
    /// Conflicting identifier
    pub name: String,
    /// Owner of the first claim (declaration kind or plugin keyword)
    pub existing: String,
    /// Kind of the rejected declaration
    pub attempted: DeclarationKind,
}

/// Plugin registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two plugins claim the same node kind
    #[error("Node kind '{kind}' is provided by both {existing_plugin} and {plugin}")]
    DuplicateKind {
        /// Node kind
        kind: String,
        /// Plugin that registered it first
        existing_plugin: String,
        /// Plugin that attempted to register it again
        plugin: String,
    },
}

/// Runtime precondition of a construct was violated.
///
/// Recoverable: the agent produces no updates this step, other agents proceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {message} [{kind}]")]
pub struct SpecificationError {
    /// Kind of the offending node
    pub kind: String,
    /// Source position of the offending node
    pub position: SourcePosition,
    /// Human-readable cause
    pub message: String,
}

/// Outcome of a failed node evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    /// Recoverable, aborts the current agent only
    #[error(transparent)]
    Specification(#[from] SpecificationError),

    /// Fatal, aborts the step
    #[error(transparent)]
    Fatal(#[from] EngineError),
}

/// Convenience result alias for node evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
