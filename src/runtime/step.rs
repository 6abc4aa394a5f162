//! Agent identifiers, step numbering, and step records
//!
//! A `StepRecord` captures everything one engine step committed: which agents
//! ran, which of them failed, the merged updates, and a digest of the
//! resulting state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::error::SpecificationError;
use super::state::UpdateMultiset;

/// Agent identifier (the agent's element name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new agent id
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one dynamic rule invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    /// Create a new random invocation id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine step counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepNumber(pub u64);

impl StepNumber {
    /// Step zero (the initial state)
    pub fn zero() -> Self {
        Self(0)
    }

    /// Increment the counter
    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// Get the next step number
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StepNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An agent whose evaluation was aborted during a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Failed agent
    pub agent: AgentId,
    /// Invocation that was aborted
    pub invocation: InvocationId,
    /// Rendered cause, including the source position
    pub message: String,
}

impl AgentFailure {
    /// Record a specification error raised by an agent
    pub fn new(agent: AgentId, invocation: InvocationId, error: &SpecificationError) -> Self {
        Self {
            agent,
            invocation,
            message: error.to_string(),
        }
    }
}

/// Everything a committed engine step produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Number of the state this step produced
    pub step: StepNumber,
    /// Agents that contributed updates
    pub agents: Vec<AgentId>,
    /// Merged update multiset that was applied
    pub updates: UpdateMultiset,
    /// Agents aborted by specification errors
    pub failures: Vec<AgentFailure>,
    /// Digest of the resulting state
    pub state_digest: String,
    /// Wall-clock time of the commit
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    /// Whether every scheduled agent completed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_number_ordering() {
        let mut step = StepNumber::zero();
        let next = step.next();
        step.increment();
        assert_eq!(step, next);
        assert!(StepNumber::zero() < step);
    }

    #[test]
    fn test_invocation_ids_are_unique() {
        assert_ne!(InvocationId::new(), InvocationId::new());
    }
}
