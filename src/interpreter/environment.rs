//! Scoped variable bindings.
//!
//! Binding-introducing constructs push a scope and must pop it themselves
//! before they finish. Scopes are strictly nested; popping anything but the
//! innermost scope is an engine bug.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;

/// Receipt for a pushed scope, required to pop it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHandle {
    depth: usize,
    name: String,
}

impl ScopeHandle {
    /// Variable bound by this scope.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Scope discipline violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentError {
    /// The handle does not refer to the innermost scope.
    #[error("scope '{name}' at depth {depth} is not the innermost scope (depth {innermost})")]
    NotInnermost {
        /// Variable of the handle.
        name: String,
        /// Depth recorded in the handle.
        depth: usize,
        /// Current number of scopes.
        innermost: usize,
    },
}

/// Chain of bindings, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    scopes: Vec<(String, Value)>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` in a new innermost scope.
    pub fn push(&mut self, name: impl Into<String>, value: Value) -> ScopeHandle {
        let name = name.into();
        self.scopes.push((name.clone(), value));
        ScopeHandle {
            depth: self.scopes.len() - 1,
            name,
        }
    }

    /// Pop the innermost scope, returning the value it bound.
    pub fn pop(&mut self, handle: ScopeHandle) -> Result<Value, EnvironmentError> {
        let innermost = self.scopes.len();
        let matches = innermost > 0
            && handle.depth == innermost - 1
            && self.scopes[handle.depth].0 == handle.name;
        if !matches {
            return Err(EnvironmentError::NotInnermost {
                name: handle.name,
                depth: handle.depth,
                innermost,
            });
        }
        Ok(self
            .scopes
            .pop()
            .map(|(_, value)| value)
            .unwrap_or(Value::Undef))
    }

    /// Look a name up, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    /// Number of live scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drop every scope (abort path).
    pub fn clear(&mut self) {
        self.scopes.clear();
    }
}
