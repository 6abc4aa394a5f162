//! Signature of a loaded specification
//!
//! Records every declared identifier and rejects duplicates before any step
//! runs. Plugin keywords are reserved and cannot be declared either.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::NameConflictError;

/// What a declaration introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    /// Controlled/monitored function
    Function,
    /// Universe of elements
    Universe,
    /// Background (built-in domain)
    Background,
    /// Named rule
    Rule,
    /// Derived function
    Derived,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeclarationKind::Function => "function",
            DeclarationKind::Universe => "universe",
            DeclarationKind::Background => "background",
            DeclarationKind::Rule => "rule",
            DeclarationKind::Derived => "derived function",
        };
        write!(f, "{}", label)
    }
}

/// A declared identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Identifier
    pub name: String,
    /// Declaration kind
    pub kind: DeclarationKind,
}

impl Declaration {
    /// Create a declaration
    pub fn new(name: impl Into<String>, kind: DeclarationKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
enum Claim {
    Declared(DeclarationKind),
    Reserved(String),
}

/// Table of declared and reserved identifiers
#[derive(Debug, Clone, Default)]
pub struct Signature {
    names: BTreeMap<String, Claim>,
}

impl Signature {
    /// Create an empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a plugin keyword so no declaration can reuse it
    pub fn reserve(&mut self, keyword: impl Into<String>, plugin: &str) {
        self.names
            .entry(keyword.into())
            .or_insert_with(|| Claim::Reserved(plugin.to_string()));
    }

    /// Declare an identifier
    pub fn declare(&mut self, declaration: &Declaration) -> Result<(), NameConflictError> {
        if let Some(claim) = self.names.get(&declaration.name) {
            let existing = match claim {
                Claim::Declared(kind) => kind.to_string(),
                Claim::Reserved(plugin) => format!("a keyword of {}", plugin),
            };
            return Err(NameConflictError {
                name: declaration.name.clone(),
                existing,
                attempted: declaration.kind,
            });
        }
        self.names
            .insert(declaration.name.clone(), Claim::Declared(declaration.kind));
        Ok(())
    }

    /// Kind of a declared identifier
    pub fn kind_of(&self, name: &str) -> Option<DeclarationKind> {
        match self.names.get(name) {
            Some(Claim::Declared(kind)) => Some(*kind),
            _ => None,
        }
    }

    /// Whether the identifier is declared
    pub fn is_declared(&self, name: &str) -> bool {
        self.kind_of(name).is_some()
    }

    /// Declared identifiers in order
    pub fn declared(&self) -> impl Iterator<Item = (&str, DeclarationKind)> {
        self.names.iter().filter_map(|(name, claim)| match claim {
            Claim::Declared(kind) => Some((name.as_str(), *kind)),
            Claim::Reserved(_) => None,
        })
    }
}
