//! Specification documents and their compilation into runnable programs
//!
//! The external parser produces a [`Specification`]: declarations, rule
//! bodies, agent programs and the initial state, with every tree given as a
//! [`NodeSpec`]. Loading checks the signature, builds one arena per tree and
//! binds every node to its handler before any step runs.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::error::{EngineError, Result};
use super::registry::DispatchTable;
use super::signature::{Declaration, DeclarationKind, Signature};
use super::state::{Location, State};
use super::step::AgentId;
use crate::interpreter::ast::{Ast, NodeId};
use crate::interpreter::builder::{NodeSpec, build_ast};
use crate::interpreter::context::{RuleLibrary, RuleTemplate};
use crate::interpreter::value::Value;

/// Parsed specification handed over by the external parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Specification name
    pub name: String,
    /// Declared functions, universes and derived functions
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    /// Named rules
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    /// Agents and their programs
    pub agents: Vec<AgentSpec>,
    /// Initial location values
    #[serde(default)]
    pub initial_state: Vec<InitialValue>,
}

/// A named rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule name
    pub name: String,
    /// Parameter names
    #[serde(default)]
    pub params: Vec<String>,
    /// Rule body
    pub body: NodeSpec,
}

/// An agent with its program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent name, also the element `self` denotes
    pub name: String,
    /// Program evaluated once per step
    pub program: NodeSpec,
}

/// Initial value of one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialValue {
    /// Location
    pub location: Location,
    /// Value
    pub value: Value,
}

impl Specification {
    /// Create an empty specification
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declarations: Vec::new(),
            rules: Vec::new(),
            agents: Vec::new(),
            initial_state: Vec::new(),
        }
    }

    /// Add a declaration
    pub fn declare(mut self, name: &str, kind: DeclarationKind) -> Self {
        self.declarations.push(Declaration::new(name, kind));
        self
    }

    /// Add a named rule
    pub fn rule(mut self, name: &str, params: &[&str], body: NodeSpec) -> Self {
        self.rules.push(RuleSpec {
            name: name.to_string(),
            params: params.iter().map(|param| param.to_string()).collect(),
            body,
        });
        self
    }

    /// Add an agent
    pub fn agent(mut self, name: &str, program: NodeSpec) -> Self {
        self.agents.push(AgentSpec {
            name: name.to_string(),
            program,
        });
        self
    }

    /// Add an initial location value
    pub fn initially(mut self, location: Location, value: Value) -> Self {
        self.initial_state.push(InitialValue { location, value });
        self
    }

    /// Parse a specification from JSON text
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("Failed to parse specification")
    }

    /// Read a specification from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read specification: {:?}", path))?;
        Self::from_json_str(&text).with_context(|| format!("Invalid specification: {:?}", path))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize specification")
    }
}

/// An agent's program, bound and ready to evaluate
#[derive(Debug, Clone)]
pub struct AgentProgram {
    /// Agent identity
    pub id: AgentId,
    /// Bound program arena; every step evaluates a fresh copy
    pub ast: Ast,
    /// Root of the program
    pub root: NodeId,
}

/// Result of loading a specification
#[derive(Debug, Clone)]
pub struct LoadedSpecification {
    /// Specification name
    pub name: String,
    /// Declared identifiers
    pub signature: Signature,
    /// Bound rule templates
    pub rules: RuleLibrary,
    /// Agents in declaration order
    pub agents: Vec<AgentProgram>,
    /// State before the first step
    pub initial_state: State,
}

/// Check, build and bind a specification.
pub fn load_specification(spec: &Specification, table: &DispatchTable) -> Result<LoadedSpecification> {
    let mut signature = Signature::new();
    for (keyword, plugins) in &table.lexicon().keywords {
        let plugin = plugins.iter().next().map(String::as_str).unwrap_or_default();
        signature.reserve(keyword.clone(), plugin);
    }
    for declaration in &spec.declarations {
        signature.declare(declaration)?;
    }
    for rule in &spec.rules {
        signature.declare(&Declaration::new(rule.name.clone(), DeclarationKind::Rule))?;
    }

    let mut rules = RuleLibrary::new();
    for rule in &spec.rules {
        let (mut ast, root) = build_ast(&rule.body);
        ast.bind(table)?;
        rules.insert(
            rule.name.clone(),
            RuleTemplate {
                params: rule.params.clone(),
                ast,
                root,
            },
        );
    }

    let mut seen = BTreeSet::new();
    let mut agents = Vec::with_capacity(spec.agents.len());
    for agent in &spec.agents {
        if !seen.insert(agent.name.as_str()) {
            return Err(EngineError::DuplicateAgent(agent.name.clone()));
        }
        let (mut ast, root) = build_ast(&agent.program);
        ast.bind(table)?;
        agents.push(AgentProgram {
            id: AgentId::new(agent.name.clone()),
            ast,
            root,
        });
    }

    let mut initial_state = State::new();
    for entry in &spec.initial_state {
        initial_state.write(entry.location.clone(), entry.value.clone());
    }

    tracing::debug!(
        "loaded specification {} ({} rules, {} agents)",
        spec.name,
        rules.len(),
        agents.len()
    );
    Ok(LoadedSpecification {
        name: spec.name.clone(),
        signature,
        rules,
        agents,
        initial_state,
    })
}
