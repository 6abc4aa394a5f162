//! Capability interfaces handed to node handlers, and the per-invocation
//! context that implements them.
//!
//! Handlers only ever see `&mut dyn Evaluation`, so plugin code is written
//! against node, scope and state capabilities rather than concrete engine
//! types. One `EvalContext` exists per agent per engine step and owns every
//! piece of mutable evaluation state of that invocation: the working node
//! arena, the environment, the scratch frames of re-entrant constructs and
//! the sequential-composition overlays.

use rand::Rng;
use rand::rngs::StdRng;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::ast::{Ast, NodeId, SourcePosition};
use super::environment::{Environment, ScopeHandle};
use super::value::Value;
use crate::runtime::error::{EngineError, EvalError, EvalResult, SpecificationError};
use crate::runtime::state::{Location, State, UpdateMultiset};
use crate::runtime::step::{AgentId, InvocationId};

/// Read/write access to the node tree under evaluation.
pub trait TreeAccess {
    /// Node kind.
    fn kind(&self, node: NodeId) -> &str;
    /// Token text.
    fn token(&self, node: NodeId) -> Option<&str>;
    /// Source position.
    fn position(&self, node: NodeId) -> SourcePosition;
    /// Child in a named slot.
    fn child(&self, node: NodeId, slot: &str) -> Option<NodeId>;
    /// Children without a slot name, in order.
    fn unnamed_children(&self, node: NodeId) -> Vec<NodeId>;
    /// Whether the node carries its final result.
    fn is_evaluated(&self, node: NodeId) -> bool;
    /// Computed value.
    fn value(&self, node: NodeId) -> Option<&Value>;
    /// Computed update multiset.
    fn updates(&self, node: NodeId) -> Option<&UpdateMultiset>;
    /// Store a result and mark the node evaluated.
    fn set_result(&mut self, node: NodeId, value: Option<Value>, updates: Option<UpdateMultiset>);
    /// Reset the node and its descendants to unevaluated.
    fn clear_tree(&mut self, node: NodeId);
    /// Parameter names of a declared rule.
    fn rule_parameters(&self, rule: &str) -> Option<Vec<String>>;
    /// Attach a fresh instance of a declared rule's body under `parent`.
    ///
    /// Returns the instance root, or `None` when no rule of that name is
    /// declared.
    fn instantiate_rule(&mut self, parent: NodeId, slot: &str, rule: &str) -> Option<NodeId>;
}

/// Access to the variable environment.
pub trait ScopeAccess {
    /// Bind a variable in a new innermost scope.
    fn bind(&mut self, name: &str, value: Value) -> ScopeHandle;
    /// Pop the innermost scope.
    fn unbind(&mut self, handle: ScopeHandle) -> EvalResult<Value>;
    /// Look a variable up.
    fn lookup(&self, name: &str) -> Option<&Value>;
    /// Number of live scopes.
    fn scope_depth(&self) -> usize;
}

/// Read access to the state as of the start of the step.
pub trait StateAccess {
    /// Read a location through the active overlays.
    fn read(&self, location: &Location) -> Value;
    /// Agent this evaluation runs for.
    fn agent(&self) -> &AgentId;
    /// Install (or replace) the overlay owned by `owner`.
    fn set_overlay(&mut self, owner: NodeId, writes: BTreeMap<Location, Value>);
    /// Remove the overlay owned by `owner`.
    fn drop_overlay(&mut self, owner: NodeId);
}

/// Everything a node handler may use.
pub trait Evaluation: TreeAccess + ScopeAccess + StateAccess {
    /// Uniform random index in `0..bound` (`bound > 0`).
    fn random_index(&mut self, bound: usize) -> usize;
    /// Per-invocation frames of re-entrant constructs.
    fn scratch(&mut self) -> &mut Scratch;
    /// Identifier of this invocation.
    fn invocation(&self) -> InvocationId;
}

/// Build a specification error located at `node`.
pub fn spec_error<E>(eval: &E, node: NodeId, message: impl Into<String>) -> EvalError
where
    E: TreeAccess + ?Sized,
{
    EvalError::Specification(SpecificationError {
        kind: eval.kind(node).to_string(),
        position: eval.position(node),
        message: message.into(),
    })
}

/// Value of an evaluated child, UNDEF when the child produced none.
pub fn value_of<E>(eval: &E, node: NodeId) -> Value
where
    E: TreeAccess + ?Sized,
{
    eval.value(node).cloned().unwrap_or(Value::Undef)
}

/// Updates of an evaluated child, empty when the child produced none.
pub fn updates_of<E>(eval: &E, node: NodeId) -> UpdateMultiset
where
    E: TreeAccess + ?Sized,
{
    eval.updates(node).cloned().unwrap_or_default()
}

/// First node of `nodes` that is not yet evaluated.
pub fn first_unevaluated<E>(eval: &E, nodes: &[NodeId]) -> Option<NodeId>
where
    E: TreeAccess + ?Sized,
{
    nodes.iter().copied().find(|node| !eval.is_evaluated(*node))
}

/// Frames of re-entrant constructs, keyed by node within one invocation.
#[derive(Default)]
pub struct Scratch {
    frames: HashMap<NodeId, Box<dyn Any + Send>>,
}

impl Scratch {
    /// Frame stored for `node`, if it has the requested type.
    pub fn get_mut<T: Any + Send>(&mut self, node: NodeId) -> Option<&mut T> {
        self.frames.get_mut(&node)?.downcast_mut::<T>()
    }

    /// Store a frame for `node`, replacing any previous one.
    pub fn insert<T: Any + Send>(&mut self, node: NodeId, frame: T) {
        self.frames.insert(node, Box::new(frame));
    }

    /// Remove and return the frame for `node`.
    pub fn take<T: Any + Send>(&mut self, node: NodeId) -> Option<T> {
        let frame = self.frames.remove(&node)?;
        frame.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Drop whatever frame `node` holds.
    pub fn discard(&mut self, node: NodeId) {
        self.frames.remove(&node);
    }

    /// Number of live frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frame is live.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every frame (abort path).
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Body template of a declared rule.
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    /// Parameter names, bound by value on invocation.
    pub params: Vec<String>,
    /// Arena holding the body.
    pub ast: Ast,
    /// Root of the body inside `ast`.
    pub root: NodeId,
}

/// Declared rules available for invocation.
#[derive(Debug, Clone, Default)]
pub struct RuleLibrary {
    rules: HashMap<String, Arc<RuleTemplate>>,
}

impl RuleLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule template.
    pub fn insert(&mut self, name: impl Into<String>, template: RuleTemplate) {
        self.rules.insert(name.into(), Arc::new(template));
    }

    /// Look a rule up.
    pub fn get(&self, name: &str) -> Option<&Arc<RuleTemplate>> {
        self.rules.get(name)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rule is declared.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Concrete evaluation context for one agent invocation.
pub struct EvalContext<'s> {
    agent: AgentId,
    invocation: InvocationId,
    ast: Ast,
    state: &'s State,
    rules: &'s RuleLibrary,
    env: Environment,
    scratch: Scratch,
    overlays: Vec<(NodeId, BTreeMap<Location, Value>)>,
    rng: StdRng,
}

impl<'s> EvalContext<'s> {
    /// Create a context evaluating `ast` for `agent` against `state`.
    pub fn new(
        agent: AgentId,
        ast: Ast,
        state: &'s State,
        rules: &'s RuleLibrary,
        rng: StdRng,
    ) -> Self {
        Self {
            agent,
            invocation: InvocationId::new(),
            ast,
            state,
            rules,
            env: Environment::new(),
            scratch: Scratch::default(),
            overlays: Vec::new(),
            rng,
        }
    }

    /// Agent this context evaluates for.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent
    }

    /// Node arena under evaluation.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Environment of this invocation.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Live scratch frames.
    pub fn pending_frames(&self) -> usize {
        self.scratch.len()
    }

    /// Number of live overlays.
    pub fn overlay_depth(&self) -> usize {
        self.overlays.len()
    }

    /// Drop scopes, frames and overlays.
    pub fn reset(&mut self) {
        self.env.clear();
        self.scratch.clear();
        self.overlays.clear();
    }
}

impl TreeAccess for EvalContext<'_> {
    fn kind(&self, node: NodeId) -> &str {
        self.ast.node(node).kind()
    }

    fn token(&self, node: NodeId) -> Option<&str> {
        self.ast.node(node).token()
    }

    fn position(&self, node: NodeId) -> SourcePosition {
        self.ast.node(node).position()
    }

    fn child(&self, node: NodeId, slot: &str) -> Option<NodeId> {
        self.ast.child(node, slot)
    }

    fn unnamed_children(&self, node: NodeId) -> Vec<NodeId> {
        self.ast.unnamed_children(node)
    }

    fn is_evaluated(&self, node: NodeId) -> bool {
        self.ast.is_evaluated(node)
    }

    fn value(&self, node: NodeId) -> Option<&Value> {
        self.ast.value(node)
    }

    fn updates(&self, node: NodeId) -> Option<&UpdateMultiset> {
        self.ast.updates(node)
    }

    fn set_result(&mut self, node: NodeId, value: Option<Value>, updates: Option<UpdateMultiset>) {
        self.ast.set_result(node, value, updates);
    }

    fn clear_tree(&mut self, node: NodeId) {
        self.ast.clear_tree(node);
    }

    fn rule_parameters(&self, rule: &str) -> Option<Vec<String>> {
        self.rules.get(rule).map(|template| template.params.clone())
    }

    fn instantiate_rule(&mut self, parent: NodeId, slot: &str, rule: &str) -> Option<NodeId> {
        let rules = self.rules;
        let template = rules.get(rule)?;
        let instance = self.ast.instantiate(&template.ast, template.root);
        self.ast.add_child(parent, Some(slot), instance);
        Some(instance)
    }
}

impl ScopeAccess for EvalContext<'_> {
    fn bind(&mut self, name: &str, value: Value) -> ScopeHandle {
        self.env.push(name, value)
    }

    fn unbind(&mut self, handle: ScopeHandle) -> EvalResult<Value> {
        self.env
            .pop(handle)
            .map_err(|err| EvalError::Fatal(EngineError::Internal(err.to_string())))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.env.lookup(name)
    }

    fn scope_depth(&self) -> usize {
        self.env.depth()
    }
}

impl StateAccess for EvalContext<'_> {
    fn read(&self, location: &Location) -> Value {
        for (_, writes) in self.overlays.iter().rev() {
            if let Some(value) = writes.get(location) {
                return value.clone();
            }
        }
        self.state.read(location)
    }

    fn agent(&self) -> &AgentId {
        &self.agent
    }

    fn set_overlay(&mut self, owner: NodeId, writes: BTreeMap<Location, Value>) {
        match self.overlays.iter_mut().find(|(id, _)| *id == owner) {
            Some(entry) => entry.1 = writes,
            None => self.overlays.push((owner, writes)),
        }
    }

    fn drop_overlay(&mut self, owner: NodeId) {
        self.overlays.retain(|(id, _)| *id != owner);
    }
}

impl Evaluation for EvalContext<'_> {
    fn random_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }

    fn scratch(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    fn invocation(&self) -> InvocationId {
        self.invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builder::{build_ast, ident};
    use rand::SeedableRng;

    #[test]
    fn test_scratch_typed_frames() {
        let mut scratch = Scratch::default();
        scratch.insert(NodeId(3), vec![1u8, 2]);
        assert!(scratch.get_mut::<String>(NodeId(3)).is_none());
        scratch.get_mut::<Vec<u8>>(NodeId(3)).unwrap().push(3);
        assert_eq!(scratch.take::<Vec<u8>>(NodeId(3)), Some(vec![1, 2, 3]));
        assert!(scratch.is_empty());
    }

    #[test]
    fn test_overlays_shadow_state() {
        let mut state = State::new();
        let x = Location::nullary("x");
        state.write(x.clone(), Value::Integer(1));
        let rules = RuleLibrary::new();
        let (ast, root) = build_ast(&ident("x"));

        let mut ctx = EvalContext::new(
            AgentId::new("a"),
            ast,
            &state,
            &rules,
            StdRng::seed_from_u64(7),
        );
        assert_eq!(ctx.read(&x), Value::Integer(1));

        ctx.set_overlay(root, BTreeMap::from([(x.clone(), Value::Integer(2))]));
        assert_eq!(ctx.read(&x), Value::Integer(2));
        ctx.set_overlay(root, BTreeMap::from([(x.clone(), Value::Integer(3))]));
        assert_eq!(ctx.overlay_depth(), 1);
        assert_eq!(ctx.read(&x), Value::Integer(3));

        ctx.drop_overlay(root);
        assert_eq!(ctx.read(&x), Value::Integer(1));
    }

    #[test]
    fn test_random_index_in_bounds() {
        let state = State::new();
        let rules = RuleLibrary::new();
        let (ast, _) = build_ast(&ident("x"));
        let mut ctx = EvalContext::new(
            AgentId::new("a"),
            ast,
            &state,
            &rules,
            StdRng::seed_from_u64(1),
        );
        for _ in 0..100 {
            assert!(ctx.random_index(3) < 3);
        }
    }
}
