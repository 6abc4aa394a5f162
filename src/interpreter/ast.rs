use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::value::Value;
use crate::runtime::error::EngineError;
use crate::runtime::registry::{DispatchTable, HandlerIndex};
use crate::runtime::state::UpdateMultiset;

/// Handle of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of a node in the specification text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based line (0 when unknown).
    pub line: u32,
    /// 1-based column (0 when unknown).
    pub column: u32,
}

impl SourcePosition {
    /// Create a position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Broad grammatical category of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrammarClass {
    /// Top-level declaration.
    Declaration,
    /// Rule producing updates.
    Rule,
    /// Term producing a value.
    Expression,
}

/// Evaluation status of a node within one evaluation round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalStatus {
    /// Not evaluated yet (or cleared).
    #[default]
    Unevaluated,
    /// Carries its final value/updates.
    Evaluated,
}

#[derive(Debug, Clone)]
struct Child {
    slot: Option<String>,
    node: NodeId,
}

/// A single AST element with its evaluation state.
#[derive(Debug, Clone)]
pub struct Node {
    class: GrammarClass,
    kind: String,
    token: Option<String>,
    position: SourcePosition,
    children: Vec<Child>,
    parent: Option<NodeId>,
    handler: Option<HandlerIndex>,
    status: EvalStatus,
    value: Option<Value>,
    updates: Option<UpdateMultiset>,
}

impl Node {
    /// Grammar class.
    pub fn class(&self) -> GrammarClass {
        self.class
    }

    /// Concrete construct, e.g. `ChooseRule`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Token text (identifier, operator, literal).
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Source position.
    pub fn position(&self) -> SourcePosition {
        self.position
    }

    /// Handler resolved for this node's kind, once bound.
    pub fn handler(&self) -> Option<HandlerIndex> {
        self.handler
    }

    /// Current evaluation status.
    pub fn status(&self) -> EvalStatus {
        self.status
    }
}

/// Arena of nodes addressed by [`NodeId`].
///
/// Children are owned through the arena; parent links are back-references
/// kept for scope walking and diagnostics only.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a detached node.
    pub fn add_node(
        &mut self,
        class: GrammarClass,
        kind: impl Into<String>,
        token: Option<String>,
        position: SourcePosition,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            class,
            kind: kind.into(),
            token,
            position,
            children: Vec::new(),
            parent: None,
            handler: None,
            status: EvalStatus::Unevaluated,
            value: None,
            updates: None,
        });
        id
    }

    /// Attach `child` under `parent`, optionally in a named slot.
    pub fn add_child(&mut self, parent: NodeId, slot: Option<&str>, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(Child {
            slot: slot.map(str::to_string),
            node: child,
        });
    }

    /// Borrow a node. Ids are only ever produced by this arena.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Child stored in a named slot.
    pub fn child(&self, id: NodeId, slot: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .find(|child| child.slot.as_deref() == Some(slot))
            .map(|child| child.node)
    }

    /// All children in declared order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).children.iter().map(|child| child.node).collect()
    }

    /// Children without a slot name, in declared order.
    pub fn unnamed_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .filter(|child| child.slot.is_none())
            .map(|child| child.node)
            .collect()
    }

    /// Parent back-reference.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Whether the node carries its final result.
    pub fn is_evaluated(&self, id: NodeId) -> bool {
        self.node(id).status == EvalStatus::Evaluated
    }

    /// Computed value, if any.
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.node(id).value.as_ref()
    }

    /// Computed update multiset, if any.
    pub fn updates(&self, id: NodeId) -> Option<&UpdateMultiset> {
        self.node(id).updates.as_ref()
    }

    /// Store the node's result and mark it evaluated.
    pub fn set_result(
        &mut self,
        id: NodeId,
        value: Option<Value>,
        updates: Option<UpdateMultiset>,
    ) {
        let node = &mut self.nodes[id.index()];
        node.value = value;
        node.updates = updates;
        node.status = EvalStatus::Evaluated;
    }

    /// Reset the node and every descendant to `Unevaluated`.
    pub fn clear_tree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let node = &mut self.nodes[current.index()];
            node.status = EvalStatus::Unevaluated;
            node.value = None;
            node.updates = None;
            pending.extend(node.children.iter().map(|child| child.node));
        }
    }

    /// Copy the subtree rooted at `root` of `template` into this arena.
    ///
    /// The copy gets fresh ids and a clean evaluation state; handler bindings
    /// are carried over.
    pub fn instantiate(&mut self, template: &Ast, root: NodeId) -> NodeId {
        let source = template.node(root);
        let copy = self.add_node(
            source.class,
            source.kind.clone(),
            source.token.clone(),
            source.position,
        );
        self.nodes[copy.index()].handler = source.handler;
        for child in &source.children {
            let child_copy = self.instantiate(template, child.node);
            self.add_child(copy, child.slot.as_deref(), child_copy);
        }
        copy
    }

    /// Resolve every node's kind to its handler.
    ///
    /// Each distinct kind is looked up once; an unknown kind is fatal.
    pub fn bind(&mut self, table: &DispatchTable) -> Result<(), EngineError> {
        let mut resolved: HashMap<String, HandlerIndex> = HashMap::new();
        for node in &mut self.nodes {
            if node.handler.is_some() {
                continue;
            }
            let index = match resolved.get(&node.kind) {
                Some(index) => *index,
                None => {
                    let index = table.resolve(&node.kind).ok_or_else(|| {
                        EngineError::UnregisteredNodeKind {
                            kind: node.kind.clone(),
                            position: node.position,
                        }
                    })?;
                    resolved.insert(node.kind.clone(), index);
                    index
                }
            };
            node.handler = Some(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Ast, NodeId, NodeId, NodeId) {
        let mut ast = Ast::new();
        let pos = SourcePosition::new(1, 1);
        let root = ast.add_node(GrammarClass::Rule, "BlockRule", None, pos);
        let left = ast.add_node(GrammarClass::Expression, "NumberTerm", Some("1".into()), pos);
        let right = ast.add_node(GrammarClass::Expression, "NumberTerm", Some("2".into()), pos);
        ast.add_child(root, None, left);
        ast.add_child(root, Some("guard"), right);
        (ast, root, left, right)
    }

    #[test]
    fn test_slots_and_parents() {
        let (ast, root, left, right) = sample();
        assert_eq!(ast.child(root, "guard"), Some(right));
        assert_eq!(ast.unnamed_children(root), vec![left]);
        assert_eq!(ast.children(root), vec![left, right]);
        assert_eq!(ast.parent(right), Some(root));
    }

    #[test]
    fn test_clear_tree_resets_descendants() {
        let (mut ast, root, left, right) = sample();
        ast.set_result(left, Some(Value::Integer(1)), None);
        ast.set_result(right, Some(Value::Integer(2)), None);
        ast.set_result(root, None, Some(UpdateMultiset::new()));

        ast.clear_tree(root);
        for id in [root, left, right] {
            assert!(!ast.is_evaluated(id));
            assert!(ast.value(id).is_none());
            assert!(ast.updates(id).is_none());
        }
    }

    #[test]
    fn test_instantiate_copies_with_fresh_state() {
        let (mut template, root, left, _) = sample();
        template.set_result(left, Some(Value::Integer(1)), None);

        let mut target = Ast::new();
        let copy = target.instantiate(&template, root);
        assert_eq!(target.len(), 3);
        assert_eq!(target.node(copy).kind(), "BlockRule");
        assert!(target.child(copy, "guard").is_some());
        assert!(target.children(copy).iter().all(|id| !target.is_evaluated(*id)));
    }
}
