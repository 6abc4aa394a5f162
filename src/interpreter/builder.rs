//! Construction of node arenas from parser output.
//!
//! The external parser hands over finished trees as [`NodeSpec`] values
//! (usually deserialized from JSON). The constructor functions at the bottom
//! build the same trees programmatically for the built-in node kinds.

use serde::{Deserialize, Serialize};

use super::ast::{Ast, GrammarClass, NodeId, SourcePosition};
use crate::plugins::{chooserule, collection, forallrule, kernel, turboasm};

/// Serializable description of a node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Grammar class.
    pub class: GrammarClass,
    /// Node kind used for handler dispatch.
    pub kind: String,
    /// Token text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Source position.
    #[serde(default)]
    pub position: SourcePosition,
    /// Ordered children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildSpec>,
}

/// Child entry of a [`NodeSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Slot name for named children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    /// The child tree.
    pub node: NodeSpec,
}

impl NodeSpec {
    /// Create a childless node.
    pub fn new(class: GrammarClass, kind: impl Into<String>) -> Self {
        Self {
            class,
            kind: kind.into(),
            token: None,
            position: SourcePosition::default(),
            children: Vec::new(),
        }
    }

    /// Rule-class node.
    pub fn rule(kind: impl Into<String>) -> Self {
        Self::new(GrammarClass::Rule, kind)
    }

    /// Expression-class node.
    pub fn term(kind: impl Into<String>) -> Self {
        Self::new(GrammarClass::Expression, kind)
    }

    /// Set the token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the source position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = SourcePosition::new(line, column);
        self
    }

    /// Append an unnamed child.
    pub fn child(mut self, node: NodeSpec) -> Self {
        self.children.push(ChildSpec { slot: None, node });
        self
    }

    /// Append a child in a named slot.
    pub fn slot(mut self, name: impl Into<String>, node: NodeSpec) -> Self {
        self.children.push(ChildSpec {
            slot: Some(name.into()),
            node,
        });
        self
    }

    /// Append a named child when present.
    pub fn slot_opt(self, name: impl Into<String>, node: Option<NodeSpec>) -> Self {
        match node {
            Some(node) => self.slot(name, node),
            None => self,
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.node.size())
            .sum::<usize>()
    }
}

impl Ast {
    /// Append a tree to the arena, returning its root.
    pub fn append(&mut self, spec: &NodeSpec) -> NodeId {
        let id = self.add_node(spec.class, spec.kind.clone(), spec.token.clone(), spec.position);
        for child in &spec.children {
            let child_id = self.append(&child.node);
            self.add_child(id, child.slot.as_deref(), child_id);
        }
        id
    }
}

/// Build a fresh arena holding a single tree.
pub fn build_ast(spec: &NodeSpec) -> (Ast, NodeId) {
    let mut ast = Ast::new();
    let root = ast.append(spec);
    (ast, root)
}

// ---- constructors for the built-in kinds ----

/// Integer literal.
pub fn int(value: i64) -> NodeSpec {
    NodeSpec::term(kernel::NUMBER_TERM).token(value.to_string())
}

/// Boolean literal.
pub fn boolean(value: bool) -> NodeSpec {
    NodeSpec::term(kernel::BOOLEAN_TERM).token(value.to_string())
}

/// String literal.
pub fn string(value: &str) -> NodeSpec {
    NodeSpec::term(kernel::STRING_TERM).token(value)
}

/// The `undef` literal.
pub fn undef() -> NodeSpec {
    NodeSpec::term(kernel::UNDEF_TERM)
}

/// Named element literal.
pub fn element(name: &str) -> NodeSpec {
    NodeSpec::term(kernel::ELEMENT_TERM).token(name)
}

/// Identifier: a bound variable, `self`, or a nullary location.
pub fn ident(name: &str) -> NodeSpec {
    NodeSpec::term(kernel::FUNCTION_RULE_TERM).token(name)
}

/// Function application `name(args..)`.
pub fn func(name: &str, args: Vec<NodeSpec>) -> NodeSpec {
    args.into_iter()
        .fold(ident(name), |node, arg| node.child(arg))
}

/// Binary operator application.
pub fn binary(op: &str, left: NodeSpec, right: NodeSpec) -> NodeSpec {
    NodeSpec::term(kernel::BINARY_EXPRESSION)
        .token(op)
        .child(left)
        .child(right)
}

/// Boolean negation.
pub fn not(operand: NodeSpec) -> NodeSpec {
    NodeSpec::term(kernel::NOT_EXPRESSION).child(operand)
}

/// Set literal `{a, b, ..}`.
pub fn set(items: Vec<NodeSpec>) -> NodeSpec {
    items
        .into_iter()
        .fold(NodeSpec::term(collection::SET_TERM), |node, item| node.child(item))
}

/// List literal `[a, b, ..]`.
pub fn list(items: Vec<NodeSpec>) -> NodeSpec {
    items
        .into_iter()
        .fold(NodeSpec::term(collection::LIST_TERM), |node, item| node.child(item))
}

/// `skip`.
pub fn skip() -> NodeSpec {
    NodeSpec::rule(kernel::SKIP_RULE)
}

/// `lhs := rhs`.
pub fn update(lhs: NodeSpec, rhs: NodeSpec) -> NodeSpec {
    NodeSpec::rule(kernel::UPDATE_RULE)
        .slot(kernel::LHS_SLOT, lhs)
        .slot(kernel::RHS_SLOT, rhs)
}

/// Parallel block `par R1 .. Rn endpar`.
pub fn block(rules: Vec<NodeSpec>) -> NodeSpec {
    rules
        .into_iter()
        .fold(NodeSpec::rule(kernel::BLOCK_RULE), |node, rule| node.child(rule))
}

/// `if guard then R1 [else R2]`.
pub fn if_then(guard: NodeSpec, then: NodeSpec, otherwise: Option<NodeSpec>) -> NodeSpec {
    NodeSpec::rule(kernel::CONDITIONAL_RULE)
        .slot(kernel::GUARD_SLOT, guard)
        .slot(kernel::THEN_SLOT, then)
        .slot_opt(kernel::ELSE_SLOT, otherwise)
}

/// `let var = value in body`.
pub fn let_in(var: &str, value: NodeSpec, body: NodeSpec) -> NodeSpec {
    NodeSpec::rule(kernel::LET_RULE)
        .token(var)
        .slot(kernel::VALUE_SLOT, value)
        .slot(kernel::BODY_SLOT, body)
}

/// Invocation of a declared rule.
pub fn call(rule: &str, args: Vec<NodeSpec>) -> NodeSpec {
    args.into_iter()
        .fold(NodeSpec::rule(kernel::RULE_CALL).token(rule), |node, arg| {
            node.child(arg)
        })
}

/// `choose var in domain [with guard] do body [ifnone otherwise]`.
pub fn choose(
    var: &str,
    domain: NodeSpec,
    guard: Option<NodeSpec>,
    body: NodeSpec,
    ifnone: Option<NodeSpec>,
) -> NodeSpec {
    NodeSpec::rule(chooserule::CHOOSE_RULE)
        .token(var)
        .slot(chooserule::DOMAIN_SLOT, domain)
        .slot_opt(chooserule::GUARD_SLOT, guard)
        .slot(chooserule::DO_RULE_SLOT, body)
        .slot_opt(chooserule::IFNONE_RULE_SLOT, ifnone)
}

/// `pick var in domain [with guard] [term]`.
pub fn pick(
    var: &str,
    domain: NodeSpec,
    guard: Option<NodeSpec>,
    term: Option<NodeSpec>,
) -> NodeSpec {
    NodeSpec::term(chooserule::PICK_EXP)
        .token(var)
        .slot(chooserule::DOMAIN_SLOT, domain)
        .slot_opt(chooserule::GUARD_SLOT, guard)
        .slot_opt(chooserule::TERM_SLOT, term)
}

/// `forall var in domain [with guard] do body [ifnone otherwise]`.
pub fn forall(
    var: &str,
    domain: NodeSpec,
    guard: Option<NodeSpec>,
    body: NodeSpec,
    ifnone: Option<NodeSpec>,
) -> NodeSpec {
    NodeSpec::rule(forallrule::FORALL_RULE)
        .token(var)
        .slot(forallrule::DOMAIN_SLOT, domain)
        .slot_opt(forallrule::GUARD_SLOT, guard)
        .slot(forallrule::DO_RULE_SLOT, body)
        .slot_opt(forallrule::IFNONE_RULE_SLOT, ifnone)
}

/// Sequential block `seq R1 .. Rn endseq`.
pub fn seq(rules: Vec<NodeSpec>) -> NodeSpec {
    rules
        .into_iter()
        .fold(NodeSpec::rule(turboasm::SEQ_BLOCK_RULE), |node, rule| {
            node.child(rule)
        })
}

/// `add element to target`.
pub fn add_to(element: NodeSpec, target: NodeSpec) -> NodeSpec {
    NodeSpec::rule(collection::ADD_RULE)
        .slot(collection::ELEMENT_SLOT, element)
        .slot(collection::TARGET_SLOT, target)
}

/// `remove element from target`.
pub fn remove_from(element: NodeSpec, target: NodeSpec) -> NodeSpec {
    NodeSpec::rule(collection::REMOVE_RULE)
        .slot(collection::ELEMENT_SLOT, element)
        .slot(collection::TARGET_SLOT, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ast_preserves_shape() {
        let spec = choose(
            "x",
            set(vec![int(1), int(2)]),
            Some(binary(">", ident("x"), int(1))),
            update(ident("out"), ident("x")),
            None,
        );
        let (ast, root) = build_ast(&spec);

        assert_eq!(ast.len(), spec.size());
        assert_eq!(ast.node(root).token(), Some("x"));
        let domain = ast.child(root, chooserule::DOMAIN_SLOT).unwrap();
        assert_eq!(ast.unnamed_children(domain).len(), 2);
        assert!(ast.child(root, chooserule::IFNONE_RULE_SLOT).is_none());
    }

    #[test]
    fn test_node_spec_json_shape() {
        let spec = update(ident("x"), int(1)).at(3, 5);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "UpdateRule");
        assert_eq!(json["position"]["line"], 3);

        let parsed: NodeSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, spec);
    }
}
