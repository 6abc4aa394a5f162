//! Set and list literals and the partial set-update rules.

use std::sync::Arc;

use super::kernel::target_location;
use crate::interpreter::ast::NodeId;
use crate::interpreter::context::{Evaluation, first_unevaluated, spec_error, value_of};
use crate::interpreter::value::Value;
use crate::runtime::error::EvalResult;
use crate::runtime::registry::{NodeHandler, Plugin};
use crate::runtime::state::{Update, UpdateAction, UpdateMultiset};

/// `{a, b, ..}`.
pub const SET_TERM: &str = "SetTerm";
/// `[a, b, ..]`.
pub const LIST_TERM: &str = "ListTerm";
/// `add e to f(..)`.
pub const ADD_RULE: &str = "AddRule";
/// `remove e from f(..)`.
pub const REMOVE_RULE: &str = "RemoveRule";

/// Element added or removed.
pub const ELEMENT_SLOT: &str = "element";
/// Location holding the set.
pub const TARGET_SLOT: &str = "target";

/// Plugin providing collection literals and set updates.
pub struct CollectionPlugin;

impl Plugin for CollectionPlugin {
    fn name(&self) -> &'static str {
        "CollectionPlugin"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["add", "to", "remove", "from"]
    }

    fn operators(&self) -> &'static [&'static str] {
        &["{", "}", "[", "]", ","]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![
            (SET_TERM, Arc::new(Literal::Set) as Arc<dyn NodeHandler>),
            (LIST_TERM, Arc::new(Literal::List)),
            (ADD_RULE, Arc::new(SetUpdate(UpdateAction::AddToSet))),
            (REMOVE_RULE, Arc::new(SetUpdate(UpdateAction::RemoveFromSet))),
        ]
    }
}

enum Literal {
    Set,
    List,
}

impl NodeHandler for Literal {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let items = eval.unnamed_children(pos);
        if let Some(next) = first_unevaluated(eval, &items) {
            return Ok(next);
        }
        let values = items.iter().map(|item| value_of(eval, *item));
        let value = match self {
            Literal::Set => Value::set(values),
            Literal::List => Value::List(values.collect()),
        };
        eval.set_result(pos, Some(value), None);
        Ok(pos)
    }
}

struct SetUpdate(UpdateAction);

impl NodeHandler for SetUpdate {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let (Some(element), Some(target)) =
            (eval.child(pos, ELEMENT_SLOT), eval.child(pos, TARGET_SLOT))
        else {
            return Err(spec_error(eval, pos, "Set update needs an element and a target."));
        };
        if !eval.is_evaluated(element) {
            return Ok(element);
        }
        let location = match target_location(eval, target)? {
            Ok(location) => location,
            Err(next) => return Ok(next),
        };
        let current = eval.read(&location);
        if !matches!(current, Value::Set(_) | Value::Undef) {
            return Err(spec_error(
                eval,
                target,
                format!("{} does not hold a set but {}.", location, current.denotation()),
            ));
        }
        let update = Update {
            location,
            value: value_of(eval, element),
            agent: eval.agent().clone(),
            action: self.0,
        };
        eval.set_result(pos, None, Some(UpdateMultiset::single(update)));
        Ok(pos)
    }
}
