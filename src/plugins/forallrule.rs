//! `forall` rule: parallel union over every element satisfying the guard.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::interpreter::ast::NodeId;
use crate::interpreter::context::{Evaluation, spec_error, updates_of, value_of};
use crate::interpreter::environment::ScopeHandle;
use crate::interpreter::value::Value;
use crate::runtime::error::EvalResult;
use crate::runtime::registry::{NodeHandler, Plugin};
use crate::runtime::state::UpdateMultiset;

/// `forall x in E [with C] do R [ifnone R2]`.
pub const FORALL_RULE: &str = "ForallRule";

/// Domain expression.
pub const DOMAIN_SLOT: &str = "domain";
/// Optional guard.
pub const GUARD_SLOT: &str = "guard";
/// Body run once per satisfying element.
pub const DO_RULE_SLOT: &str = "do";
/// Fallback when no element satisfies the guard.
pub const IFNONE_RULE_SLOT: &str = "ifnone";

/// Plugin providing `forall`.
pub struct ForallRulePlugin;

impl Plugin for ForallRulePlugin {
    fn name(&self) -> &'static str {
        "ForallRulePlugin"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["forall", "in", "with", "do", "ifnone", "endforall"]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![(FORALL_RULE, Arc::new(ForallRule) as Arc<dyn NodeHandler>)]
    }
}

struct ForallFrame {
    remaining: VecDeque<Value>,
    binding: Option<ScopeHandle>,
    matched: usize,
    acc: UpdateMultiset,
}

struct ForallRule;

impl NodeHandler for ForallRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let Some(var) = eval.token(pos).map(str::to_string) else {
            return Err(spec_error(eval, pos, "Missing variable name."));
        };
        let (Some(domain), Some(body)) = (eval.child(pos, DOMAIN_SLOT), eval.child(pos, DO_RULE_SLOT))
        else {
            return Err(spec_error(eval, pos, "Forall rule needs a domain and a body."));
        };
        let guard = eval.child(pos, GUARD_SLOT);
        let ifnone = eval.child(pos, IFNONE_RULE_SLOT);

        if let Some(ifnone) = ifnone.filter(|node| eval.is_evaluated(*node)) {
            let updates = updates_of(eval, ifnone);
            eval.set_result(pos, None, Some(updates));
            return Ok(pos);
        }
        if !eval.is_evaluated(domain) {
            eval.scratch().discard(pos);
            return Ok(domain);
        }

        let mut frame = match eval.scratch().take::<ForallFrame>(pos) {
            Some(frame) => frame,
            None => {
                let value = value_of(eval, domain);
                let members = value.as_enumerable().ok_or_else(|| {
                    spec_error(
                        eval,
                        domain,
                        format!(
                            "Cannot iterate over {}. Forall domain should be an enumerable element.",
                            value.denotation()
                        ),
                    )
                })?;
                ForallFrame {
                    remaining: members.enumerate().into(),
                    binding: None,
                    matched: 0,
                    acc: UpdateMultiset::new(),
                }
            }
        };

        loop {
            if frame.binding.is_some() {
                if let Some(guard) = guard {
                    if !eval.is_evaluated(guard) {
                        eval.scratch().insert(pos, frame);
                        return Ok(guard);
                    }
                }
                let accepted = match guard {
                    Some(guard) => value_of(eval, guard).as_boolean().ok_or_else(|| {
                        spec_error(eval, guard, "Value of forall condition is not Boolean.")
                    })?,
                    None => true,
                };
                if accepted {
                    if !eval.is_evaluated(body) {
                        eval.scratch().insert(pos, frame);
                        return Ok(body);
                    }
                    frame.acc.absorb(updates_of(eval, body));
                    frame.matched += 1;
                    eval.clear_tree(body);
                }
                if let Some(guard) = guard {
                    eval.clear_tree(guard);
                }
                if let Some(handle) = frame.binding.take() {
                    eval.unbind(handle)?;
                }
            }

            let Some(next) = frame.remaining.pop_front() else {
                break;
            };
            frame.binding = Some(eval.bind(&var, next));
        }

        if frame.matched == 0 {
            if let Some(ifnone) = ifnone {
                return Ok(ifnone);
            }
        }
        eval.set_result(pos, None, Some(frame.acc));
        Ok(pos)
    }
}
