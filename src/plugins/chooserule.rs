//! `choose` rule and `pick` expression.

use std::sync::Arc;

use crate::interpreter::ast::NodeId;
use crate::interpreter::choice::{Choice, ChoiceSlots, advance_choice, finish_choice};
use crate::interpreter::context::{Evaluation, spec_error, updates_of, value_of};
use crate::interpreter::value::Value;
use crate::runtime::error::EvalResult;
use crate::runtime::registry::{NodeHandler, Plugin};
use crate::runtime::state::UpdateMultiset;

/// `choose x in E [with C] do R [ifnone R2]`.
pub const CHOOSE_RULE: &str = "ChooseRule";
/// `pick x in E [with C] [t]`.
pub const PICK_EXP: &str = "PickExp";

/// Domain expression.
pub const DOMAIN_SLOT: &str = "domain";
/// Optional guard.
pub const GUARD_SLOT: &str = "guard";
/// Body run under the chosen binding.
pub const DO_RULE_SLOT: &str = "do";
/// Fallback when nothing satisfies the guard.
pub const IFNONE_RULE_SLOT: &str = "ifnone";
/// Result term of `pick`.
pub const TERM_SLOT: &str = "term";

/// Plugin providing nondeterministic selection.
pub struct ChooseRulePlugin;

impl Plugin for ChooseRulePlugin {
    fn name(&self) -> &'static str {
        "ChooseRulePlugin"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["choose", "pick", "with", "in", "do", "ifnone", "endchoose"]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![
            (CHOOSE_RULE, Arc::new(ChooseRule) as Arc<dyn NodeHandler>),
            (PICK_EXP, Arc::new(PickExp)),
        ]
    }
}

struct ChooseRule;

impl NodeHandler for ChooseRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let slots = ChoiceSlots::of(eval, pos, DOMAIN_SLOT, GUARD_SLOT)?;
        let body = eval
            .child(pos, DO_RULE_SLOT)
            .ok_or_else(|| spec_error(eval, pos, "Missing body of choose rule."))?;
        let ifnone = eval.child(pos, IFNONE_RULE_SLOT);

        if eval.is_evaluated(body) {
            finish_choice(eval, pos)?;
            let updates = updates_of(eval, body);
            eval.set_result(pos, None, Some(updates));
            return Ok(pos);
        }
        if let Some(ifnone) = ifnone.filter(|node| eval.is_evaluated(*node)) {
            let updates = updates_of(eval, ifnone);
            eval.set_result(pos, None, Some(updates));
            return Ok(pos);
        }

        match advance_choice(eval, pos, &slots, "choose")? {
            Choice::Evaluate(next) => Ok(next),
            Choice::Chosen(_) => Ok(body),
            Choice::Exhausted => match ifnone {
                Some(ifnone) => Ok(ifnone),
                None => {
                    eval.set_result(pos, None, Some(UpdateMultiset::new()));
                    Ok(pos)
                }
            },
        }
    }
}

struct PickExp;

impl NodeHandler for PickExp {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let slots = ChoiceSlots::of(eval, pos, DOMAIN_SLOT, GUARD_SLOT)?;
        let term = eval.child(pos, TERM_SLOT);

        if let Some(term) = term.filter(|node| eval.is_evaluated(*node)) {
            let value = value_of(eval, term);
            finish_choice(eval, pos)?;
            eval.set_result(pos, Some(value), None);
            return Ok(pos);
        }

        match advance_choice(eval, pos, &slots, "pick")? {
            Choice::Evaluate(next) => Ok(next),
            Choice::Chosen(value) => match term {
                Some(term) => Ok(term),
                None => {
                    finish_choice(eval, pos)?;
                    eval.set_result(pos, Some(value), None);
                    Ok(pos)
                }
            },
            Choice::Exhausted => {
                eval.set_result(pos, Some(Value::Undef), None);
                Ok(pos)
            }
        }
    }
}
