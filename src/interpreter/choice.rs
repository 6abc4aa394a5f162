//! Nondeterministic selection shared by `choose` and `pick`.
//!
//! A selection draws candidates from its domain without replacement, binds
//! each to the selection variable and tests the optional guard under that
//! binding. A rejected candidate has its binding popped and the guard
//! subtree cleared before the next draw, so every candidate is tried at most
//! once and the environment never accumulates stale scopes. The frame
//! holding the remaining candidates lives in the invocation's scratch store
//! and is keyed by the selecting node, so nested and recursive selections
//! keep independent state.

use super::ast::NodeId;
use super::context::{Evaluation, spec_error, value_of};
use super::environment::ScopeHandle;
use super::value::{Enumerable, Value};
use crate::runtime::error::EvalResult;

/// Remaining candidates of one selection.
#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    items: Vec<Value>,
}

impl CandidateList {
    /// Snapshot the domain's elements.
    ///
    /// Domains exposing an indexed view are copied from the view; others
    /// are enumerated once.
    pub fn from_domain(domain: &dyn Enumerable) -> Self {
        let items = match domain.indexed_view() {
            Some(view) if domain.supports_indexed_view() => view.to_vec(),
            _ => domain.enumerate(),
        };
        Self { items }
    }

    /// Remove and return the candidate at `index`.
    ///
    /// Order of the rest is not preserved.
    pub fn draw(&mut self, index: usize) -> Option<Value> {
        if index < self.items.len() {
            Some(self.items.swap_remove(index))
        } else {
            None
        }
    }

    /// Candidates not yet drawn.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if every candidate was drawn.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Retry state of a selection in progress.
#[derive(Debug)]
pub struct ChoiceFrame {
    candidates: CandidateList,
    current: Option<(ScopeHandle, Value)>,
    tried: usize,
}

impl ChoiceFrame {
    fn new(candidates: CandidateList) -> Self {
        Self {
            candidates,
            current: None,
            tried: 0,
        }
    }
}

/// Slots of a selecting node.
#[derive(Debug, Clone)]
pub struct ChoiceSlots {
    /// Selection variable.
    pub var: String,
    /// Domain expression.
    pub domain: NodeId,
    /// Optional guard.
    pub guard: Option<NodeId>,
}

impl ChoiceSlots {
    /// Read the selection slots of `pos`.
    pub fn of(
        eval: &dyn Evaluation,
        pos: NodeId,
        domain_slot: &str,
        guard_slot: &str,
    ) -> EvalResult<Self> {
        let var = eval
            .token(pos)
            .ok_or_else(|| spec_error(eval, pos, "Missing variable name."))?
            .to_string();
        let domain = eval
            .child(pos, domain_slot)
            .ok_or_else(|| spec_error(eval, pos, "Missing domain expression."))?;
        Ok(Self {
            var,
            domain,
            guard: eval.child(pos, guard_slot),
        })
    }
}

/// Next move of a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    /// Evaluate this node, then come back.
    Evaluate(NodeId),
    /// A candidate satisfied the guard and is bound to the variable.
    Chosen(Value),
    /// Every candidate was rejected; nothing is bound.
    Exhausted,
}

/// Advance the selection of `pos` by as much as possible without leaving it.
///
/// `construct` names the construct in diagnostics ("choose", "pick").
/// Once [`Choice::Chosen`] is returned the binding stays in place until
/// [`finish_choice`] is called; repeated calls keep returning the same
/// candidate.
pub fn advance_choice(
    eval: &mut dyn Evaluation,
    pos: NodeId,
    slots: &ChoiceSlots,
    construct: &str,
) -> EvalResult<Choice> {
    if !eval.is_evaluated(slots.domain) {
        eval.scratch().discard(pos);
        return Ok(Choice::Evaluate(slots.domain));
    }

    let mut frame = match eval.scratch().take::<ChoiceFrame>(pos) {
        Some(frame) => frame,
        None => {
            let domain = value_of(eval, slots.domain);
            let enumerable = domain.as_enumerable().ok_or_else(|| {
                spec_error(
                    eval,
                    slots.domain,
                    format!(
                        "Cannot {} from {}. {} domain should be an enumerable element.",
                        construct,
                        domain.denotation(),
                        capitalized(construct)
                    ),
                )
            })?;
            ChoiceFrame::new(CandidateList::from_domain(enumerable))
        }
    };

    loop {
        if let Some((_, candidate)) = &frame.current {
            let accepted = match slots.guard {
                None => true,
                Some(guard) if !eval.is_evaluated(guard) => {
                    eval.scratch().insert(pos, frame);
                    return Ok(Choice::Evaluate(guard));
                }
                Some(guard) => value_of(eval, guard).as_boolean().ok_or_else(|| {
                    spec_error(
                        eval,
                        guard,
                        format!("Value of {} condition is not Boolean.", construct),
                    )
                })?,
            };
            if accepted {
                let chosen = candidate.clone();
                eval.scratch().insert(pos, frame);
                return Ok(Choice::Chosen(chosen));
            }
            if let Some(guard) = slots.guard {
                eval.clear_tree(guard);
            }
            if let Some((handle, _)) = frame.current.take() {
                eval.unbind(handle)?;
            }
        }

        let remaining = frame.candidates.len();
        if remaining == 0 {
            tracing::trace!(
                "{} at {} exhausted after {} candidates",
                construct,
                eval.position(pos),
                frame.tried
            );
            return Ok(Choice::Exhausted);
        }
        let index = eval.random_index(remaining);
        let Some(candidate) = frame.candidates.draw(index) else {
            continue;
        };
        let handle = eval.bind(&slots.var, candidate.clone());
        frame.current = Some((handle, candidate));
        frame.tried += 1;
    }
}

/// Release the binding of a finished selection and drop its frame.
///
/// Returns the chosen value, or `None` if the selection held no binding.
pub fn finish_choice(eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<Option<Value>> {
    let Some(frame) = eval.scratch().take::<ChoiceFrame>(pos) else {
        return Ok(None);
    };
    match frame.current {
        Some((handle, value)) => {
            eval.unbind(handle)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
