//! Sequential composition (`seq R1 .. Rn endseq`).
//!
//! Each finished sub-rule's updates are collapsed against the view left by
//! its predecessors and published through a state overlay owned by the
//! block, so later sub-rules read the composed intermediate state. The
//! block's result is a basic update for every location written inside it.
//! Locations that only received set additions and removals keep them as
//! partial updates, so they still aggregate with parallel siblings.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::interpreter::ast::NodeId;
use crate::interpreter::context::{Evaluation, spec_error, updates_of};
use crate::interpreter::value::Value;
use crate::runtime::error::EvalResult;
use crate::runtime::registry::{NodeHandler, Plugin};
use crate::runtime::state::{Location, Update, UpdateAction, UpdateMultiset};
use crate::runtime::step::AgentId;

/// `seq R1 .. Rn endseq`.
pub const SEQ_BLOCK_RULE: &str = "SeqBlockRule";

/// Plugin providing sequential composition.
pub struct TurboAsmPlugin;

impl Plugin for TurboAsmPlugin {
    fn name(&self) -> &'static str {
        "TurboASMPlugin"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["seq", "next", "endseq"]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![(SEQ_BLOCK_RULE, Arc::new(SeqBlockRule) as Arc<dyn NodeHandler>)]
    }
}

/// Net effect of the finished sub-rules on one location.
enum SeqEffect {
    Written,
    Members {
        added: BTreeSet<Value>,
        removed: BTreeSet<Value>,
    },
}

impl SeqEffect {
    fn members() -> Self {
        SeqEffect::Members {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Fold one update of a later sub-rule into the effect.
    fn record(&mut self, update: &Update) {
        if !update.action.is_partial() {
            *self = SeqEffect::Written;
            return;
        }
        let SeqEffect::Members { added, removed } = self else {
            return;
        };
        match update.action {
            UpdateAction::Update => {}
            UpdateAction::AddToSet => {
                removed.remove(&update.value);
                added.insert(update.value.clone());
            }
            UpdateAction::RemoveFromSet => {
                added.remove(&update.value);
                removed.insert(update.value.clone());
            }
        }
    }
}

#[derive(Default)]
struct SeqFrame {
    merged: usize,
    applied: BTreeMap<Location, Value>,
    effects: BTreeMap<Location, SeqEffect>,
}

impl SeqFrame {
    fn into_updates(mut self, agent: &AgentId) -> UpdateMultiset {
        let mut updates = UpdateMultiset::new();
        for (location, value) in self.applied {
            match self.effects.remove(&location) {
                Some(SeqEffect::Members { added, removed }) => {
                    let partial = |value: Value, action| Update {
                        location: location.clone(),
                        value,
                        agent: agent.clone(),
                        action,
                    };
                    for value in added {
                        updates.push(partial(value, UpdateAction::AddToSet));
                    }
                    for value in removed {
                        updates.push(partial(value, UpdateAction::RemoveFromSet));
                    }
                }
                _ => updates.push(Update::set(location, value, agent.clone())),
            }
        }
        updates
    }
}

struct SeqBlockRule;

impl NodeHandler for SeqBlockRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let rules = eval.unnamed_children(pos);
        let mut frame = eval.scratch().take::<SeqFrame>(pos).unwrap_or_default();

        while let Some(&rule) = rules.get(frame.merged) {
            if !eval.is_evaluated(rule) {
                eval.set_overlay(pos, frame.applied.clone());
                eval.scratch().insert(pos, frame);
                return Ok(rule);
            }
            let updates = updates_of(eval, rule);
            let composed = updates
                .collapse(|location| eval.read(location))
                .map_err(|err| spec_error(eval, rule, err.to_string()))?;
            for update in updates.iter() {
                frame
                    .effects
                    .entry(update.location.clone())
                    .or_insert_with(SeqEffect::members)
                    .record(update);
            }
            frame.applied.extend(composed);
            frame.merged += 1;
        }

        eval.drop_overlay(pos);
        let updates = frame.into_updates(eval.agent());
        eval.set_result(pos, None, Some(updates));
        Ok(pos)
    }
}
