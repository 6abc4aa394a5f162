//! Deterministic agent scheduler
//!
//! Holds the in-flight interpreter runs of one engine step and drives them
//! to completion, either one agent at a time or one micro-step per agent in
//! rotation. Agents only read the state as of the start of the step, so the
//! policy never changes what a deterministic program commits.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::error::{EngineError, EvalError, SpecificationError};
use super::state::UpdateMultiset;
use super::step::{AgentId, InvocationId};
use crate::interpreter::runtime::{InterpreterRuntime, RuntimeEvent};

/// Order in which agents advance within a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulePolicy {
    /// Run each agent to completion, in order
    #[default]
    Sequential,
    /// One micro-step per agent, round-robin
    Interleaved,
}

/// Run waiting in the ready queue
struct ScheduledRun<'s> {
    /// Enqueue position, used to report outcomes in a stable order
    order: usize,
    runtime: InterpreterRuntime<'s>,
}

/// Result of one agent's evaluation
#[derive(Debug)]
pub struct AgentOutcome {
    /// Agent
    pub agent: AgentId,
    /// Invocation that produced the result
    pub invocation: InvocationId,
    /// Updates, or the error that aborted the agent
    pub result: Result<UpdateMultiset, SpecificationError>,
    /// Micro-steps spent
    pub micro_steps: u64,
}

/// Round-robin driver over in-flight runs
pub struct Scheduler<'s> {
    policy: SchedulePolicy,
    ready_queue: VecDeque<ScheduledRun<'s>>,
    enqueued: usize,
}

impl<'s> Scheduler<'s> {
    /// Create a new scheduler
    pub fn new(policy: SchedulePolicy) -> Self {
        Self {
            policy,
            ready_queue: VecDeque::new(),
            enqueued: 0,
        }
    }

    /// Enqueue an agent run
    pub fn enqueue(&mut self, runtime: InterpreterRuntime<'s>) {
        self.ready_queue.push_back(ScheduledRun {
            order: self.enqueued,
            runtime,
        });
        self.enqueued += 1;
    }

    /// Check if any runs are waiting
    pub fn has_ready_runs(&self) -> bool {
        !self.ready_queue.is_empty()
    }

    /// Get the number of pending runs
    pub fn pending_count(&self) -> usize {
        self.ready_queue.len()
    }

    /// Drive every queued run to completion
    ///
    /// A specification error aborts only the affected run; an engine error
    /// aborts the whole batch. Outcomes come back in enqueue order.
    pub fn run(&mut self) -> Result<Vec<AgentOutcome>, EngineError> {
        let mut outcomes: Vec<(usize, AgentOutcome)> = Vec::with_capacity(self.ready_queue.len());
        while let Some(mut scheduled) = self.ready_queue.pop_front() {
            let event = match self.policy {
                SchedulePolicy::Sequential => scheduled.runtime.run().map(|_| RuntimeEvent::Completed),
                SchedulePolicy::Interleaved => scheduled.runtime.tick(),
            };
            match event {
                Ok(RuntimeEvent::Progress) => self.ready_queue.push_back(scheduled),
                Ok(RuntimeEvent::Completed) => {
                    let runtime = &mut scheduled.runtime;
                    let updates = runtime.finish();
                    tracing::debug!(
                        "agent {} ({}) completed with {} updates after {} micro-steps",
                        runtime.agent(),
                        runtime.invocation(),
                        updates.len(),
                        runtime.micro_steps()
                    );
                    outcomes.push((
                        scheduled.order,
                        AgentOutcome {
                            agent: runtime.agent().clone(),
                            invocation: runtime.invocation(),
                            result: Ok(updates),
                            micro_steps: runtime.micro_steps(),
                        },
                    ));
                }
                Err(EvalError::Specification(err)) => {
                    let runtime = &mut scheduled.runtime;
                    tracing::warn!(
                        "agent {} ({}) aborted: {}",
                        runtime.agent(),
                        runtime.invocation(),
                        err
                    );
                    runtime.abort();
                    outcomes.push((
                        scheduled.order,
                        AgentOutcome {
                            agent: runtime.agent().clone(),
                            invocation: runtime.invocation(),
                            result: Err(err),
                            micro_steps: runtime.micro_steps(),
                        },
                    ));
                }
                Err(EvalError::Fatal(err)) => {
                    self.ready_queue.clear();
                    return Err(err);
                }
            }
        }
        outcomes.sort_by_key(|(order, _)| *order);
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builder::{NodeSpec, binary, block, build_ast, ident, int, update};
    use crate::interpreter::context::{EvalContext, RuleLibrary};
    use crate::runtime::registry::PluginCatalog;
    use crate::runtime::state::State;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn enqueue<'s>(
        scheduler: &mut Scheduler<'s>,
        name: &str,
        program: &NodeSpec,
        state: &'s State,
        rules: &'s RuleLibrary,
    ) {
        let dispatch = PluginCatalog::global().snapshot();
        let (mut ast, root) = build_ast(program);
        ast.bind(&dispatch).unwrap();
        let ctx = EvalContext::new(AgentId::new(name), ast, state, rules, StdRng::seed_from_u64(3));
        scheduler.enqueue(InterpreterRuntime::new(ctx, dispatch, root, 10_000));
    }

    fn outcomes(policy: SchedulePolicy) -> Vec<AgentOutcome> {
        let state = State::new();
        let rules = RuleLibrary::new();
        let mut scheduler = Scheduler::new(policy);
        enqueue(
            &mut scheduler,
            "long",
            &block(vec![
                update(ident("a"), binary("+", int(1), int(2))),
                update(ident("b"), int(2)),
            ]),
            &state,
            &rules,
        );
        enqueue(&mut scheduler, "short", &update(ident("c"), int(3)), &state, &rules);
        enqueue(
            &mut scheduler,
            "broken",
            &update(ident("d"), binary("+", int(1), NodeSpec::term("BooleanTerm").token("yes"))),
            &state,
            &rules,
        );
        assert_eq!(scheduler.pending_count(), 3);
        let outcomes = scheduler.run().unwrap();
        assert!(!scheduler.has_ready_runs());
        outcomes
    }

    #[test]
    fn test_outcomes_in_enqueue_order() {
        for policy in [SchedulePolicy::Sequential, SchedulePolicy::Interleaved] {
            let outcomes = outcomes(policy);
            let names: Vec<&str> = outcomes.iter().map(|o| o.agent.as_str()).collect();
            assert_eq!(names, ["long", "short", "broken"]);
            assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 2);
            assert_eq!(outcomes[1].result.as_ref().unwrap().len(), 1);
            assert!(outcomes[2].result.is_err());
        }
    }

    #[test]
    fn test_policies_agree_on_updates() {
        let sequential = outcomes(SchedulePolicy::Sequential);
        let interleaved = outcomes(SchedulePolicy::Interleaved);
        for (left, right) in sequential.iter().zip(&interleaved) {
            assert_eq!(left.result.as_ref().ok(), right.result.as_ref().ok());
            assert_eq!(left.micro_steps, right.micro_steps);
        }
    }

    #[test]
    fn test_each_run_has_its_own_invocation() {
        let outcomes = outcomes(SchedulePolicy::Interleaved);
        assert_ne!(outcomes[0].invocation, outcomes[1].invocation);
        assert_ne!(outcomes[1].invocation, outcomes[2].invocation);
    }
}
