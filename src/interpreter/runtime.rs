use crate::interpreter::ast::NodeId;
use crate::interpreter::context::{EvalContext, Evaluation, ScopeAccess, TreeAccess};
use crate::interpreter::value::Value;
use crate::runtime::error::{EngineError, EvalError, EvalResult, SpecificationError};
use crate::runtime::registry::DispatchTable;
use crate::runtime::state::UpdateMultiset;
use crate::runtime::step::{AgentId, InvocationId};

/// Outcome of a `tick` call on the interpreter runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A handler ran or control returned to a suspended ancestor.
    Progress,
    /// The program root carries its result.
    Completed,
}

/// Resumable evaluator for one agent's program within one step.
///
/// The position stack records the ancestors waiting on the node currently
/// being evaluated. A handler that returns a different node pushes itself;
/// once the visited node is evaluated control pops back to the ancestor.
pub struct InterpreterRuntime<'s> {
    ctx: EvalContext<'s>,
    dispatch: DispatchTable,
    root: NodeId,
    pos: NodeId,
    suspended: Vec<NodeId>,
    micro_steps: u64,
    budget: u64,
}

impl<'s> InterpreterRuntime<'s> {
    /// Create a runtime evaluating `root` inside the context's arena.
    pub fn new(ctx: EvalContext<'s>, dispatch: DispatchTable, root: NodeId, budget: u64) -> Self {
        Self {
            ctx,
            dispatch,
            root,
            pos: root,
            suspended: Vec::new(),
            micro_steps: 0,
            budget,
        }
    }

    /// Perform one micro-step.
    pub fn tick(&mut self) -> EvalResult<RuntimeEvent> {
        if self.ctx.is_evaluated(self.root) {
            return Ok(RuntimeEvent::Completed);
        }
        if self.micro_steps >= self.budget {
            return Err(EvalError::Specification(SpecificationError {
                kind: self.ctx.kind(self.pos).to_string(),
                position: self.ctx.position(self.pos),
                message: format!(
                    "Evaluation did not complete within {} micro-steps.",
                    self.budget
                ),
            }));
        }
        self.micro_steps += 1;

        if self.ctx.is_evaluated(self.pos) {
            self.pos = self.suspended.pop().unwrap_or(self.root);
            return Ok(RuntimeEvent::Progress);
        }

        let node = self.ctx.ast().node(self.pos);
        let index = node
            .handler()
            .ok_or_else(|| EngineError::UnregisteredNodeKind {
                kind: node.kind().to_string(),
                position: node.position(),
            })?;
        let handler = self
            .dispatch
            .handler(index)
            .ok_or_else(|| EngineError::Internal(format!("no handler at index {}", index.0)))?;

        tracing::trace!(
            "agent {} advancing {} {}",
            self.ctx.agent_id(),
            self.ctx.kind(self.pos),
            self.pos
        );
        let next = handler.advance(&mut self.ctx, self.pos)?;
        if next != self.pos {
            self.suspended.push(self.pos);
            self.pos = next;
        }

        if self.ctx.is_evaluated(self.root) {
            Ok(RuntimeEvent::Completed)
        } else {
            Ok(RuntimeEvent::Progress)
        }
    }

    /// Tick until the root is evaluated; return the root's updates.
    pub fn run(&mut self) -> EvalResult<UpdateMultiset> {
        while self.tick()? != RuntimeEvent::Completed {}
        Ok(self.finish())
    }

    /// Updates of the completed root.
    ///
    /// Scopes or frames still open at this point are dropped.
    pub fn finish(&mut self) -> UpdateMultiset {
        if self.ctx.scope_depth() != 0 || self.ctx.pending_frames() != 0 {
            tracing::warn!(
                "agent {} finished with {} open scopes and {} pending frames",
                self.ctx.agent_id(),
                self.ctx.scope_depth(),
                self.ctx.pending_frames()
            );
            self.ctx.reset();
        }
        self.ctx.updates(self.root).cloned().unwrap_or_default()
    }

    /// Tick until the root is evaluated; return the root's value.
    pub fn run_term(&mut self) -> EvalResult<Value> {
        while self.tick()? != RuntimeEvent::Completed {}
        Ok(self.ctx.value(self.root).cloned().unwrap_or(Value::Undef))
    }

    /// Drop all in-flight evaluation state of this invocation.
    pub fn abort(&mut self) {
        self.ctx.reset();
        self.suspended.clear();
        self.pos = self.root;
    }

    /// Agent this runtime evaluates for.
    pub fn agent(&self) -> &AgentId {
        self.ctx.agent_id()
    }

    /// Identifier of the invocation this runtime drives.
    pub fn invocation(&self) -> InvocationId {
        self.ctx.invocation()
    }

    /// Micro-steps performed so far.
    pub fn micro_steps(&self) -> u64 {
        self.micro_steps
    }

    /// Depth of the position stack.
    pub fn frame_depth(&self) -> usize {
        self.suspended.len()
    }

    /// Whether the root is evaluated.
    pub fn is_completed(&self) -> bool {
        self.ctx.is_evaluated(self.root)
    }

    /// Evaluation context.
    pub fn context(&self) -> &EvalContext<'s> {
        &self.ctx
    }
}
