//! Step controller and public API
//!
//! This module provides the `Engine` that loads a specification, runs every
//! agent's program once per step against the state as of the start of the
//! step, merges the proposed updates and commits them atomically.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;
pub mod loader;
pub mod registry;
pub mod scheduler;
pub mod signature;
pub mod state;
pub mod step;
pub mod storage;

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Micro-steps one agent may spend in one step before it is aborted
    pub max_micro_steps: u64,

    /// Seed for the randomness source (entropy when absent)
    pub seed: Option<u64>,

    /// Order in which agents advance within a step
    pub schedule: SchedulePolicy,

    /// Number of steps between persisted state snapshots
    pub snapshot_interval: u64,

    /// Persistence root (in-memory only when absent)
    pub root: Option<PathBuf>,

    /// Log every committed update
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_micro_steps: 1_000_000,
            seed: None,
            schedule: SchedulePolicy::Sequential,
            snapshot_interval: 50,
            root: None,
            debug: false,
        }
    }
}

use crate::interpreter::context::EvalContext;
use crate::interpreter::runtime::InterpreterRuntime;
use error::{EngineError, Result};
use loader::{LoadedSpecification, Specification, load_specification};
use registry::{DispatchTable, PluginCatalog};
use signature::Signature;
use state::{State, UpdateMultiset};
use step::{AgentFailure, StepNumber, StepRecord};
use storage::{StateSnapshot, Storage};

/// The step controller
pub struct Engine {
    config: EngineConfig,
    dispatch: DispatchTable,
    spec: Option<LoadedSpecification>,
    state: State,
    step: StepNumber,
    rng: StdRng,
    storage: Option<Storage>,
    unrestored: Option<StepNumber>,
}

impl Engine {
    /// Create an engine dispatching through a snapshot of `catalog`
    ///
    /// With a persistence root, the directory layout is created and the
    /// configuration written to it. A root whose journal already records
    /// steps is refused; use [`Engine::open`] to continue it.
    pub fn new(config: EngineConfig, catalog: &PluginCatalog) -> anyhow::Result<Self> {
        if let Some(root) = &config.root {
            if let Some(step) = Storage::new(root.clone()).last_journaled_step()? {
                anyhow::bail!(
                    "{:?} already journals {} steps; open it to continue",
                    root,
                    step
                );
            }
        }
        Self::build(config, catalog)
    }

    fn build(config: EngineConfig, catalog: &PluginCatalog) -> anyhow::Result<Self> {
        let storage = match &config.root {
            Some(root) => {
                storage::init_storage(root)?;
                storage::write_config(root, &config)?;
                Some(Storage::new(root.clone()))
            }
            None => None,
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            dispatch: catalog.snapshot(),
            config,
            spec: None,
            state: State::new(),
            step: StepNumber::zero(),
            rng,
            storage,
            unrestored: None,
        })
    }

    /// Create an engine over the built-in plugins
    pub fn standard(config: EngineConfig) -> anyhow::Result<Self> {
        Self::new(config, PluginCatalog::global())
    }

    /// Reopen an engine from an existing persistence root
    ///
    /// After loading the specification, call [`Engine::restore_latest`]
    /// before stepping.
    pub fn open(root: PathBuf) -> anyhow::Result<Self> {
        let mut config = storage::load_config(&root)?;
        config.root = Some(root);
        Self::build(config, PluginCatalog::global())
    }

    /// Load a specification and reset the state to its initial state
    ///
    /// Name conflicts and unknown node kinds are reported here, before any
    /// step runs.
    pub fn load(&mut self, spec: &Specification) -> Result<()> {
        let loaded = load_specification(spec, &self.dispatch)?;
        self.state = loaded.initial_state.clone();
        self.step = StepNumber::zero();
        self.unrestored = match &self.storage {
            Some(storage) => storage.last_journaled_step()?,
            None => None,
        };
        tracing::info!(
            "loaded {} with {} agents",
            loaded.name,
            loaded.agents.len()
        );
        self.spec = Some(loaded);
        Ok(())
    }

    /// Continue from the latest persisted snapshot, if there is one
    ///
    /// Journal records past the restored step are dropped, since the steps
    /// that follow will be journaled again. Without a snapshot the engine
    /// restarts from the loaded initial state.
    pub fn restore_latest(&mut self) -> anyhow::Result<Option<StepNumber>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let restored = match storage.latest_snapshot()? {
            Some(snapshot) => {
                self.state = snapshot.state;
                Some(snapshot.step)
            }
            None => {
                if let Some(spec) = &self.spec {
                    self.state = spec.initial_state.clone();
                }
                None
            }
        };
        self.step = restored.unwrap_or_else(StepNumber::zero);

        let dropped = storage.truncate_journal(self.step)?;
        if dropped > 0 {
            tracing::warn!(
                "dropped {} journal records past step {}",
                dropped,
                self.step
            );
        }
        self.unrestored = None;
        tracing::info!("restored state of step {}", self.step);
        Ok(restored)
    }

    /// Run one engine step
    ///
    /// Agents whose evaluation raises a specification error contribute no
    /// updates and are listed in the record's failures. If the merged
    /// updates are inconsistent the state is left untouched and the step
    /// counter does not advance.
    pub fn step(&mut self) -> Result<StepRecord> {
        if let Some(journaled) = self.unrestored {
            return Err(EngineError::UnrestoredJournal(journaled));
        }
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| EngineError::Internal("no specification loaded".to_string()))?;

        let outcomes = {
            let mut scheduler = scheduler::Scheduler::new(self.config.schedule);
            for agent in &spec.agents {
                let rng = StdRng::seed_from_u64(self.rng.next_u64());
                let ctx = EvalContext::new(
                    agent.id.clone(),
                    agent.ast.clone(),
                    &self.state,
                    &spec.rules,
                    rng,
                );
                scheduler.enqueue(InterpreterRuntime::new(
                    ctx,
                    self.dispatch.clone(),
                    agent.root,
                    self.config.max_micro_steps,
                ));
            }
            scheduler.run()?
        };

        let mut merged = UpdateMultiset::new();
        let mut agents = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(updates) => {
                    merged.absorb(updates);
                    agents.push(outcome.agent);
                }
                Err(err) => {
                    failures.push(AgentFailure::new(outcome.agent, outcome.invocation, &err))
                }
            }
        }

        let next = match self.state.apply(&merged) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!("step {} rejected: {}", self.step.next(), err);
                return Err(EngineError::Inconsistent(err));
            }
        };
        if self.config.debug {
            for update in merged.iter() {
                tracing::debug!(
                    "{} {:?} {} by {}",
                    update.location,
                    update.action,
                    update.value,
                    update.agent
                );
            }
        }
        self.state = next;
        self.step.increment();

        let record = StepRecord {
            step: self.step,
            agents,
            updates: merged,
            failures,
            state_digest: self.state.digest(),
            timestamp: chrono::Utc::now(),
        };
        tracing::info!(
            "step {} committed {} updates ({} agents failed)",
            record.step,
            record.updates.len(),
            record.failures.len()
        );
        self.persist(&record)?;
        Ok(record)
    }

    /// Run `count` steps, stopping at the first fatal error
    pub fn run(&mut self, count: u64) -> Result<Vec<StepRecord>> {
        let mut records = Vec::new();
        for _ in 0..count {
            records.push(self.step()?);
        }
        Ok(records)
    }

    fn persist(&self, record: &StepRecord) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        storage.append_record(record)?;
        let interval = self.config.snapshot_interval;
        if interval > 0 && record.step.0 % interval == 0 {
            let path = storage.write_snapshot(&StateSnapshot::new(record.step, &self.state))?;
            tracing::debug!("wrote snapshot {:?}", path);
        }
        Ok(())
    }

    /// Get the current state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Number of the current state
    pub fn step_number(&self) -> StepNumber {
        self.step
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch table used by this engine
    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Signature of the loaded specification
    pub fn signature(&self) -> Option<&Signature> {
        self.spec.as_ref().map(|spec| &spec.signature)
    }

    /// Get the storage manager
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }
}

// Re-export commonly used types
pub use error::{EvalError, SpecificationError};
pub use scheduler::SchedulePolicy;
pub use state::{Location, Update, UpdateAction};
pub use step::AgentId;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builder::{binary, block, ident, int, update};
    use crate::interpreter::value::Value;

    fn engine() -> Engine {
        Engine::standard(EngineConfig {
            seed: Some(1),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_micro_steps, 1_000_000);
        assert_eq!(config.snapshot_interval, 50);
        assert_eq!(config.schedule, SchedulePolicy::Sequential);
        assert!(config.root.is_none());
    }

    #[test]
    fn test_config_fills_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"seed": 9}"#).unwrap();
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.max_micro_steps, 1_000_000);
    }

    #[test]
    fn test_step_without_specification_fails() {
        let mut engine = engine();
        assert!(matches!(engine.step(), Err(EngineError::Internal(_))));
    }

    #[test]
    fn test_step_reads_previous_state() {
        let spec = Specification::new("counter")
            .agent("a", update(ident("x"), binary("+", ident("x"), int(1))))
            .initially(Location::nullary("x"), Value::Integer(0));
        let mut engine = engine();
        engine.load(&spec).unwrap();

        engine.run(3).unwrap();
        assert_eq!(engine.state().read(&Location::nullary("x")), Value::Integer(3));
        assert_eq!(engine.step_number(), StepNumber(3));
    }

    #[test]
    fn test_inconsistent_step_leaves_state() {
        let spec = Specification::new("clash").agent(
            "a",
            block(vec![update(ident("x"), int(1)), update(ident("x"), int(2))]),
        );
        let mut engine = engine();
        engine.load(&spec).unwrap();

        assert!(matches!(engine.step(), Err(EngineError::Inconsistent(_))));
        assert!(engine.state().is_empty());
        assert_eq!(engine.step_number(), StepNumber::zero());
    }
}
