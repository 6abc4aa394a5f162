//! Persistence root: configuration, step journal and state snapshots
//!
//! Layout of a persistence root:
//! - `config.json`: the engine configuration
//! - `journal.jsonl`: one `StepRecord` per committed step
//! - `snapshots/step-<n>.json`: full state after step `n`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::EngineConfig;
use super::state::State;
use super::step::{StepNumber, StepRecord};

/// Full state written at a snapshot point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Step that produced the state
    pub step: StepNumber,
    /// Digest of `state`
    pub digest: String,
    /// The state
    pub state: State,
}

impl StateSnapshot {
    /// Capture a state
    pub fn new(step: StepNumber, state: &State) -> Self {
        Self {
            step,
            digest: state.digest(),
            state: state.clone(),
        }
    }
}

/// Handle on a persistence root
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Wrap a persistence root (nothing is created on disk)
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Persistence root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the saved `EngineConfig`
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Location of the step journal
    pub fn journal_path(&self) -> PathBuf {
        self.root.join("journal.jsonl")
    }

    /// Directory holding state snapshots
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Snapshot file of a step
    pub fn snapshot_path(&self, step: StepNumber) -> PathBuf {
        self.snapshots_dir().join(format!("step-{}.json", step.0))
    }

    /// Replace `path` with `data` so readers never observe a partial file
    ///
    /// The bytes go to a sibling `.tmp` file first, which is synced and then
    /// renamed over `path`; the parent directory is synced last.
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let staging = path.with_extension("tmp");
        {
            let mut file = File::create(&staging)
                .with_context(|| format!("Cannot stage {:?}", staging))?;
            file.write_all(data)
                .and_then(|()| file.sync_all())
                .with_context(|| format!("Cannot write {:?}", staging))?;
        }
        fs::rename(&staging, path)
            .with_context(|| format!("Cannot move {:?} into place at {:?}", staging, path))?;

        let Some(parent) = path.parent() else {
            return Ok(());
        };
        OpenOptions::new()
            .read(true)
            .open(parent)
            .and_then(|dir| dir.sync_all())
            .with_context(|| format!("Cannot sync directory {:?}", parent))
    }

    /// Read a whole file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Cannot read {:?}", path))
    }

    /// Create `path` with any missing parents
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Cannot create directory {:?}", path))
    }

    /// Append a step record to the journal
    pub fn append_record(&self, record: &StepRecord) -> Result<()> {
        let path = self.journal_path();
        let mut line = serde_json::to_vec(record).context("Failed to serialize step record")?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal: {:?}", path))?;
        file.write_all(&line).context("Failed to append step record")?;
        file.sync_data().context("Failed to sync journal")?;
        Ok(())
    }

    /// Read every complete record from the journal
    ///
    /// A trailing partial line (an interrupted append) is ignored.
    pub fn read_journal(&self) -> Result<Vec<StepRecord>> {
        let path = self.journal_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).with_context(|| format!("Failed to open journal: {:?}", path))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .context("Failed to read journal")?;

        let mut records = Vec::with_capacity(lines.len());
        let last = lines.len().saturating_sub(1);
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StepRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) if idx == last => {
                    tracing::warn!("ignoring truncated journal entry: {}", err);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("Corrupt journal entry at line {}", idx + 1));
                }
            }
        }
        Ok(records)
    }

    /// Last step recorded in the journal
    pub fn last_journaled_step(&self) -> Result<Option<StepNumber>> {
        Ok(self.read_journal()?.last().map(|record| record.step))
    }

    /// Drop every journal record after step `last`
    ///
    /// Returns the number of records dropped.
    pub fn truncate_journal(&self, last: StepNumber) -> Result<usize> {
        let records = self.read_journal()?;
        let mut data = Vec::new();
        let mut kept = 0;
        for record in records.iter().filter(|record| record.step <= last) {
            serde_json::to_writer(&mut data, record).context("Failed to serialize step record")?;
            data.push(b'\n');
            kept += 1;
        }
        if kept == records.len() {
            return Ok(0);
        }
        self.write_atomic(&self.journal_path(), &data)?;
        Ok(records.len() - kept)
    }

    /// Write a state snapshot
    pub fn write_snapshot(&self, snapshot: &StateSnapshot) -> Result<PathBuf> {
        let path = self.snapshot_path(snapshot.step);
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        self.write_atomic(&path, &json)?;
        Ok(path)
    }

    /// Load the snapshot of a step
    pub fn load_snapshot(&self, step: StepNumber) -> Result<StateSnapshot> {
        let data = self.read_file(&self.snapshot_path(step))?;
        let snapshot: StateSnapshot =
            serde_json::from_slice(&data).context("Failed to deserialize snapshot")?;
        if snapshot.state.digest() != snapshot.digest {
            anyhow::bail!("Snapshot of step {} does not match its digest", step);
        }
        Ok(snapshot)
    }

    /// Steps that have a snapshot, ascending
    pub fn snapshot_steps(&self) -> Result<Vec<StepNumber>> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut steps = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
            let entry = entry?;
            let name = entry.file_name();
            let step = name
                .to_str()
                .and_then(|name| name.strip_prefix("step-"))
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|num| num.parse::<u64>().ok());
            if let Some(step) = step {
                steps.push(StepNumber(step));
            }
        }
        steps.sort();
        Ok(steps)
    }

    /// Most recent snapshot, if any
    pub fn latest_snapshot(&self) -> Result<Option<StateSnapshot>> {
        match self.snapshot_steps()?.last() {
            Some(step) => self.load_snapshot(*step).map(Some),
            None => Ok(None),
        }
    }
}

/// Initialize storage directories for a new engine
pub fn init_storage(root: &Path) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());
    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.snapshots_dir())?;
    Ok(())
}

/// Write engine configuration
pub fn write_config(root: &Path, config: &EngineConfig) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    storage.write_atomic(&storage.config_path(), &json)?;
    Ok(())
}

/// Load engine configuration
pub fn load_config(root: &Path) -> Result<EngineConfig> {
    let storage = Storage::new(root.to_path_buf());
    let data = storage.read_file(&storage.config_path())?;
    let config: EngineConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::Value;
    use crate::runtime::SchedulePolicy;
    use crate::runtime::state::{Location, UpdateMultiset};
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(step: u64) -> StepRecord {
        StepRecord {
            step: StepNumber(step),
            agents: Vec::new(),
            updates: UpdateMultiset::new(),
            failures: Vec::new(),
            state_digest: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_init_storage() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("engine");

        init_storage(&root).unwrap();

        assert!(root.exists());
        assert!(root.join("snapshots").exists());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        init_storage(&root).unwrap();

        let config = EngineConfig {
            seed: Some(42),
            schedule: SchedulePolicy::Interleaved,
            snapshot_interval: 100,
            debug: true,
            ..EngineConfig::default()
        };

        write_config(&root, &config).unwrap();
        let loaded = load_config(&root).unwrap();

        assert_eq!(loaded.seed, Some(42));
        assert_eq!(loaded.schedule, SchedulePolicy::Interleaved);
        assert_eq!(loaded.snapshot_interval, 100);
        assert!(loaded.debug);
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let target = storage.config_path();

        storage.write_atomic(&target, b"{\"first\": true}").unwrap();
        storage.write_atomic(&target, b"{}").unwrap();

        assert_eq!(storage.read_file(&target).unwrap(), b"{}".to_vec());
        assert!(!temp.path().join("config.tmp").exists());
    }

    #[test]
    fn test_journal_skips_truncated_tail() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        storage.append_record(&record(1)).unwrap();
        storage.append_record(&record(2)).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(storage.journal_path())
            .unwrap();
        file.write_all(b"{\"step\":").unwrap();

        let records = storage.read_journal().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step, StepNumber(2));
    }

    #[test]
    fn test_truncate_journal_keeps_earlier_records() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        assert_eq!(storage.last_journaled_step().unwrap(), None);
        for step in 1..=4 {
            storage.append_record(&record(step)).unwrap();
        }

        assert_eq!(storage.truncate_journal(StepNumber(2)).unwrap(), 2);
        assert_eq!(storage.truncate_journal(StepNumber(2)).unwrap(), 0);
        assert_eq!(storage.last_journaled_step().unwrap(), Some(StepNumber(2)));

        storage.append_record(&record(3)).unwrap();
        let steps: Vec<StepNumber> = storage
            .read_journal()
            .unwrap()
            .iter()
            .map(|record| record.step)
            .collect();
        assert_eq!(steps, vec![StepNumber(1), StepNumber(2), StepNumber(3)]);
    }

    #[test]
    fn test_snapshot_round_trip_and_latest() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        init_storage(temp.path()).unwrap();

        let mut state = State::new();
        state.write(Location::nullary("x"), Value::Integer(1));
        storage.write_snapshot(&StateSnapshot::new(StepNumber(2), &state)).unwrap();
        state.write(Location::nullary("x"), Value::Integer(2));
        storage.write_snapshot(&StateSnapshot::new(StepNumber(10), &state)).unwrap();

        assert_eq!(storage.snapshot_steps().unwrap(), vec![StepNumber(2), StepNumber(10)]);
        let latest = storage.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.step, StepNumber(10));
        assert_eq!(latest.state, state);
    }
}
