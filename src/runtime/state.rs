//! Abstract storage: locations, updates, and the update-multiset algebra
//!
//! The state maps locations to values. Agents never write it directly; they
//! propose updates, the step controller merges every agent's multiset, checks
//! it for consistency, and only then applies it atomically to produce the next
//! state.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::error::{InconsistentUpdateError, UpdateConflict};
use super::step::AgentId;
use crate::interpreter::value::Value;

/// Addressable unit of state: a function name applied to argument values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    /// Function name
    pub name: String,
    /// Ordered argument values
    pub args: Vec<Value>,
}

impl Location {
    /// Create a location from a name and arguments
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Nullary location (a 0-ary function)
    pub fn nullary(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return write!(f, "{}", self.name);
        }
        write!(f, "{}(", self.name)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Kind of change an update requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpdateAction {
    /// Set the location to the value
    Update,
    /// Add the value to the set stored at the location
    AddToSet,
    /// Remove the value from the set stored at the location
    RemoveFromSet,
}

impl UpdateAction {
    /// Whether this is a partial (aggregating) set action
    pub fn is_partial(self) -> bool {
        !matches!(self, UpdateAction::Update)
    }
}

/// A single proposed change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Update {
    /// Target location
    pub location: Location,
    /// New value (or set member for partial actions)
    pub value: Value,
    /// Agent that proposed the update
    pub agent: AgentId,
    /// Requested action
    pub action: UpdateAction,
}

impl Update {
    /// Basic `location := value` update
    pub fn set(location: Location, value: Value, agent: AgentId) -> Self {
        Self {
            location,
            value,
            agent,
            action: UpdateAction::Update,
        }
    }

    fn conflict(&self) -> UpdateConflict {
        UpdateConflict {
            value: self.value.clone(),
            action: self.action,
            agent: self.agent.clone(),
        }
    }
}

/// Unordered multiset of updates produced by one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMultiset {
    updates: Vec<Update>,
}

impl UpdateMultiset {
    /// Create an empty multiset
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiset holding exactly one update
    pub fn single(update: Update) -> Self {
        Self {
            updates: vec![update],
        }
    }

    /// Add an update
    pub fn push(&mut self, update: Update) {
        self.updates.push(update);
    }

    /// Move every update of `other` into this multiset
    pub fn absorb(&mut self, other: UpdateMultiset) {
        self.updates.extend(other.updates);
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of updates, duplicates included
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Iterate over the updates
    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        self.updates.iter()
    }

    /// Group updates by location and collapse every group to one value.
    ///
    /// `current` supplies the value a location holds before the updates, which
    /// partial set actions aggregate against.
    pub fn collapse<F>(&self, current: F) -> Result<BTreeMap<Location, Value>, InconsistentUpdateError>
    where
        F: Fn(&Location) -> Value,
    {
        let mut groups: BTreeMap<&Location, Vec<&Update>> = BTreeMap::new();
        for update in &self.updates {
            groups.entry(&update.location).or_default().push(update);
        }

        let mut collapsed = BTreeMap::new();
        for (location, group) in groups {
            let value = collapse_group(location, &group, &current)?;
            collapsed.insert(location.clone(), value);
        }
        Ok(collapsed)
    }
}

impl IntoIterator for UpdateMultiset {
    type Item = Update;
    type IntoIter = std::vec::IntoIter<Update>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

impl FromIterator<Update> for UpdateMultiset {
    fn from_iter<I: IntoIterator<Item = Update>>(iter: I) -> Self {
        Self {
            updates: iter.into_iter().collect(),
        }
    }
}

fn collapse_group<F>(
    location: &Location,
    group: &[&Update],
    current: &F,
) -> Result<Value, InconsistentUpdateError>
where
    F: Fn(&Location) -> Value,
{
    let inconsistent = |updates: &[&Update]| InconsistentUpdateError {
        location: location.clone(),
        conflicts: updates.iter().map(|update| update.conflict()).collect(),
    };

    let (basic, partial): (Vec<&Update>, Vec<&Update>) =
        group.iter().copied().partition(|update| !update.action.is_partial());

    let basic_value = match basic.split_first() {
        Some((first, rest)) => {
            if rest.iter().any(|update| update.value != first.value) {
                return Err(inconsistent(&basic));
            }
            Some(first.value.clone())
        }
        None => None,
    };

    if partial.is_empty() {
        // Non-empty group, so at least one basic update exists.
        return basic_value.ok_or_else(|| inconsistent(group));
    }

    let added: BTreeSet<&Value> = partial
        .iter()
        .filter(|update| update.action == UpdateAction::AddToSet)
        .map(|update| &update.value)
        .collect();
    let removed: BTreeSet<&Value> = partial
        .iter()
        .filter(|update| update.action == UpdateAction::RemoveFromSet)
        .map(|update| &update.value)
        .collect();
    if added.intersection(&removed).next().is_some() {
        return Err(inconsistent(&partial));
    }

    let mut members = match current(location) {
        Value::Set(items) => items,
        Value::Undef => BTreeSet::new(),
        _ => return Err(inconsistent(&partial)),
    };
    for value in added {
        members.insert(value.clone());
    }
    for value in removed {
        members.remove(value);
    }
    let aggregated = Value::Set(members);

    match basic_value {
        Some(value) if value != aggregated => Err(inconsistent(group)),
        _ => Ok(aggregated),
    }
}

/// Mapping from locations to values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(with = "location_map_serde")]
    entries: BTreeMap<Location, Value>,
}

impl State {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a location; absent locations read as UNDEF
    pub fn read(&self, location: &Location) -> Value {
        self.entries.get(location).cloned().unwrap_or(Value::Undef)
    }

    /// Write a location directly (initial state only; steps go through `apply`)
    pub fn write(&mut self, location: Location, value: Value) {
        if value.is_undef() {
            self.entries.remove(&location);
        } else {
            self.entries.insert(location, value);
        }
    }

    /// Produce the successor state, or report the first inconsistency.
    ///
    /// The receiver is never modified, so a failed apply leaves no partial
    /// writes behind.
    pub fn apply(&self, updates: &UpdateMultiset) -> Result<State, InconsistentUpdateError> {
        let collapsed = updates.collapse(|location| self.read(location))?;
        let mut next = self.clone();
        for (location, value) in collapsed {
            next.write(location, value);
        }
        Ok(next)
    }

    /// Apply in place, keeping the current state on failure
    pub fn commit(&mut self, updates: &UpdateMultiset) -> Result<(), InconsistentUpdateError> {
        let next = self.apply(updates)?;
        *self = next;
        Ok(())
    }

    /// Number of defined locations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no location is defined
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over defined locations in order
    pub fn iter(&self) -> impl Iterator<Item = (&Location, &Value)> {
        self.entries.iter()
    }

    /// Deterministic digest of the state contents
    pub fn digest(&self) -> String {
        let mut hasher = Hasher::new();
        for (location, value) in &self.entries {
            hasher.update(format!("{:?}", location).as_bytes());
            hasher.update(b"=");
            hasher.update(format!("{:?}", value).as_bytes());
            hasher.update(b";");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// JSON object keys must be strings, so the map is stored as an entry list.
mod location_map_serde {
    use super::{Location, Value};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        location: Location,
        value: Value,
    }

    pub fn serialize<S>(map: &BTreeMap<Location, Value>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<Entry> = map
            .iter()
            .map(|(location, value)| Entry {
                location: location.clone(),
                value: value.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Location, Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.location, entry.value))
            .collect())
    }
}
