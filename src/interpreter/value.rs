use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum number of characters shown when a value is rendered in an error.
const DENOTATION_LIMIT: usize = 60;

/// Element of the (set-theoretic) domain the state ranges over.
///
/// `Undef` is the distinguished "absent" value; a location with no stored
/// value reads as `Undef`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// The undefined element.
    Undef,
    /// Boolean element.
    Boolean(bool),
    /// Signed integer element.
    Integer(i64),
    /// UTF-8 string element.
    String(String),
    /// Named element of a universe (agents, enumerations, ...).
    Element(String),
    /// Finite set. Enumerable, without an indexed view.
    Set(BTreeSet<Value>),
    /// Finite sequence. Enumerable, with an indexed view.
    List(Vec<Value>),
}

/// Capability exposed by values whose members can be enumerated.
pub trait Enumerable {
    /// Snapshot of the member values. Order carries no meaning.
    fn enumerate(&self) -> Vec<Value>;

    /// Number of members.
    fn size(&self) -> usize;

    /// Whether `indexed_view` provides random access to the members.
    fn supports_indexed_view(&self) -> bool {
        false
    }

    /// Random-access view over the members, if supported.
    fn indexed_view(&self) -> Option<&[Value]> {
        None
    }

    /// Membership test.
    fn contains(&self, value: &Value) -> bool {
        self.enumerate().contains(value)
    }
}

impl Enumerable for BTreeSet<Value> {
    fn enumerate(&self) -> Vec<Value> {
        self.iter().cloned().collect()
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn contains(&self, value: &Value) -> bool {
        BTreeSet::contains(self, value)
    }
}

impl Enumerable for Vec<Value> {
    fn enumerate(&self) -> Vec<Value> {
        self.clone()
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn supports_indexed_view(&self) -> bool {
        true
    }

    fn indexed_view(&self) -> Option<&[Value]> {
        Some(self.as_slice())
    }

    fn contains(&self, value: &Value) -> bool {
        self.iter().any(|item| item == value)
    }
}

impl Value {
    /// Build a set value from any iterator of members.
    pub fn set<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Set(items.into_iter().collect())
    }

    /// Named element shorthand.
    pub fn element(name: impl Into<String>) -> Value {
        Value::Element(name.into())
    }

    /// Whether this is the undefined element.
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Boolean capability.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Integer accessor.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(num) => Some(*num),
            _ => None,
        }
    }

    /// Enumerable capability, if this value has one.
    pub fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        match self {
            Value::Set(items) => Some(items),
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Rendering used in diagnostics, truncated to a readable length.
    pub fn denotation(&self) -> String {
        let text = self.to_string();
        if text.chars().count() <= DENOTATION_LIMIT {
            return text;
        }
        let mut cut: String = text.chars().take(DENOTATION_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Boolean(flag)
    }
}

impl From<i64> for Value {
    fn from(num: i64) -> Self {
        Value::Integer(num)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => write!(f, "undef"),
            Value::Boolean(flag) => write!(f, "{}", flag),
            Value::Integer(num) => write!(f, "{}", num),
            Value::String(text) => write!(f, "\"{}\"", text),
            Value::Element(name) => write!(f, "{}", name),
            Value::Set(items) => {
                write!(f, "{{")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerable_capability() {
        let set = Value::set([Value::Integer(1), Value::Integer(2)]);
        let list = Value::List(vec![Value::Integer(3)]);

        let set_view = set.as_enumerable().unwrap();
        assert_eq!(set_view.size(), 2);
        assert!(!set_view.supports_indexed_view());
        assert!(set_view.contains(&Value::Integer(2)));

        let list_view = list.as_enumerable().unwrap();
        assert!(list_view.supports_indexed_view());
        assert_eq!(list_view.indexed_view().unwrap(), &[Value::Integer(3)]);

        assert!(Value::Integer(7).as_enumerable().is_none());
    }

    #[test]
    fn test_denotation_is_truncated() {
        let big = Value::set((0..100).map(Value::Integer));
        let text = big.denotation();
        assert!(text.ends_with("..."));
        assert!(text.chars().count() <= DENOTATION_LIMIT + 3);
        assert_eq!(Value::Boolean(true).denotation(), "true");
    }
}
