//! String-keyed dictionary storage.
//!
//! Entries keep insertion order. Values are owned: whoever inserts must have
//! produced an owned `Value`, and replaced values are handed back to the
//! caller so they can be released against the heap (the dict itself lives
//! inside the heap and cannot borrow it mutably).

use indexmap::IndexMap;

use crate::{heap::HeapId, value::Value};

#[derive(Debug, Default)]
pub(crate) struct Dict {
    entries: IndexMap<String, Value, ahash::RandomState>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity_and_hasher(capacity, ahash::RandomState::default()),
        }
    }

    /// Stores `value` under `key`, returning the previous value (if any) for
    /// the caller to release.
    #[must_use]
    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        for value in self.entries.values() {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_and_returns_old() {
        let mut dict = Dict::new();
        assert!(dict.insert("a".to_owned(), Value::Int(1)).is_none());
        let old = dict.insert("a".to_owned(), Value::Int(2));
        assert!(matches!(old, Some(Value::Int(1))));
        assert!(matches!(dict.get("a"), Some(Value::Int(2))));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn keys_keep_insertion_order() {
        let mut dict = Dict::new();
        let _ = dict.insert("b".to_owned(), Value::Int(1));
        let _ = dict.insert("a".to_owned(), Value::Int(2));
        let _ = dict.insert("c".to_owned(), Value::Int(3));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }
}
