//! Lexical scopes.
//!
//! A scope is an insertion-ordered map from name to owned `Value` plus an
//! optional link to the enclosing scope. Scopes live on the heap so that
//! closures, coroutines, and instances can keep them alive by reference
//! count; a function's call scope simply drops at the end of the call unless
//! something captured it.
//!
//! Instance attribute scopes have no outer link: attribute lookup never
//! falls through into lexical scope chains.

use indexmap::IndexMap;

use crate::{
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

#[derive(Debug)]
pub(crate) struct Scope {
    vars: IndexMap<String, Value, ahash::RandomState>,
    outer: Option<HeapId>,
}

impl Scope {
    /// Creates a scope chained to `outer`. The caller must already own the
    /// reference on `outer` that this scope will hold.
    pub fn new(outer: Option<HeapId>) -> Self {
        Self {
            vars: IndexMap::default(),
            outer,
        }
    }

    /// Binds `name` in this scope, returning the previous value (if any) for
    /// the caller to release.
    #[must_use]
    pub fn declare(&mut self, name: String, value: Value) -> Option<Value> {
        self.vars.insert(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn outer(&self) -> Option<HeapId> {
        self.outer
    }

    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        for value in self.vars.values() {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
        if let Some(outer) = self.outer {
            out.push(outer);
        }
    }
}

/// Expects `id` to be a scope and returns it.
///
/// # Panics
/// Panics if the entry is not a scope, which indicates an engine bug: scope
/// ids are only ever produced by scope allocation sites.
pub(crate) fn scope(heap: &Heap, id: HeapId) -> &Scope {
    match heap.get(id) {
        HeapData::Scope(s) => s,
        other => panic!("expected scope on heap, found {}", other.type_name()),
    }
}

pub(crate) fn scope_mut(heap: &mut Heap, id: HeapId) -> &mut Scope {
    match heap.get_mut(id) {
        HeapData::Scope(s) => s,
        other => panic!("expected scope on heap, found {}", other.type_name()),
    }
}

/// Walks the outer chain from `start` and returns the id of the scope that
/// binds `name`, if any.
pub(crate) fn resolve(heap: &Heap, start: HeapId, name: &str) -> Option<HeapId> {
    let mut current = Some(start);
    while let Some(id) = current {
        let s = scope(heap, id);
        if s.contains(name) {
            return Some(id);
        }
        current = s.outer();
    }
    None
}
