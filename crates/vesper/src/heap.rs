//! Reference-counted arena backing all heap-only runtime values.
//!
//! Freed slots go on a free list and are reused by later allocations, so
//! long-running loops that allocate and release values keep memory usage
//! flat. Reference counts are adjusted explicitly through
//! `Value::clone_with_heap` / `Value::drop_with_heap`; when a count reaches
//! zero the entry is freed and every child reference is released
//! recursively.

use std::cell::Cell;

use crate::{
    blueprint::{BoundMethod, Closure, Instance},
    dict::Dict,
    scope::Scope,
    sched::Coroutine,
    value::Value,
};

/// Index of a live entry in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    fn index(self) -> usize {
        self.0
    }
}

/// Payload of one heap entry.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Dict),
    Closure(Closure),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Coroutine(Coroutine),
    Scope(Scope),
}

impl HeapData {
    /// Name used in type-mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Closure(_) => "function",
            Self::Instance(_) => "object",
            Self::BoundMethod(_) => "bound method",
            Self::Coroutine(_) => "coroutine",
            Self::Scope(_) => "scope",
        }
    }

    /// Collects every heap id this entry holds a reference on.
    fn collect_child_refs(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) => {}
            Self::Array(items) | Self::Tuple(items) => {
                for item in items {
                    if let Some(id) = item.ref_id() {
                        out.push(id);
                    }
                }
            }
            Self::Dict(dict) => dict.collect_refs(out),
            Self::Closure(closure) => closure.collect_refs(out),
            Self::Instance(instance) => instance.collect_refs(out),
            Self::BoundMethod(method) => method.collect_refs(out),
            Self::Coroutine(coroutine) => coroutine.collect_refs(out),
            Self::Scope(scope) => scope.collect_refs(out),
        }
    }
}

#[derive(Debug)]
struct HeapEntry {
    refcount: Cell<usize>,
    data: HeapData,
}

/// The arena. Single-threaded; interior mutability is only used for the
/// refcount so `inc_ref` works through a shared borrow during lookups.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` with an initial reference count of one.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = HeapEntry {
            refcount: Cell::new(1),
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Increments the reference count of a live entry.
    ///
    /// # Panics
    /// Panics if the entry was already freed, which indicates a reference
    /// counting bug.
    pub fn inc_ref(&self, id: HeapId) {
        let entry = self.entries[id.index()]
            .as_ref()
            .expect("Heap::inc_ref on freed entry");
        entry.refcount.set(entry.refcount.get() + 1);
    }

    /// Decrements the reference count, freeing the entry and releasing its
    /// children once the count reaches zero.
    pub fn dec_ref(&mut self, id: HeapId) {
        let entry = {
            let slot = &mut self.entries[id.index()];
            let entry = slot.as_mut().expect("Heap::dec_ref on freed entry");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref on freed entry")
        };
        self.free_list.push(id);
        let mut children = Vec::new();
        entry.data.collect_child_refs(&mut children);
        for child in children {
            self.dec_ref(child);
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entries[id.index()]
            .as_ref()
            .expect("Heap::get on freed entry")
            .data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entries[id.index()]
            .as_mut()
            .expect("Heap::get_mut on freed entry")
            .data
    }

    /// Number of live entries; used by tests to check allocation hygiene.
    #[cfg(test)]
    pub fn live_objects(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    #[cfg(test)]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries[id.index()]
            .as_ref()
            .expect("Heap::refcount on freed entry")
            .refcount
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_releases_children_recursively() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::Str("hello".to_owned()));
        let outer = heap.allocate(HeapData::Array(vec![Value::Ref(inner), Value::Int(1)]));
        assert_eq!(heap.live_objects(), 2);
        heap.dec_ref(outer);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn shared_child_survives_container_free() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::Str("shared".to_owned()));
        heap.inc_ref(inner); // second owner outside the array
        let outer = heap.allocate(HeapData::Array(vec![Value::Ref(inner)]));
        heap.dec_ref(outer);
        assert_eq!(heap.live_objects(), 1);
        heap.dec_ref(inner);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn refcounts_track_shares() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("x".to_owned()));
        assert_eq!(heap.refcount(id), 1);
        heap.inc_ref(id);
        assert_eq!(heap.refcount(id), 2);
        heap.dec_ref(id);
        assert_eq!(heap.refcount(id), 1);
        heap.dec_ref(id);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str("a".to_owned()));
        heap.dec_ref(a);
        let b = heap.allocate(HeapData::Str("b".to_owned()));
        assert_eq!(a, b);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn scope_chain_keeps_outer_alive() {
        let mut heap = Heap::new();
        let outer = heap.allocate(HeapData::Scope(Scope::new(None)));
        heap.inc_ref(outer);
        let inner = heap.allocate(HeapData::Scope(Scope::new(Some(outer))));
        heap.dec_ref(outer);
        assert_eq!(heap.live_objects(), 2);
        heap.dec_ref(inner);
        assert_eq!(heap.live_objects(), 0);
    }
}
