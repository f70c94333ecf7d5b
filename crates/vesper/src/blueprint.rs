//! Blueprints (class-like templates), instances, and bound methods.
//!
//! A blueprint holds a name, an optional parent link, a heap scope with its
//! class attributes and methods, and a cached pointer to its own `init`
//! method. The registry owns one reference on each blueprint's attribute
//! scope and cached init; those are released in one sweep at shutdown.
//!
//! Attribute lookup on an instance checks the instance's own attribute scope
//! first, then walks the blueprint parent chain. A function found on the
//! chain materializes as a `BoundMethod` carrying the defining blueprint so
//! `super` can resolve against that blueprint's parent.

use crate::{
    expressions::FunctionId,
    heap::{Heap, HeapId},
    scope,
    value::Value,
};

/// Index into the interpreter-owned blueprint registry. Uncounted: the
/// registry outlives every value that mentions a blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlueprintId(u32);

impl BlueprintId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct Blueprint {
    pub name: String,
    pub parent: Option<BlueprintId>,
    /// Class attributes and methods; an isolated scope (no outer link).
    pub attrs: HeapId,
    /// Cached closure for this blueprint's own `init` method, if declared.
    pub init: Option<HeapId>,
}

/// All blueprints created during a run, freed together at shutdown.
#[derive(Debug, Default)]
pub(crate) struct Blueprints {
    list: Vec<Blueprint>,
}

impl Blueprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, blueprint: Blueprint) -> BlueprintId {
        let id = BlueprintId(u32::try_from(self.list.len()).expect("blueprint registry overflow"));
        self.list.push(blueprint);
        id
    }

    pub fn get(&self, id: BlueprintId) -> &Blueprint {
        &self.list[id.index()]
    }

    pub fn name(&self, id: BlueprintId) -> &str {
        &self.list[id.index()].name
    }

    /// Searches `start` and its ancestors for an attribute, returning the
    /// defining blueprint and the scope that holds the value.
    pub fn find_attr(&self, heap: &Heap, start: BlueprintId, name: &str) -> Option<(BlueprintId, HeapId)> {
        let mut current = Some(start);
        while let Some(id) = current {
            let blueprint = self.get(id);
            if scope::scope(heap, blueprint.attrs).contains(name) {
                return Some((id, blueprint.attrs));
            }
            current = blueprint.parent;
        }
        None
    }

    /// Finds the nearest cached `init` on the chain starting at `start`,
    /// returning the blueprint that defines it and the init closure.
    pub fn find_init(&self, start: BlueprintId) -> Option<(BlueprintId, HeapId)> {
        let mut current = Some(start);
        while let Some(id) = current {
            let blueprint = self.get(id);
            if let Some(init) = blueprint.init {
                return Some((id, init));
            }
            current = blueprint.parent;
        }
        None
    }

    /// Releases the references the registry holds; called once at shutdown.
    pub fn free_all(&mut self, heap: &mut Heap) {
        for blueprint in self.list.drain(..) {
            heap.dec_ref(blueprint.attrs);
            if let Some(init) = blueprint.init {
                heap.dec_ref(init);
            }
        }
    }
}

/// A user function value: the definition plus its captured definition scope.
#[derive(Debug)]
pub(crate) struct Closure {
    pub func: FunctionId,
    /// The scope the function was defined in; lexical lookups from the call
    /// scope chain through here.
    pub scope: HeapId,
}

impl Closure {
    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        out.push(self.scope);
    }
}

/// An instance of a blueprint.
#[derive(Debug)]
pub(crate) struct Instance {
    pub blueprint: BlueprintId,
    /// Per-instance attribute scope, isolated (no outer link).
    pub attrs: HeapId,
}

impl Instance {
    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        out.push(self.attrs);
    }
}

/// What a bound method actually invokes.
#[derive(Debug)]
pub(crate) enum MethodCallee {
    /// A user function; `defining` is the blueprint the method was found on,
    /// used for `super` resolution inside the body.
    Function {
        func: FunctionId,
        scope: HeapId,
        defining: Option<BlueprintId>,
    },
    /// An engine-native method such as `append` on arrays.
    Native(NativeMethod),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeMethod {
    Append,
}

impl NativeMethod {
    pub fn name(self) -> &'static str {
        match self {
            Self::Append => "append",
        }
    }
}

/// A callable paired with its captured receiver.
///
/// The receiver is held by reference count; method bodies therefore mutate
/// the same object the caller sees.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub callee: MethodCallee,
    pub receiver: Value,
}

impl BoundMethod {
    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        if let MethodCallee::Function { scope, .. } = &self.callee {
            out.push(*scope);
        }
        if let Some(id) = self.receiver.ref_id() {
            out.push(id);
        }
    }
}
