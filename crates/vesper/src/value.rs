//! Runtime value representation.
//!
//! Small immediates live inline; everything else sits in the heap arena and
//! is reached through `Ref`. `Clone` is intentionally not derived: use
//! `clone_with_heap` to share a value (bumping the refcount) or
//! `copy_for_read` to materialize the copy the language's read semantics
//! require, and release owned values with `drop_with_heap`.
//!
//! Reading a variable deep-copies mutable containers (strings, arrays,
//! tuples, dicts) so the copies evolve independently, and shares everything
//! with object identity (instances, bound methods, coroutines, functions)
//! by reference count.

use std::rc::Rc;

use crate::{
    blueprint::{BlueprintId, Blueprints, MethodCallee},
    builtins::Builtins,
    dict::Dict,
    expressions::FunctionDef,
    heap::{Heap, HeapData, HeapId},
};

#[derive(Debug)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Builtin(Builtins),
    /// Uncounted index into the blueprint registry, which outlives all
    /// values and is freed in one sweep at shutdown.
    Blueprint(BlueprintId),
    /// The `super` marker; never stored in a scope, only produced and
    /// consumed inside attribute evaluation.
    Super,
    Ref(HeapId),
}

impl Value {
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Transient bitwise alias. Does not adjust reference counts: the result
    /// must either be short-lived (never dropped with the heap) or passed
    /// through `copy_for_read`/`clone_with_heap` before being stored.
    pub fn shallow(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(v) => Self::Bool(*v),
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::Builtin(b) => Self::Builtin(*b),
            Self::Blueprint(id) => Self::Blueprint(*id),
            Self::Super => Self::Super,
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// Shares the value: heap references get their count bumped, immediates
    /// are copied.
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.shallow()
    }

    /// Releases one owned reference.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Produces the value a variable read yields: a deep copy for mutable
    /// containers, a refcounted share for identity types, a plain copy for
    /// immediates.
    pub fn copy_for_read(&self, heap: &mut Heap) -> Self {
        let Self::Ref(id) = self else {
            return self.shallow();
        };
        let id = *id;
        match heap.get(id) {
            HeapData::Str(s) => {
                let copy = s.clone();
                Self::Ref(heap.allocate(HeapData::Str(copy)))
            }
            HeapData::Array(items) => {
                let snapshot: Vec<Self> = items.iter().map(Self::shallow).collect();
                let copies: Vec<Self> = snapshot.iter().map(|v| v.copy_for_read(heap)).collect();
                Self::Ref(heap.allocate(HeapData::Array(copies)))
            }
            HeapData::Tuple(items) => {
                let snapshot: Vec<Self> = items.iter().map(Self::shallow).collect();
                let copies: Vec<Self> = snapshot.iter().map(|v| v.copy_for_read(heap)).collect();
                Self::Ref(heap.allocate(HeapData::Tuple(copies)))
            }
            HeapData::Dict(dict) => {
                let snapshot: Vec<(String, Self)> =
                    dict.iter().map(|(k, v)| (k.to_owned(), v.shallow())).collect();
                let mut copy = Dict::with_capacity(snapshot.len());
                for (key, value) in snapshot {
                    let value = value.copy_for_read(heap);
                    let previous = copy.insert(key, value);
                    debug_assert!(previous.is_none());
                }
                Self::Ref(heap.allocate(HeapData::Dict(copy)))
            }
            _ => {
                heap.inc_ref(id);
                Self::Ref(id)
            }
        }
    }

    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Builtin(_) => "built-in function",
            Self::Blueprint(_) => "blueprint",
            Self::Super => "super",
            Self::Ref(id) => heap.get(*id).type_name(),
        }
    }

    /// Numeric view used by comparisons; booleans contribute 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(v) => Some(f64::from(i8::from(*v))),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Allocates a fresh heap string.
    pub fn str(heap: &mut Heap, text: impl Into<String>) -> Self {
        Self::Ref(heap.allocate(HeapData::Str(text.into())))
    }
}

/// Releases a whole vector of owned values.
pub(crate) fn drop_values(values: Vec<Value>, heap: &mut Heap) {
    for value in values {
        value.drop_with_heap(heap);
    }
}

/// Structural equality.
///
/// Numbers and booleans compare numerically across types; strings compare
/// by content; arrays, tuples, and dicts compare element-wise (a documented
/// departure from the pointer identity a refcounting C implementation would
/// give, where copy-on-read makes identity useless); identity types compare
/// by heap id. Everything else across differing types is unequal.
pub(crate) fn values_equal(a: &Value, b: &Value, heap: &Heap) -> bool {
    values_equal_at_depth(a, b, heap, 0)
}

const MAX_EQ_DEPTH: u32 = 64;

fn values_equal_at_depth(a: &Value, b: &Value, heap: &Heap, depth: u32) -> bool {
    if depth > MAX_EQ_DEPTH {
        return false;
    }
    // exact integer compare first so large i64 values do not round through f64
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x == y;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Blueprint(x), Value::Blueprint(y)) => x == y,
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return true;
            }
            match (heap.get(*x), heap.get(*y)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1 == s2,
                (HeapData::Array(v1), HeapData::Array(v2)) | (HeapData::Tuple(v1), HeapData::Tuple(v2)) => {
                    v1.len() == v2.len()
                        && v1
                            .iter()
                            .zip(v2)
                            .all(|(e1, e2)| values_equal_at_depth(e1, e2, heap, depth + 1))
                }
                (HeapData::Dict(d1), HeapData::Dict(d2)) => {
                    d1.len() == d2.len()
                        && d1.iter().all(|(key, v1)| {
                            d2.get(key)
                                .is_some_and(|v2| values_equal_at_depth(v1, v2, heap, depth + 1))
                        })
                }
                // identity types: only the same heap entry is equal
                _ => false,
            }
        }
        _ => false,
    }
}

/// Formats a float the way the language prints them: shortest round-trip
/// form, always keeping a fractional part for finite values (`5.0`, not `5`).
pub(crate) fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value.is_infinite() {
        if value > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else {
        ryu::Buffer::new().format_finite(value).to_owned()
    }
}

/// Shared context for rendering values: `show:`, string interpolation, and
/// diagnostics all funnel through here.
pub(crate) struct ReprCtx<'a> {
    pub heap: &'a Heap,
    pub blueprints: &'a Blueprints,
    pub functions: &'a [Rc<FunctionDef>],
}

const MAX_REPR_DEPTH: u32 = 32;

impl ReprCtx<'_> {
    /// Human-facing rendering: strings appear without quotes.
    pub fn display(&self, value: &Value) -> String {
        if let Value::Ref(id) = value
            && let HeapData::Str(s) = self.heap.get(*id)
        {
            return s.clone();
        }
        self.repr_at_depth(value, 0)
    }

    /// Source-like rendering: strings appear quoted; used inside containers.
    pub fn repr(&self, value: &Value) -> String {
        self.repr_at_depth(value, 0)
    }

    fn repr_at_depth(&self, value: &Value, depth: u32) -> String {
        if depth > MAX_REPR_DEPTH {
            return "...".to_owned();
        }
        match value {
            Value::Null => "null".to_owned(),
            Value::Bool(true) => "true".to_owned(),
            Value::Bool(false) => "false".to_owned(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Builtin(b) => format!("<built-in funct {}>", b.name()),
            Value::Blueprint(id) => format!("<blueprint {}>", self.blueprints.name(*id)),
            Value::Super => "<super>".to_owned(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(s) => format!("\"{}\"", escape_str(s)),
                HeapData::Array(items) => {
                    let inner: Vec<String> = items.iter().map(|v| self.repr_at_depth(v, depth + 1)).collect();
                    format!("[{}]", inner.join(", "))
                }
                HeapData::Tuple(items) => {
                    let inner: Vec<String> = items.iter().map(|v| self.repr_at_depth(v, depth + 1)).collect();
                    if inner.len() == 1 {
                        format!("({},)", inner[0])
                    } else {
                        format!("({})", inner.join(", "))
                    }
                }
                HeapData::Dict(dict) => {
                    let inner: Vec<String> = dict
                        .iter()
                        .map(|(k, v)| format!("\"{}\": {}", escape_str(k), self.repr_at_depth(v, depth + 1)))
                        .collect();
                    format!("{{{}}}", inner.join(", "))
                }
                HeapData::Closure(closure) => {
                    format!("<funct {}>", self.functions[closure.func.index()].name)
                }
                HeapData::Instance(instance) => {
                    format!("<{} instance>", self.blueprints.name(instance.blueprint))
                }
                HeapData::BoundMethod(method) => {
                    let name = match &method.callee {
                        MethodCallee::Function { func, .. } => self.functions[func.index()].name.as_str(),
                        MethodCallee::Native(native) => native.name(),
                    };
                    format!("<bound method {name}>")
                }
                HeapData::Coroutine(coroutine) => format!("<coroutine {}>", coroutine.name),
                HeapData::Scope(_) => "<scope>".to_owned(),
            },
        }
    }
}

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_for_read_is_independent() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::Array(vec![Value::Int(1)]));
        let outer = heap.allocate(HeapData::Array(vec![Value::Ref(inner), Value::Int(2)]));
        let original = Value::Ref(outer);

        let copy = original.copy_for_read(&mut heap);
        let copy_id = copy.ref_id().unwrap();
        assert_ne!(copy_id, outer);

        // mutate the copy's nested array; the original must be untouched
        let nested_copy_id = match heap.get(copy_id) {
            HeapData::Array(items) => items[0].ref_id().unwrap(),
            _ => panic!("expected array"),
        };
        assert_ne!(nested_copy_id, inner);
        match heap.get_mut(nested_copy_id) {
            HeapData::Array(items) => items.push(Value::Int(99)),
            _ => panic!("expected array"),
        }
        match heap.get(inner) {
            HeapData::Array(items) => assert_eq!(items.len(), 1),
            _ => panic!("expected array"),
        }

        assert!(values_equal(&Value::Ref(inner), &Value::Ref(inner), &heap));
        copy.drop_with_heap(&mut heap);
        original.drop_with_heap(&mut heap);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn deep_copy_preserves_equality() {
        let mut heap = Heap::new();
        let s = heap.allocate(HeapData::Str("hi".to_owned()));
        let arr = heap.allocate(HeapData::Array(vec![Value::Ref(s), Value::Int(3), Value::Float(0.5)]));
        let original = Value::Ref(arr);
        let copy = original.copy_for_read(&mut heap);
        assert!(values_equal(&original, &copy, &heap));
        copy.drop_with_heap(&mut heap);
        original.drop_with_heap(&mut heap);
    }

    #[test]
    fn numeric_equality_crosses_types() {
        let heap = Heap::new();
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0), &heap));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1), &heap));
        assert!(!values_equal(&Value::Int(0), &Value::Null, &heap));
    }

    #[test]
    fn large_ints_do_not_round_through_floats() {
        let heap = Heap::new();
        let a = Value::Int(i64::MAX);
        let b = Value::Int(i64::MAX - 1);
        assert!(!values_equal(&a, &b, &heap));
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(5.0), "5.0");
        assert_eq!(format_float(0.01), "0.01");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }
}
