//! Attribute access, indexing, and receiver resolution.
//!
//! Two read modes thread through this module. `Copy` is the language's read
//! semantics: the result is an independent deep copy. `Share` is used while
//! resolving the receiver of an index/attribute chain rooted at a variable,
//! so `a[0].append(x)` and `obj.cells.append(x)` mutate the stored
//! container instead of a throwaway copy, and method receivers keep object
//! identity.

use crate::{
    blueprint::{BlueprintId, BoundMethod, MethodCallee, NativeMethod},
    exception::{RunError, Signal},
    expressions::{Expr, ExprLoc, FunctionId},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    scope,
    token::CodeRange,
    tracer::Tracer,
    value::Value,
    vm::{Exec, Vm, normalize_index, string_content},
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadMode {
    /// Independent deep copy (what a plain read produces).
    Copy,
    /// Refcounted share (what chain navigation and receivers need).
    Share,
}

impl<P: PrintWriter, Tr: Tracer> Vm<'_, P, Tr> {
    fn read_out(&mut self, shallow: Value, mode: ReadMode) -> Value {
        match mode {
            ReadMode::Copy => shallow.copy_for_read(&mut self.heap),
            ReadMode::Share => shallow.clone_with_heap(&self.heap),
        }
    }

    // === indexing ===

    pub(super) fn eval_index(&mut self, base: &ExprLoc, index: &ExprLoc) -> Exec<Value> {
        let recv = self.eval_receiver(base)?;
        let idx = match self.eval_expr(index) {
            Ok(v) => v,
            Err(err) => {
                recv.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let result = self.index_read(&recv, idx, index.range, ReadMode::Copy);
        recv.drop_with_heap(&mut self.heap);
        result
    }

    fn index_read(&mut self, recv: &Value, idx: Value, idx_range: CodeRange, mode: ReadMode) -> Exec<Value> {
        let Some(id) = recv.ref_id() else {
            let type_name = recv.type_name(&self.heap).to_owned();
            idx.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error(format!("cannot index {type_name}"))
                .with_range(idx_range)
                .into());
        };
        match self.heap.get(id) {
            HeapData::Array(items) | HeapData::Tuple(items) => {
                let len = items.len();
                let raw = match idx {
                    Value::Int(raw) => raw,
                    other => {
                        let type_name = other.type_name(&self.heap).to_owned();
                        other.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!("sequence index must be an int, got {type_name}"))
                            .with_range(idx_range)
                            .into());
                    }
                };
                let at = normalize_index(raw, len).map_err(|e| Signal::from(e.with_range(idx_range)))?;
                let shallow = match self.heap.get(id) {
                    HeapData::Array(items) | HeapData::Tuple(items) => items[at].shallow(),
                    _ => unreachable!("sequence vanished during indexing"),
                };
                Ok(self.read_out(shallow, mode))
            }
            HeapData::Str(s) => {
                let len = s.chars().count();
                let raw = match idx {
                    Value::Int(raw) => raw,
                    other => {
                        let type_name = other.type_name(&self.heap).to_owned();
                        other.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!("string index must be an int, got {type_name}"))
                            .with_range(idx_range)
                            .into());
                    }
                };
                let at = normalize_index(raw, len).map_err(|e| Signal::from(e.with_range(idx_range)))?;
                let ch = match self.heap.get(id) {
                    HeapData::Str(s) => s.chars().nth(at).expect("index checked against length"),
                    _ => unreachable!("string vanished during indexing"),
                };
                Ok(Value::str(&mut self.heap, ch.to_string()))
            }
            HeapData::Dict(entries) => {
                let Some(key) = string_content(&idx, &self.heap) else {
                    let type_name = idx.type_name(&self.heap).to_owned();
                    idx.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error(format!("dict keys must be strings, got {type_name}"))
                        .with_range(idx_range)
                        .into());
                };
                let Some(found) = entries.get(&key) else {
                    idx.drop_with_heap(&mut self.heap);
                    return Err(RunError::key_error(&key).with_range(idx_range).into());
                };
                let shallow = found.shallow();
                idx.drop_with_heap(&mut self.heap);
                Ok(self.read_out(shallow, mode))
            }
            other => {
                let type_name = other.type_name();
                idx.drop_with_heap(&mut self.heap);
                Err(RunError::type_error(format!("cannot index {type_name}"))
                    .with_range(idx_range)
                    .into())
            }
        }
    }

    // === attributes ===

    pub(super) fn eval_attr(&mut self, base: &ExprLoc, attr: &str, range: CodeRange) -> Exec<Value> {
        if matches!(base.expr, Expr::Super) {
            return self.eval_super_attr(attr, range);
        }
        let recv = self.eval_receiver(base)?;
        let result = self.attr_read(&recv, attr, range, ReadMode::Copy);
        recv.drop_with_heap(&mut self.heap);
        result
    }

    fn attr_read(&mut self, recv: &Value, attr: &str, range: CodeRange, mode: ReadMode) -> Exec<Value> {
        match recv {
            Value::Blueprint(id) => {
                if attr == "name" {
                    let name = self.blueprints.name(*id).to_owned();
                    return Ok(Value::str(&mut self.heap, name));
                }
                Err(RunError::attribute_error("blueprint", attr).with_range(range).into())
            }
            Value::Ref(id) => self.heap_attr_read(*id, recv, attr, range, mode),
            other => {
                let type_name = other.type_name(&self.heap);
                Err(RunError::attribute_error(type_name, attr).with_range(range).into())
            }
        }
    }

    fn heap_attr_read(
        &mut self,
        id: HeapId,
        recv: &Value,
        attr: &str,
        range: CodeRange,
        mode: ReadMode,
    ) -> Exec<Value> {
        match self.heap.get(id) {
            HeapData::Array(items) => match attr {
                // `.len` never allocates
                "len" => Ok(Value::Int(items.len() as i64)),
                "append" => {
                    let receiver = recv.clone_with_heap(&self.heap);
                    Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(BoundMethod {
                        callee: MethodCallee::Native(NativeMethod::Append),
                        receiver,
                    }))))
                }
                _ => Err(RunError::attribute_error("array", attr).with_range(range).into()),
            },
            HeapData::Tuple(items) => match attr {
                "len" => Ok(Value::Int(items.len() as i64)),
                _ => Err(RunError::attribute_error("tuple", attr).with_range(range).into()),
            },
            HeapData::Str(s) => match attr {
                "len" => Ok(Value::Int(s.chars().count() as i64)),
                _ => Err(RunError::attribute_error("string", attr).with_range(range).into()),
            },
            HeapData::Dict(entries) => {
                if attr == "len" {
                    return Ok(Value::Int(entries.len() as i64));
                }
                // dot access on a dict is string-key lookup
                let Some(found) = entries.get(attr) else {
                    return Err(RunError::key_error(attr).with_range(range).into());
                };
                let shallow = found.shallow();
                Ok(self.read_out(shallow, mode))
            }
            HeapData::Instance(instance) => {
                if attr == "blueprint" {
                    return Ok(Value::Blueprint(instance.blueprint));
                }
                let attrs_scope = instance.attrs;
                let blueprint = instance.blueprint;
                if let Some(found) = scope::scope(&self.heap, attrs_scope).get(attr) {
                    let shallow = found.shallow();
                    return Ok(self.read_out(shallow, mode));
                }
                if let Some((defining, holder)) = self.blueprints.find_attr(&self.heap, blueprint, attr) {
                    let shallow = scope::scope(&self.heap, holder)
                        .get(attr)
                        .expect("find_attr reported a missing binding")
                        .shallow();
                    if let Some(closure) = self.as_closure(&shallow) {
                        let (func, closure_scope) = closure;
                        return Ok(self.bind_method(recv, func, closure_scope, Some(defining)));
                    }
                    return Ok(self.read_out(shallow, mode));
                }
                let type_name = format!("`{}` instance", self.blueprints.name(blueprint));
                Err(RunError::attribute_error(&type_name, attr).with_range(range).into())
            }
            other => {
                let type_name = other.type_name();
                Err(RunError::attribute_error(type_name, attr).with_range(range).into())
            }
        }
    }

    fn as_closure(&self, value: &Value) -> Option<(FunctionId, HeapId)> {
        let id = value.ref_id()?;
        match self.heap.get(id) {
            HeapData::Closure(closure) => Some((closure.func, closure.scope)),
            _ => None,
        }
    }

    pub(super) fn bind_method(
        &mut self,
        receiver: &Value,
        func: FunctionId,
        closure_scope: HeapId,
        defining: Option<BlueprintId>,
    ) -> Value {
        self.heap.inc_ref(closure_scope);
        let receiver = receiver.clone_with_heap(&self.heap);
        Value::Ref(self.heap.allocate(HeapData::BoundMethod(BoundMethod {
            callee: MethodCallee::Function {
                func,
                scope: closure_scope,
                defining,
            },
            receiver,
        })))
    }

    /// `super.attr`: resolves against the parent of the blueprint the
    /// running method was found on, binding functions to the current `self`.
    fn eval_super_attr(&mut self, attr: &str, range: CodeRange) -> Exec<Value> {
        let Some(defining) = self.defining_class() else {
            return Err(RunError::type_error("`super` may only be used inside a method")
                .with_range(range)
                .into());
        };
        let Some(parent) = self.blueprints.get(defining).parent else {
            let name = self.blueprints.name(defining).to_owned();
            return Err(RunError::type_error(format!("blueprint `{name}` has no parent"))
                .with_range(range)
                .into());
        };
        let scope_id = self.scope_id();
        let Some(owner) = scope::resolve(&self.heap, scope_id, "self") else {
            return Err(RunError::type_error("`super` requires `self` in scope")
                .with_range(range)
                .into());
        };
        let self_value = scope::scope(&self.heap, owner)
            .get("self")
            .expect("resolved scope lost its binding")
            .shallow();
        let Some((found_on, holder)) = self.blueprints.find_attr(&self.heap, parent, attr) else {
            let name = self.blueprints.name(parent).to_owned();
            return Err(RunError::attribute_error(&format!("blueprint `{name}`"), attr)
                .with_range(range)
                .into());
        };
        let shallow = scope::scope(&self.heap, holder)
            .get(attr)
            .expect("find_attr reported a missing binding")
            .shallow();
        if let Some((func, closure_scope)) = self.as_closure(&shallow) {
            return Ok(self.bind_method(&self_value, func, closure_scope, Some(found_on)));
        }
        Ok(shallow.copy_for_read(&mut self.heap))
    }

    // === receiver resolution ===

    /// Evaluates the base of an index/attribute chain. Chains rooted at a
    /// bound variable resolve to shares of the stored containers; anything
    /// else falls back to ordinary (copying) evaluation.
    pub(super) fn eval_receiver(&mut self, expr: &ExprLoc) -> Exec<Value> {
        match self.resolve_place_value(expr)? {
            Some(place) => Ok(place),
            None => self.eval_expr(expr),
        }
    }

    /// Returns a share of the value an identifier-rooted chain denotes, or
    /// `None` when the expression is not such a chain (fresh literals,
    /// call results, unresolved names). Once the root resolves, results and
    /// errors are definitive: nested expressions are only evaluated once.
    fn resolve_place_value(&mut self, expr: &ExprLoc) -> Exec<Option<Value>> {
        match &expr.expr {
            Expr::Name(name) => {
                let scope_id = self.scope_id();
                let Some(owner) = scope::resolve(&self.heap, scope_id, name) else {
                    return Ok(None);
                };
                let shallow = scope::scope(&self.heap, owner)
                    .get(name)
                    .expect("resolved scope lost its binding")
                    .shallow();
                Ok(Some(shallow.clone_with_heap(&self.heap)))
            }
            Expr::Index { base, index } => {
                let Some(parent) = self.resolve_place_value(base)? else {
                    return Ok(None);
                };
                let idx = match self.eval_expr(index) {
                    Ok(v) => v,
                    Err(err) => {
                        parent.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                let child = self.index_read(&parent, idx, index.range, ReadMode::Share);
                parent.drop_with_heap(&mut self.heap);
                child.map(Some)
            }
            Expr::Attr { base, attr } => {
                if matches!(base.expr, Expr::Super) {
                    return Ok(None);
                }
                let Some(parent) = self.resolve_place_value(base)? else {
                    return Ok(None);
                };
                let child = self.attr_read(&parent, attr, expr.range, ReadMode::Share);
                parent.drop_with_heap(&mut self.heap);
                child.map(Some)
            }
            _ => Ok(None),
        }
    }
}
