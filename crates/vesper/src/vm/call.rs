//! Call machinery.
//!
//! `call_value` dispatches on the callee: user functions enter a fresh
//! scope chained to their definition scope; bound methods inject the
//! receiver as the first binding; blueprints instantiate; built-ins
//! dispatch by enum. Async functions do not execute: they allocate a `New`
//! coroutine with the arguments already bound.

use smallvec::SmallVec;

use crate::{
    blueprint::{BlueprintId, Instance, MethodCallee, NativeMethod},
    builtins::Builtins,
    exception::{ExcType, RunError},
    expressions::{ExprLoc, FunctionId, Param},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    scope::{self, Scope},
    sched::Coroutine,
    token::CodeRange,
    tracer::Tracer,
    value::Value,
    vm::{Exec, Flow, MAX_CALL_DEPTH, Vm},
};

type Args = SmallVec<[Value; 4]>;

enum CalleeKind {
    Closure {
        func: FunctionId,
        scope: HeapId,
    },
    Method {
        func: FunctionId,
        scope: HeapId,
        defining: Option<BlueprintId>,
    },
    NativeAppend,
    NotCallable(&'static str),
}

impl<P: PrintWriter, Tr: Tracer> Vm<'_, P, Tr> {
    pub(super) fn eval_call(&mut self, callee: &ExprLoc, args: &[ExprLoc], range: CodeRange) -> Exec<Value> {
        let callee_value = self.eval_expr(callee)?;
        let mut values: Args = SmallVec::with_capacity(args.len());
        for arg in args {
            match self.eval_expr(arg) {
                Ok(v) => values.push(v),
                Err(err) => {
                    callee_value.drop_with_heap(&mut self.heap);
                    self.drop_all(values);
                    return Err(err);
                }
            }
        }
        self.call_value(callee_value, values, range)
    }

    pub(super) fn call_value(&mut self, callee: Value, args: Args, range: CodeRange) -> Exec<Value> {
        match callee {
            Value::Ref(id) => {
                let kind = match self.heap.get(id) {
                    HeapData::Closure(closure) => CalleeKind::Closure {
                        func: closure.func,
                        scope: closure.scope,
                    },
                    HeapData::BoundMethod(method) => match &method.callee {
                        MethodCallee::Function {
                            func,
                            scope,
                            defining,
                        } => CalleeKind::Method {
                            func: *func,
                            scope: *scope,
                            defining: *defining,
                        },
                        MethodCallee::Native(NativeMethod::Append) => CalleeKind::NativeAppend,
                    },
                    other => CalleeKind::NotCallable(other.type_name()),
                };
                match kind {
                    CalleeKind::Closure { func, scope } => {
                        let result = self.call_function(func, scope, None, None, args, range);
                        self.heap.dec_ref(id);
                        result
                    }
                    CalleeKind::Method {
                        func,
                        scope,
                        defining,
                    } => {
                        let receiver = match self.heap.get(id) {
                            HeapData::BoundMethod(method) => method.receiver.clone_with_heap(&self.heap),
                            _ => unreachable!("bound method vanished during call"),
                        };
                        let result = self.call_function(func, scope, Some(receiver), defining, args, range);
                        self.heap.dec_ref(id);
                        result
                    }
                    CalleeKind::NativeAppend => self.call_append(id, args, range),
                    CalleeKind::NotCallable(type_name) => {
                        self.drop_all(args);
                        self.heap.dec_ref(id);
                        Err(RunError::type_error(format!("{type_name} is not callable"))
                            .with_range(range)
                            .into())
                    }
                }
            }
            Value::Blueprint(id) => self.instantiate(id, args, range),
            Value::Builtin(builtin) => self.call_builtin(builtin, args, range),
            other => {
                let type_name = other.type_name(&self.heap);
                self.drop_all(args);
                Err(RunError::type_error(format!("{type_name} is not callable"))
                    .with_range(range)
                    .into())
            }
        }
    }

    /// Calls a user function: arity check against the required/total
    /// parameter counts, fresh scope chained to the definition scope,
    /// receiver injection, positional binding, then defaults for whatever
    /// the caller left out. Async functions return a `New` coroutine
    /// instead of running.
    pub(super) fn call_function(
        &mut self,
        func: FunctionId,
        def_scope: HeapId,
        receiver: Option<Value>,
        defining: Option<BlueprintId>,
        args: Args,
        range: CodeRange,
    ) -> Exec<Value> {
        let def = self.functions[func.index()].clone();
        let params: &[Param] = if def.is_method { &def.params[1..] } else { &def.params };
        let required = params.iter().take_while(|p| p.default.is_none()).count();
        if args.len() < required || args.len() > params.len() {
            let expected = if required == params.len() {
                format!("exactly {required}")
            } else {
                format!("{required} to {}", params.len())
            };
            let got = args.len();
            self.drop_all(args);
            if let Some(receiver) = receiver {
                receiver.drop_with_heap(&mut self.heap);
            }
            return Err(RunError::new(
                ExcType::ArityError,
                format!("{}() takes {expected} argument(s), got {got}", def.name),
            )
            .with_range(range)
            .into());
        }
        if self.call_depth() >= MAX_CALL_DEPTH {
            self.drop_all(args);
            if let Some(receiver) = receiver {
                receiver.drop_with_heap(&mut self.heap);
            }
            return Err(RunError::new(ExcType::RecursionError, "maximum call depth exceeded")
                .with_range(range)
                .into());
        }

        self.heap.inc_ref(def_scope);
        let call_scope = self.heap.allocate(HeapData::Scope(Scope::new(Some(def_scope))));
        if let Some(receiver) = receiver {
            let receiver_name = def.params[0].name.clone();
            let old = scope::scope_mut(&mut self.heap, call_scope).declare(receiver_name, receiver);
            debug_assert!(old.is_none());
        }
        let supplied = args.len();
        for (param, arg) in params.iter().zip(args) {
            let old = scope::scope_mut(&mut self.heap, call_scope).declare(param.name.clone(), arg);
            debug_assert!(old.is_none());
        }

        self.push_frame(call_scope, defining, def.name.clone());
        for param in &params[supplied..] {
            let default = param.default.as_ref().expect("arity check admitted a missing argument");
            match self.eval_expr(default) {
                Ok(value) => {
                    let old = scope::scope_mut(&mut self.heap, call_scope).declare(param.name.clone(), value);
                    if let Some(old) = old {
                        old.drop_with_heap(&mut self.heap);
                    }
                }
                Err(err) => {
                    self.pop_frame();
                    self.heap.dec_ref(call_scope);
                    return Err(err);
                }
            }
        }

        if def.is_async {
            self.pop_frame();
            // the coroutine takes over the call scope reference
            let coroutine = Coroutine::new_body(def.name.clone(), func, call_scope, defining);
            return Ok(Value::Ref(self.heap.allocate(HeapData::Coroutine(coroutine))));
        }

        let flow = self.exec_block(&def.body);
        self.pop_frame();
        self.heap.dec_ref(call_scope);
        match flow {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(Flow::Normal) => Ok(Value::Null),
            Ok(Flow::Break | Flow::Continue) => {
                unreachable!("break/continue escaped a function body")
            }
            Err(signal) => Err(signal),
        }
    }

    fn call_append(&mut self, method_id: HeapId, args: Args, range: CodeRange) -> Exec<Value> {
        if args.len() != 1 {
            let got = args.len();
            self.drop_all(args);
            self.heap.dec_ref(method_id);
            return Err(RunError::new(
                ExcType::ArityError,
                format!("append() takes exactly 1 argument, got {got}"),
            )
            .with_range(range)
            .into());
        }
        let value = args.into_iter().next().expect("length checked");
        let receiver_id = match self.heap.get(method_id) {
            HeapData::BoundMethod(method) => method
                .receiver
                .ref_id()
                .expect("append bound to a non-heap receiver"),
            _ => unreachable!("bound method vanished during call"),
        };
        match self.heap.get_mut(receiver_id) {
            HeapData::Array(items) => items.push(value),
            other => unreachable!("append bound to {}", other.type_name()),
        }
        self.heap.dec_ref(method_id);
        Ok(Value::Null)
    }

    /// `Blueprint(args...)`: allocate the instance, then run the nearest
    /// `init` up the chain with the instance as receiver. Without an init,
    /// arguments are an error.
    fn instantiate(&mut self, blueprint: BlueprintId, args: Args, range: CodeRange) -> Exec<Value> {
        let attrs = self.heap.allocate(HeapData::Scope(Scope::new(None)));
        let instance = self.heap.allocate(HeapData::Instance(Instance { blueprint, attrs }));
        match self.blueprints.find_init(blueprint) {
            None => {
                if args.is_empty() {
                    Ok(Value::Ref(instance))
                } else {
                    let name = self.blueprints.name(blueprint).to_owned();
                    let got = args.len();
                    self.drop_all(args);
                    self.heap.dec_ref(instance);
                    Err(RunError::new(
                        ExcType::ArityError,
                        format!("{name}() takes no arguments, got {got}"),
                    )
                    .with_range(range)
                    .into())
                }
            }
            Some((defining, init_id)) => {
                let (func, closure_scope) = match self.heap.get(init_id) {
                    HeapData::Closure(closure) => (closure.func, closure.scope),
                    other => unreachable!("cached init is {}", other.type_name()),
                };
                self.heap.inc_ref(instance);
                let receiver = Value::Ref(instance);
                match self.call_function(func, closure_scope, Some(receiver), Some(defining), args, range) {
                    Ok(ignored) => {
                        // init's return value is discarded
                        ignored.drop_with_heap(&mut self.heap);
                        Ok(Value::Ref(instance))
                    }
                    Err(err) => {
                        self.heap.dec_ref(instance);
                        Err(err)
                    }
                }
            }
        }
    }

    fn call_builtin(&mut self, builtin: Builtins, mut args: Args, range: CodeRange) -> Exec<Value> {
        match builtin {
            Builtins::Slice => {
                if !(2..=3).contains(&args.len()) {
                    let got = args.len();
                    self.drop_all(args);
                    return Err(RunError::new(
                        ExcType::ArityError,
                        format!("slice() takes 2 or 3 arguments, got {got}"),
                    )
                    .with_range(range)
                    .into());
                }
                let end = if args.len() == 3 { args.pop() } else { None };
                let start = args.pop().expect("length checked");
                let seq = args.pop().expect("length checked");
                self.builtin_slice(seq, start, end, range)
            }
            Builtins::AsyncSleep => {
                let seconds = self.expect_one(args, "async_sleep", range)?;
                let duration = match seconds {
                    Value::Int(v) => v as f64,
                    Value::Float(v) => v,
                    other => {
                        let type_name = other.type_name(&self.heap).to_owned();
                        other.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!(
                            "async_sleep() expects a number of seconds, got {type_name}"
                        ))
                        .with_range(range)
                        .into());
                    }
                };
                if duration < 0.0 {
                    return Err(RunError::new(ExcType::ValueError, "sleep duration must not be negative")
                        .with_range(range)
                        .into());
                }
                Ok(Value::Ref(
                    self.heap.allocate(HeapData::Coroutine(Coroutine::new_sleep(duration))),
                ))
            }
            Builtins::Gather => {
                let tasks = self.expect_one(args, "gather", range)?;
                self.builtin_gather(tasks, range)
            }
            Builtins::Cancel => {
                let target = self.expect_one(args, "cancel", range)?;
                let id = match target.ref_id() {
                    Some(id) if matches!(self.heap.get(id), HeapData::Coroutine(_)) => id,
                    _ => {
                        let type_name = target.type_name(&self.heap).to_owned();
                        target.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!(
                            "cancel() expects a coroutine, got {type_name}"
                        ))
                        .with_range(range)
                        .into());
                    }
                };
                self.cancel_coroutine(id);
                target.drop_with_heap(&mut self.heap);
                Ok(Value::Null)
            }
        }
    }

    fn expect_one(&mut self, args: Args, name: &str, range: CodeRange) -> Exec<Value> {
        if args.len() == 1 {
            Ok(args.into_iter().next().expect("length checked"))
        } else {
            let got = args.len();
            self.drop_all(args);
            Err(RunError::new(
                ExcType::ArityError,
                format!("{name}() takes exactly 1 argument, got {got}"),
            )
            .with_range(range)
            .into())
        }
    }

    fn builtin_gather(&mut self, tasks: Value, range: CodeRange) -> Exec<Value> {
        let Some(array_id) = tasks.ref_id() else {
            let type_name = tasks.type_name(&self.heap).to_owned();
            tasks.drop_with_heap(&mut self.heap);
            return Err(
                RunError::type_error(format!("gather() expects an array of coroutines, got {type_name}"))
                    .with_range(range)
                    .into(),
            );
        };
        let children: Vec<HeapId> = match self.heap.get(array_id) {
            HeapData::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    match item.ref_id() {
                        Some(id) if matches!(self.heap.get(id), HeapData::Coroutine(_)) => ids.push(id),
                        _ => {
                            let type_name = item.type_name(&self.heap).to_owned();
                            tasks.drop_with_heap(&mut self.heap);
                            return Err(RunError::type_error(format!(
                                "gather() expects an array of coroutines, found {type_name}"
                            ))
                            .with_range(range)
                            .into());
                        }
                    }
                }
                ids
            }
            other => {
                let type_name = other.type_name();
                tasks.drop_with_heap(&mut self.heap);
                return Err(
                    RunError::type_error(format!("gather() expects an array of coroutines, got {type_name}"))
                        .with_range(range)
                        .into(),
                );
            }
        };
        for child in &children {
            self.heap.inc_ref(*child);
        }
        tasks.drop_with_heap(&mut self.heap);
        Ok(Value::Ref(
            self.heap.allocate(HeapData::Coroutine(Coroutine::new_gather(children))),
        ))
    }

    fn builtin_slice(&mut self, seq: Value, start: Value, end: Option<Value>, range: CodeRange) -> Exec<Value> {
        let start_raw = match start {
            Value::Int(v) => v,
            other => {
                let type_name = other.type_name(&self.heap).to_owned();
                other.drop_with_heap(&mut self.heap);
                if let Some(end) = end {
                    end.drop_with_heap(&mut self.heap);
                }
                seq.drop_with_heap(&mut self.heap);
                return Err(
                    RunError::type_error(format!("slice() bounds must be ints, got {type_name}"))
                        .with_range(range)
                        .into(),
                );
            }
        };
        let end_raw = match end {
            None => None,
            Some(Value::Int(v)) => Some(v),
            Some(other) => {
                let type_name = other.type_name(&self.heap).to_owned();
                other.drop_with_heap(&mut self.heap);
                seq.drop_with_heap(&mut self.heap);
                return Err(
                    RunError::type_error(format!("slice() bounds must be ints, got {type_name}"))
                        .with_range(range)
                        .into(),
                );
            }
        };

        let Some(id) = seq.ref_id() else {
            let type_name = seq.type_name(&self.heap).to_owned();
            seq.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error(format!(
                "slice() expects an array, tuple, or string, got {type_name}"
            ))
            .with_range(range)
            .into());
        };
        let result = match self.heap.get(id) {
            HeapData::Array(items) | HeapData::Tuple(items) => {
                let is_tuple = matches!(self.heap.get(id), HeapData::Tuple(_));
                let (from, to) = slice_bounds(start_raw, end_raw, items.len());
                let shallow: Vec<Value> = items[from..to].iter().map(Value::shallow).collect();
                let copies: Vec<Value> = shallow.iter().map(|v| v.copy_for_read(&mut self.heap)).collect();
                let data = if is_tuple {
                    HeapData::Tuple(copies)
                } else {
                    HeapData::Array(copies)
                };
                Value::Ref(self.heap.allocate(data))
            }
            HeapData::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (from, to) = slice_bounds(start_raw, end_raw, chars.len());
                let text: String = chars[from..to].iter().collect();
                Value::str(&mut self.heap, text)
            }
            other => {
                let type_name = other.type_name();
                seq.drop_with_heap(&mut self.heap);
                return Err(RunError::type_error(format!(
                    "slice() expects an array, tuple, or string, got {type_name}"
                ))
                .with_range(range)
                .into());
            }
        };
        seq.drop_with_heap(&mut self.heap);
        Ok(result)
    }
}

/// Slice bounds wrap once through the length and clamp to it; an inverted
/// range is empty.
fn slice_bounds(start: i64, end: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |raw: i64| -> usize {
        let adjusted = if raw < 0 { raw + len as i64 } else { raw };
        adjusted.clamp(0, len as i64) as usize
    };
    let from = clamp(start);
    let to = end.map_or(len, clamp);
    if from > to { (from, from) } else { (from, to) }
}

#[cfg(test)]
mod tests {
    use super::slice_bounds;

    #[test]
    fn slice_bounds_clamp_and_wrap() {
        assert_eq!(slice_bounds(0, Some(2), 4), (0, 2));
        assert_eq!(slice_bounds(-2, None, 4), (2, 4));
        assert_eq!(slice_bounds(1, Some(-1), 4), (1, 3));
        assert_eq!(slice_bounds(3, Some(1), 4), (3, 3));
        assert_eq!(slice_bounds(0, Some(99), 4), (0, 4));
        assert_eq!(slice_bounds(-99, None, 4), (0, 4));
    }
}
