//! Expression evaluation.
//!
//! Every result is an owned value; temporaries are released explicitly on
//! all paths. Errors pick up the source range of the deepest expression
//! that knows one.

use crate::{
    builtins::Builtins,
    dict::Dict,
    exception::{ExcType, RunError, Signal},
    expressions::{BoolOp, Expr, ExprLoc, Literal, TemplatePart},
    heap::HeapData,
    io::PrintWriter,
    scope,
    sched::CoroutineState,
    token::CodeRange,
    tracer::Tracer,
    value::{Value, drop_values},
    vm::{Exec, Vm},
};

impl<P: PrintWriter, Tr: Tracer> Vm<'_, P, Tr> {
    pub(super) fn eval_expr(&mut self, expr: &ExprLoc) -> Exec<Value> {
        match self.eval_expr_inner(expr) {
            Err(Signal::Raise(mut raised)) => {
                raised.error = raised.error.with_range(expr.range);
                Err(Signal::Raise(raised))
            }
            other => other,
        }
    }

    fn eval_expr_inner(&mut self, expr: &ExprLoc) -> Exec<Value> {
        match &expr.expr {
            Expr::Literal(literal) => Ok(self.eval_literal(literal)),
            Expr::StringTemplate(parts) => self.eval_template(parts),
            Expr::Name(name) => self.lookup_name(name),
            Expr::Super => Err(RunError::type_error("`super` may only be used for attribute access").into()),
            Expr::Array(items) => {
                let values = self.eval_values(items)?;
                Ok(Value::Ref(self.heap.allocate(HeapData::Array(values))))
            }
            Expr::Tuple(items) => {
                let values = self.eval_values(items)?;
                Ok(Value::Ref(self.heap.allocate(HeapData::Tuple(values))))
            }
            Expr::Dict(entries) => self.eval_dict(entries),
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                self.unary_op(*op, value, operand.range)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval_expr(left)?;
                let r = match self.eval_expr(right) {
                    Ok(r) => r,
                    Err(err) => {
                        l.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                self.binary_op(*op, l, r, expr.range)
            }
            Expr::Bool { op, left, right } => self.eval_bool_op(*op, left, right),
            Expr::Compare { op, left, right } => {
                let l = self.eval_expr(left)?;
                let r = match self.eval_expr(right) {
                    Ok(r) => r,
                    Err(err) => {
                        l.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                self.compare_op(*op, l, r, expr.range)
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
            Expr::Index { base, index } => self.eval_index(base, index),
            Expr::Attr { base, attr } => self.eval_attr(base, attr, expr.range),
            Expr::Call { callee, args } => self.eval_call(callee, args, expr.range),
            Expr::Await { target } => self.eval_await(target, expr.range),
        }
    }

    fn eval_literal(&mut self, literal: &Literal) -> Value {
        match literal {
            Literal::Null => Value::Null,
            Literal::Bool(v) => Value::Bool(*v),
            Literal::Int(v) => Value::Int(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Str(text) => Value::str(&mut self.heap, text.clone()),
        }
    }

    fn eval_template(&mut self, parts: &[TemplatePart]) -> Exec<Value> {
        let mut text = String::new();
        for part in parts {
            match part {
                TemplatePart::Text(t) => text.push_str(t),
                TemplatePart::Expr(expr) => {
                    let value = self.eval_expr(expr)?;
                    text.push_str(&self.repr_ctx().display(&value));
                    value.drop_with_heap(&mut self.heap);
                }
            }
        }
        Ok(Value::str(&mut self.heap, text))
    }

    /// Scope chain first, then built-ins; reads copy (or share, for identity
    /// types) per the language's read semantics.
    fn lookup_name(&mut self, name: &str) -> Exec<Value> {
        let scope_id = self.scope_id();
        if let Some(owner) = scope::resolve(&self.heap, scope_id, name) {
            let shallow = scope::scope(&self.heap, owner)
                .get(name)
                .expect("resolved scope lost its binding")
                .shallow();
            return Ok(shallow.copy_for_read(&mut self.heap));
        }
        if let Some(builtin) = Builtins::by_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(RunError::name_error(name).into())
    }

    pub(super) fn eval_values(&mut self, exprs: &[ExprLoc]) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.eval_expr(expr) {
                Ok(value) => values.push(value),
                Err(err) => {
                    drop_values(values, &mut self.heap);
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    fn eval_dict(&mut self, entries: &[(ExprLoc, ExprLoc)]) -> Exec<Value> {
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(entries.len());
        for (key_expr, value_expr) in entries {
            let key_value = match self.eval_expr(key_expr) {
                Ok(v) => v,
                Err(err) => {
                    self.drop_pairs(pairs);
                    return Err(err);
                }
            };
            let Some(key) = super::string_content(&key_value, &self.heap) else {
                let type_name = key_value.type_name(&self.heap).to_owned();
                key_value.drop_with_heap(&mut self.heap);
                self.drop_pairs(pairs);
                return Err(
                    RunError::type_error(format!("dict keys must be strings, got {type_name}"))
                        .with_range(key_expr.range)
                        .into(),
                );
            };
            key_value.drop_with_heap(&mut self.heap);
            let value = match self.eval_expr(value_expr) {
                Ok(v) => v,
                Err(err) => {
                    self.drop_pairs(pairs);
                    return Err(err);
                }
            };
            pairs.push((key, value));
        }
        let mut dict = Dict::with_capacity(pairs.len());
        let mut replaced = Vec::new();
        for (key, value) in pairs {
            if let Some(old) = dict.insert(key, value) {
                replaced.push(old);
            }
        }
        drop_values(replaced, &mut self.heap);
        Ok(Value::Ref(self.heap.allocate(HeapData::Dict(dict))))
    }

    fn drop_pairs(&mut self, pairs: Vec<(String, Value)>) {
        for (_, value) in pairs {
            value.drop_with_heap(&mut self.heap);
        }
    }

    pub(super) fn drop_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            value.drop_with_heap(&mut self.heap);
        }
    }

    fn eval_bool_op(&mut self, op: BoolOp, left: &ExprLoc, right: &ExprLoc) -> Exec<Value> {
        let l = self.eval_expr(left)?;
        let Some(lb) = l.as_bool() else {
            let type_name = l.type_name(&self.heap).to_owned();
            l.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error(format!(
                "`{}` requires bool operands, got {type_name}",
                op.symbol()
            ))
            .with_range(left.range)
            .into());
        };
        // short-circuit: the right side only runs when the left side does
        // not already decide the result
        match (op, lb) {
            (BoolOp::And, false) => Ok(Value::Bool(false)),
            (BoolOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let r = self.eval_expr(right)?;
                let Some(rb) = r.as_bool() else {
                    let type_name = r.type_name(&self.heap).to_owned();
                    r.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error(format!(
                        "`{}` requires bool operands, got {type_name}",
                        op.symbol()
                    ))
                    .with_range(right.range)
                    .into());
                };
                Ok(Value::Bool(rb))
            }
        }
    }

    /// The await protocol (see the module docs in `vm`):
    /// 1. a pending injected result means this is the resumption of a
    ///    suspended await: produce it (or raise it) without re-evaluating
    ///    the operand;
    /// 2. a `Done` target yields its result (or raises its exception)
    ///    immediately;
    /// 3. a `New` target is scheduled; either way the current coroutine
    ///    registers as a waiter and suspends.
    fn eval_await(&mut self, target: &ExprLoc, range: CodeRange) -> Exec<Value> {
        if let Some(injected) = self.injected.take() {
            return match injected {
                Ok(value) => Ok(value),
                Err(mut raised) => {
                    raised.error = raised.error.with_range(range);
                    Err(Signal::Raise(raised))
                }
            };
        }

        let value = self.eval_expr(target)?;
        let id = match value.ref_id() {
            Some(id) if matches!(self.heap.get(id), HeapData::Coroutine(_)) => id,
            _ => {
                let type_name = value.type_name(&self.heap).to_owned();
                value.drop_with_heap(&mut self.heap);
                return Err(
                    RunError::new(ExcType::AwaitError, format!("can only await a coroutine, got {type_name}"))
                        .with_range(range)
                        .into(),
                );
            }
        };
        if Some(id) == self.current_task() {
            value.drop_with_heap(&mut self.heap);
            return Err(RunError::new(ExcType::AwaitError, "a coroutine cannot await itself")
                .with_range(range)
                .into());
        }

        let done_outcome = {
            let c = self.coro(id);
            if c.is_done() {
                Some(match (&c.result, &c.exception) {
                    (Some(result), _) => Ok(result.shallow()),
                    (None, Some(raised)) => Err(raised.clone_with_heap(&self.heap)),
                    (None, None) => Ok(Value::Null),
                })
            } else {
                None
            }
        };
        if let Some(outcome) = done_outcome {
            // copy before releasing the operand reference: dropping the
            // coroutine could free the result the shallow alias points at
            let owned = match outcome {
                Ok(shallow) => Ok(shallow.copy_for_read(&mut self.heap)),
                Err(raised) => Err(raised),
            };
            value.drop_with_heap(&mut self.heap);
            return match owned {
                Ok(result) => Ok(result),
                Err(mut raised) => {
                    raised.error = raised.error.with_range(range);
                    Err(Signal::Raise(raised))
                }
            };
        }

        let schedule = {
            let c = self.coro_mut(id);
            if c.state == CoroutineState::New {
                c.state = CoroutineState::Runnable;
                true
            } else {
                false
            }
        };
        if schedule {
            self.heap.inc_ref(id);
            self.sched.push_ready(id);
        }

        let current = self.current_task().expect("await outside of a coroutine");
        self.heap.inc_ref(current);
        self.coro_mut(id).waiters.push(current);
        {
            let c = self.coro_mut(current);
            debug_assert!(c.awaiting_on.is_none(), "coroutine awaiting two targets");
            // the operand's owned reference moves into awaiting_on
            c.awaiting_on = Some(id);
            c.state = CoroutineState::SuspendedAwait;
        }
        let _moved_into_awaiting_on = value;
        Err(Signal::Suspend)
    }
}
