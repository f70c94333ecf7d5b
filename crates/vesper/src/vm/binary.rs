//! Binary, unary, and comparison operator semantics.
//!
//! Numeric promotion: int op int stays int for `+ - *` (checked, raising on
//! overflow), any float operand promotes, `/` always yields float, `%` is
//! int-only, `^` always yields float. Strings concatenate with stringified
//! partners and repeat with int counts. `+` on an instance consults the
//! blueprint chain for an `op_add` method before anything else.

use smallvec::smallvec;

use crate::{
    exception::{ExcType, RunError},
    expressions::{BinaryOp, CmpOp, UnaryOp},
    heap::HeapData,
    io::PrintWriter,
    scope,
    token::CodeRange,
    tracer::Tracer,
    value::{Value, values_equal},
    vm::{Exec, Vm, string_content},
};

impl<P: PrintWriter, Tr: Tracer> Vm<'_, P, Tr> {
    pub(super) fn unary_op(&mut self, op: UnaryOp, value: Value, range: CodeRange) -> Exec<Value> {
        match op {
            UnaryOp::Neg => match value {
                Value::Int(v) => match v.checked_neg() {
                    Some(negated) => Ok(Value::Int(negated)),
                    None => Err(RunError::new(ExcType::OverflowError, "integer overflow in negation")
                        .with_range(range)
                        .into()),
                },
                Value::Float(v) => Ok(Value::Float(-v)),
                other => {
                    let type_name = other.type_name(&self.heap).to_owned();
                    other.drop_with_heap(&mut self.heap);
                    Err(RunError::type_error(format!("unary `-` requires a number, got {type_name}"))
                        .with_range(range)
                        .into())
                }
            },
            UnaryOp::Not => match value.as_bool() {
                Some(b) => Ok(Value::Bool(!b)),
                None => {
                    let type_name = value.type_name(&self.heap).to_owned();
                    value.drop_with_heap(&mut self.heap);
                    Err(RunError::type_error(format!("`not` requires a bool, got {type_name}"))
                        .with_range(range)
                        .into())
                }
            },
        }
    }

    pub(super) fn binary_op(&mut self, op: BinaryOp, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        match op {
            BinaryOp::Add => self.op_add(left, right, range),
            BinaryOp::Sub => self.int_preserving(op, left, right, range, i64::checked_sub, |a, b| a - b),
            BinaryOp::Mul => self.op_mul(left, right, range),
            BinaryOp::Div => self.op_div(left, right, range),
            BinaryOp::Mod => self.op_mod(left, right, range),
            BinaryOp::Pow => match (arith_number(&left), arith_number(&right)) {
                (Some(base), Some(exponent)) => Ok(Value::Float(base.powf(exponent))),
                _ => self.binary_type_error(op, left, right, range),
            },
        }
    }

    fn op_add(&mut self, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        // operator overloading: instance + anything dispatches to op_add
        if let Some(id) = left.ref_id()
            && let HeapData::Instance(instance) = self.heap.get(id)
        {
            let blueprint = instance.blueprint;
            if let Some((defining, holder)) = self.blueprints.find_attr(&self.heap, blueprint, "op_add") {
                let shallow = scope::scope(&self.heap, holder)
                    .get("op_add")
                    .expect("find_attr reported a missing binding")
                    .shallow();
                if let Some(closure_id) = shallow.ref_id()
                    && let HeapData::Closure(closure) = self.heap.get(closure_id)
                {
                    let (func, closure_scope) = (closure.func, closure.scope);
                    return self.call_function(func, closure_scope, Some(left), Some(defining), smallvec![right], range);
                }
            }
        }
        if self.is_str(&left) || self.is_str(&right) {
            let text = format!(
                "{}{}",
                self.repr_ctx().display(&left),
                self.repr_ctx().display(&right)
            );
            left.drop_with_heap(&mut self.heap);
            right.drop_with_heap(&mut self.heap);
            return Ok(Value::str(&mut self.heap, text));
        }
        self.int_preserving(BinaryOp::Add, left, right, range, i64::checked_add, |a, b| a + b)
    }

    fn op_mul(&mut self, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        let repeat = match (self.is_str(&left), &right, &left, self.is_str(&right)) {
            (true, Value::Int(count), _, _) => Some((left.shallow(), *count)),
            (_, _, Value::Int(count), true) => Some((right.shallow(), *count)),
            _ => None,
        };
        if let Some((text_value, count)) = repeat {
            let text = string_content(&text_value, &self.heap).expect("checked to be a string");
            left.drop_with_heap(&mut self.heap);
            right.drop_with_heap(&mut self.heap);
            if count < 0 {
                return Err(RunError::new(ExcType::ValueError, "repeat count must not be negative")
                    .with_range(range)
                    .into());
            }
            return Ok(Value::str(&mut self.heap, text.repeat(count as usize)));
        }
        self.int_preserving(BinaryOp::Mul, left, right, range, i64::checked_mul, |a, b| a * b)
    }

    fn op_div(&mut self, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        match (arith_number(&left), arith_number(&right)) {
            (Some(l), Some(r)) => {
                if r == 0.0 {
                    Err(RunError::new(ExcType::ZeroDivisionError, "division by zero")
                        .with_range(range)
                        .into())
                } else {
                    // division always yields a float
                    Ok(Value::Float(l / r))
                }
            }
            _ => self.binary_type_error(BinaryOp::Div, left, right, range),
        }
    }

    fn op_mod(&mut self, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => {
                if *r == 0 {
                    Err(RunError::new(ExcType::ZeroDivisionError, "modulo by zero")
                        .with_range(range)
                        .into())
                } else {
                    Ok(Value::Int(l.checked_rem(*r).unwrap_or(0)))
                }
            }
            _ => {
                let (t1, t2) = (
                    left.type_name(&self.heap).to_owned(),
                    right.type_name(&self.heap).to_owned(),
                );
                left.drop_with_heap(&mut self.heap);
                right.drop_with_heap(&mut self.heap);
                Err(RunError::type_error(format!("`%` requires two ints, got {t1} and {t2}"))
                    .with_range(range)
                    .into())
            }
        }
    }

    /// `+ - *`: int when both operands are ints (checked), float as soon as
    /// either side is a float.
    fn int_preserving(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        range: CodeRange,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Exec<Value> {
        match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => match int_op(*l, *r) {
                Some(result) => Ok(Value::Int(result)),
                None => Err(RunError::new(
                    ExcType::OverflowError,
                    format!("integer overflow in `{}`", op.symbol()),
                )
                .with_range(range)
                .into()),
            },
            _ => match (arith_number(&left), arith_number(&right)) {
                (Some(l), Some(r)) => Ok(Value::Float(float_op(l, r))),
                _ => self.binary_type_error(op, left, right, range),
            },
        }
    }

    fn binary_type_error(&mut self, op: BinaryOp, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        let (t1, t2) = (
            left.type_name(&self.heap).to_owned(),
            right.type_name(&self.heap).to_owned(),
        );
        left.drop_with_heap(&mut self.heap);
        right.drop_with_heap(&mut self.heap);
        Err(RunError::type_error(format!(
            "unsupported operand types for `{}`: {t1} and {t2}",
            op.symbol()
        ))
        .with_range(range)
        .into())
    }

    pub(super) fn compare_op(&mut self, op: CmpOp, left: Value, right: Value, range: CodeRange) -> Exec<Value> {
        match op {
            CmpOp::Eq | CmpOp::NotEq => {
                let equal = values_equal(&left, &right, &self.heap);
                left.drop_with_heap(&mut self.heap);
                right.drop_with_heap(&mut self.heap);
                Ok(Value::Bool(equal == (op == CmpOp::Eq)))
            }
            CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge => {
                // ordering is defined for numbers and booleans only,
                // coercing through f64 with booleans as 0/1
                match (left.as_number(), right.as_number()) {
                    (Some(l), Some(r)) => {
                        let result = match op {
                            CmpOp::Lt => l < r,
                            CmpOp::Gt => l > r,
                            CmpOp::Le => l <= r,
                            CmpOp::Ge => l >= r,
                            CmpOp::Eq | CmpOp::NotEq => unreachable!("handled above"),
                        };
                        Ok(Value::Bool(result))
                    }
                    _ => {
                        let (t1, t2) = (
                            left.type_name(&self.heap).to_owned(),
                            right.type_name(&self.heap).to_owned(),
                        );
                        left.drop_with_heap(&mut self.heap);
                        right.drop_with_heap(&mut self.heap);
                        Err(RunError::type_error(format!("cannot order {t1} and {t2}"))
                            .with_range(range)
                            .into())
                    }
                }
            }
        }
    }

    fn is_str(&self, value: &Value) -> bool {
        value
            .ref_id()
            .is_some_and(|id| matches!(self.heap.get(id), HeapData::Str(_)))
    }
}

/// Numeric view for arithmetic: ints and floats only (booleans do not
/// participate in arithmetic, unlike in comparisons).
fn arith_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}
