//! Comparison operators: ==, !=, <, >, <=, >=
//!
//! Equality is structural and deep; it evaluates list elements, which is
//! why `==` and `!=` are registered with `eval_lists`. Ordering is
//! defined for numbers only and follows NaN semantics (every ordered
//! comparison against nan is false).

use std::cmp::Ordering;

use super::{as_num, value_eq, BuiltinFunc, Registry, TypeSpec};
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::value::Value;

fn eq(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(value_eq(interp, &args[0], &args[1])?))
}

fn ne(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(!value_eq(interp, &args[0], &args[1])?))
}

fn cmp(args: &[Value], accept: &[Ordering]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    let holds = match a.cmp_num(b) {
        Some(ord) => accept.contains(&ord),
        None => false,
    };
    Ok(Value::Bool(holds))
}

fn lt(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    cmp(args, &[Ordering::Less])
}

fn gt(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    cmp(args, &[Ordering::Greater])
}

fn le(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    cmp(args, &[Ordering::Less, Ordering::Equal])
}

fn ge(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    cmp(args, &[Ordering::Greater, Ordering::Equal])
}

pub fn register(reg: &mut Registry) {
    reg.core(
        BuiltinFunc::new("==")
            .eval_lists()
            .add(vec![TypeSpec::Any, TypeSpec::Any], eq),
    );
    reg.core(
        BuiltinFunc::new("!=")
            .eval_lists()
            .add(vec![TypeSpec::Any, TypeSpec::Any], ne),
    );
    reg.core(BuiltinFunc::new("<").add(vec![TypeSpec::Number, TypeSpec::Number], lt));
    reg.core(BuiltinFunc::new(">").add(vec![TypeSpec::Number, TypeSpec::Number], gt));
    reg.core(BuiltinFunc::new("<=").add(vec![TypeSpec::Number, TypeSpec::Number], le));
    reg.core(BuiltinFunc::new(">=").add(vec![TypeSpec::Number, TypeSpec::Number], ge));
}
