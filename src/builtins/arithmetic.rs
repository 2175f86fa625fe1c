//! Arithmetic operators: +, -, *, /, %, ^
//!
//! `+` also concatenates strings and lists; `*` repeats strings and lists
//! by an integer factor (in either argument order).

use super::{as_list, as_num, as_str, validators, BuiltinFunc, Registry, TypeSpec};
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::value::{ListValue, Value};

fn add_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.add(b, interp.precision)))
}

fn add_strings(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_str(&args[0])?, as_str(&args[1])?);
    Ok(Value::Str(format!("{a}{b}")))
}

fn add_lists(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_list(&args[0])?, as_list(&args[1])?);
    let elements: Vec<_> = a
        .elements
        .iter()
        .chain(b.elements.iter())
        .cloned()
        .collect();
    Ok(Value::List(ListValue::new(
        elements,
        a.curry.merge(&b.curry),
        a.module.clone(),
    )))
}

fn negate(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.neg()))
}

fn sub_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.sub(b, interp.precision)))
}

fn mul_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.mul(b, interp.precision)))
}

fn mul_string(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let s = as_str(&args[0])?;
    let n = as_num(&args[1])?.to_i64().unwrap_or(0).max(0) as usize;
    Ok(Value::Str(s.repeat(n)))
}

fn mul_list(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let l = as_list(&args[0])?;
    let n = as_num(&args[1])?.to_i64().unwrap_or(0).max(0) as usize;
    let mut elements = Vec::with_capacity(l.len() * n);
    for _ in 0..n {
        elements.extend(l.elements.iter().cloned());
    }
    Ok(Value::List(ListValue::new(
        elements,
        l.curry.clone(),
        l.module.clone(),
    )))
}

fn div_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.div(b, interp.precision)))
}

fn rem_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.rem(b, interp.precision)))
}

fn pow_numbers(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (a, b) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(a.pow(b, interp.precision)))
}

pub fn register(reg: &mut Registry) {
    reg.core(
        BuiltinFunc::new("+")
            .add(vec![TypeSpec::Number, TypeSpec::Number], add_numbers)
            .add(vec![TypeSpec::Str, TypeSpec::Str], add_strings)
            .add(vec![TypeSpec::List, TypeSpec::List], add_lists),
    );
    reg.core(
        BuiltinFunc::new("-")
            .add(vec![TypeSpec::Number], negate)
            .add(vec![TypeSpec::Number, TypeSpec::Number], sub_numbers),
    );
    reg.core(
        BuiltinFunc::new("*")
            .add(vec![TypeSpec::Number, TypeSpec::Number], mul_numbers)
            .add_commutative(
                vec![TypeSpec::Str, TypeSpec::Number],
                vec![None, Some(validators::MUL_INTEGER)],
                mul_string,
            )
            .add_commutative(
                vec![TypeSpec::List, TypeSpec::Number],
                vec![None, Some(validators::MUL_INTEGER)],
                mul_list,
            )
            .error(
                vec![TypeSpec::Str, TypeSpec::Str],
                "Cannot multiply two strings",
            )
            .error(
                vec![TypeSpec::List, TypeSpec::List],
                "Cannot multiply two lists",
            ),
    );
    reg.core(BuiltinFunc::new("/").add(vec![TypeSpec::Number, TypeSpec::Number], div_numbers));
    reg.core(BuiltinFunc::new("%").add(vec![TypeSpec::Number, TypeSpec::Number], rem_numbers));
    reg.core(BuiltinFunc::new("^").add(vec![TypeSpec::Number, TypeSpec::Number], pow_numbers));
}
