//! Type conversions in the core table (Bool, Number, List) and the type
//! predicates of the `types` stdlib group.

use super::{as_str, validators, BuiltinFunc, Registry, TypeSpec};
use crate::ast::{Expr, Pos};
use crate::env::Env;
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::value::{ListValue, Value};

fn to_bool(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(args[0].truthy()))
}

/// `Number` accepts booleans, numbers, and numeric text. The validator
/// has already vetted the text, so a parse failure cannot reach here.
fn to_number(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(match &args[0] {
        Value::Bool(b) => Value::Number(Number::from_i64(if *b { 1 } else { 0 })),
        Value::Number(n) => Value::Number(n.round_to(u32::MAX)),
        v => {
            let text = as_str(v)?;
            Value::Number(Number::parse(text).unwrap_or_else(Number::nan))
        }
    })
}

/// `List` over a string splits into one-character strings; a list passes
/// through unchanged.
fn to_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(match &args[0] {
        Value::List(l) => Value::List(l.clone()),
        v => {
            let text = as_str(v)?;
            let elements: Vec<Expr> = text
                .chars()
                .map(|c| Expr::Str {
                    value: c.to_string(),
                    pos: Pos::default(),
                })
                .collect();
            Value::List(ListValue::new(
                elements,
                Env::new(),
                interp.ctx_module().to_string(),
            ))
        }
    })
}

fn type_of(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Str(args[0].type_name().to_string()))
}

macro_rules! predicate {
    ($fn_name:ident, $pattern:pat) => {
        fn $fn_name(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
            Ok(Value::Bool(matches!(&args[0], $pattern)))
        }
    };
}

predicate!(is_number, Value::Number(_));
predicate!(is_string, Value::Str(_));
predicate!(is_bool, Value::Bool(_));
predicate!(is_list, Value::List(_));
predicate!(is_function, Value::Closure(_) | Value::Builtin(_));

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("Bool").add(vec![TypeSpec::Any], to_bool));
    reg.core(
        BuiltinFunc::new("Number").add_checked(
            vec![TypeSpec::union(vec![
                TypeSpec::Bool,
                TypeSpec::Number,
                TypeSpec::Str,
            ])],
            vec![Some(validators::IS_NUMBER)],
            to_number,
        ),
    );
    reg.core(
        BuiltinFunc::new("List").add_checked(
            vec![TypeSpec::Any],
            vec![Some(validators::IS_ITERABLE)],
            to_list,
        ),
    );

    reg.group("types", BuiltinFunc::new("typeof").add(vec![TypeSpec::Any], type_of));
    reg.group(
        "types",
        BuiltinFunc::new("isNumber").add(vec![TypeSpec::Any], is_number),
    );
    reg.group(
        "types",
        BuiltinFunc::new("isString").add(vec![TypeSpec::Any], is_string),
    );
    reg.group(
        "types",
        BuiltinFunc::new("isBool").add(vec![TypeSpec::Any], is_bool),
    );
    reg.group(
        "types",
        BuiltinFunc::new("isList").add(vec![TypeSpec::Any], is_list),
    );
    reg.group(
        "types",
        BuiltinFunc::new("isFunction").add(vec![TypeSpec::Any], is_function),
    );
}
