//! System builtins: error and assert in the core table; exit and time in
//! the `sys` group; random and seed in the `random` group.

use super::{as_num, as_str, BuiltinFunc, Registry, TypeSpec};
use crate::error::{ErrorKind, NumFuError};
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::value::Value;

/// `error(msg[, name])` raises a user error, optionally renamed.
fn user_error(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let message = as_str(&args[0])?.to_string();
    let name = match args.get(1) {
        Some(v) => Some(as_str(v)?.to_string()),
        None => None,
    };
    Err(NumFuError::new(ErrorKind::Runtime, message).with_name(name))
}

/// `assert(cond[, value])`: on success returns `value` (or true), on
/// failure raises AssertionError.
fn assert_cond(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    if !args[0].truthy() {
        return Err(NumFuError::new(ErrorKind::Assertion, ""));
    }
    Ok(match args.get(1) {
        Some(v) => v.clone(),
        None => Value::Bool(true),
    })
}

fn exit(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let code = match args.first() {
        Some(v) => as_num(v)?.to_i64().unwrap_or(0),
        None => 0,
    };
    Err(NumFuError::new(ErrorKind::Exit, code.to_string()))
}

fn time(_interp: &mut Interpreter, _args: &[Value]) -> Result<Value, NumFuError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let text = format!("{}.{:06}", now.as_secs(), now.subsec_micros());
    Ok(Value::Number(
        Number::parse(&text).unwrap_or_else(Number::zero),
    ))
}

fn random(interp: &mut Interpreter, _args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(interp.next_random()))
}

fn seed(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    match &args[0] {
        Value::Str(s) => interp.seed_from_text(s),
        v => {
            let n = as_num(v)?;
            interp.seed_from_text(&n.to_string_prec(interp.precision));
        }
    }
    Ok(Value::Bool(true))
}

pub fn register(reg: &mut Registry) {
    reg.core(
        BuiltinFunc::new("error")
            .add(vec![TypeSpec::Str], user_error)
            .add(vec![TypeSpec::Str, TypeSpec::Str], user_error),
    );
    reg.core(
        BuiltinFunc::new("assert")
            .eval_lists()
            .add(vec![TypeSpec::Bool], assert_cond)
            .add(vec![TypeSpec::Bool, TypeSpec::Any], assert_cond),
    );
    reg.group(
        "sys",
        BuiltinFunc::new("exit")
            .add(vec![], exit)
            .add(vec![TypeSpec::Number], exit),
    );
    reg.group("sys", BuiltinFunc::new("time").add(vec![], time));
    reg.group("random", BuiltinFunc::new("random").add(vec![], random));
    reg.group(
        "random",
        BuiltinFunc::new("seed").add(
            vec![TypeSpec::union(vec![TypeSpec::Number, TypeSpec::Str])],
            seed,
        ),
    );
}
