//! Boolean operators: &&, ||, !, xor
//!
//! The evaluator short-circuits `&&` and `||` at call sites; the
//! overloads here are the strict forms reached through pipes, partial
//! application, and other first-class uses.

use super::{BuiltinFunc, Registry, TypeSpec};
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::value::Value;

fn and(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(args[0].truthy() && args[1].truthy()))
}

fn or(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(args[0].truthy() || args[1].truthy()))
}

fn not(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(!args[0].truthy()))
}

fn xor(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Bool(args[0].truthy() != args[1].truthy()))
}

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("&&").add(vec![TypeSpec::Any, TypeSpec::Any], and));
    reg.core(BuiltinFunc::new("||").add(vec![TypeSpec::Any, TypeSpec::Any], or));
    reg.core(BuiltinFunc::new("!").add(vec![TypeSpec::Any], not));
    reg.core(BuiltinFunc::new("xor").add(vec![TypeSpec::Any, TypeSpec::Any], xor));
}
