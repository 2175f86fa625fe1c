//! Output builtins: print, println in the core table, input in the `io`
//! stdlib group.
//!
//! `print` and `println` return a PrintEffect marker; the evaluator emits
//! it exactly once, at the point the call is evaluated.

use std::io::BufRead;

use super::{BuiltinFunc, Registry, TypeSpec};
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::value::{PrintEffect, Value};

fn print(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::PrintEffect(Box::new(PrintEffect {
        value: args[0].clone(),
        end: String::new(),
        printed: false,
    })))
}

fn println(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::PrintEffect(Box::new(PrintEffect {
        value: args[0].clone(),
        end: "\n".to_string(),
        printed: false,
    })))
}

/// Synchronously read one line from standard input.
fn input(_interp: &mut Interpreter, _args: &[Value]) -> Result<Value, NumFuError> {
    let mut line = String::new();
    let stdin = std::io::stdin();
    let _ = stdin.lock().read_line(&mut line);
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::Str(line))
}

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("print").add(vec![TypeSpec::Any], print));
    reg.core(BuiltinFunc::new("println").add(vec![TypeSpec::Any], println));
    reg.group("io", BuiltinFunc::new("input").add(vec![], input));
}
