//! String builtins: the `String` conversion and `format`
//!
//! Both receive the ambient precision through the interpreter so numbers
//! render exactly as they would at top level.

use super::{as_str, BuiltinFunc, Registry, TypeSpec};
use crate::error::{ErrorKind, NumFuError};
use crate::interpreter::Interpreter;
use crate::value::Value;

fn to_string(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let rendered = interp.render_value(&args[0], false)?;
    Ok(Value::Str(rendered))
}

/// Substitute `{}` placeholders left to right. A missing argument is an
/// IndexError, matching the documented message; surplus arguments are
/// ignored.
fn format(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let template = as_str(&args[0])?;
    let mut out = String::new();
    let mut supplied = args[1..].iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'}') {
            chars.next();
            match supplied.next() {
                Some(v) => out.push_str(as_str(v)?),
                None => {
                    return Err(NumFuError::new(
                        ErrorKind::Index,
                        "Incorrect number of placeholders",
                    ))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::Str(out))
}

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("String").add(vec![TypeSpec::Any], to_string));
    reg.core(
        BuiltinFunc::new("format").add(
            vec![TypeSpec::Str, TypeSpec::infinite_of(TypeSpec::Str)],
            format,
        ),
    );
}
