//! List and sequence builtins: length, append, member, set, reverse,
//! sort, slice, join, split, map, filter, range, sum
//!
//! Lists stay lazy wherever possible: `map` wraps elements in calls to be
//! evaluated on demand, `filter` and `set` rebuild lists that keep the
//! original capture environment.

use super::{as_list, as_num, as_str, validators, value_eq, BuiltinFunc, Registry, TypeSpec};
use crate::ast::{Expr, Pos};
use crate::error::{ErrorKind, NumFuError};
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::value::{ListValue, Value};

fn length(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let len = match &args[0] {
        Value::List(l) => l.len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(NumFuError::new(
                ErrorKind::Type,
                format!("expected List or String, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Number(Number::from_i64(len as i64)))
}

fn append(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let l = as_list(&args[0])?;
    let (expr, curry) = interp.lift(args[1].clone(), &l.curry);
    let mut elements: Vec<Expr> = l.elements.iter().cloned().collect();
    elements.push(expr);
    Ok(Value::List(ListValue::new(elements, curry, l.module.clone())))
}

fn member_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let needle = &args[0];
    let values = interp.list_values(as_list(&args[1])?)?;
    for v in &values {
        if value_eq(interp, needle, v)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn member_str(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (needle, hay) = (as_str(&args[0])?, as_str(&args[1])?);
    Ok(Value::Bool(hay.contains(needle)))
}

/// Resolve a possibly-negative index against `len`, or report the
/// out-of-range condition.
fn resolve_index(i: i64, len: usize, what: &str) -> Result<usize, NumFuError> {
    let len = len as i64;
    let idx = if i < 0 { len + i } else { i };
    if idx < 0 || idx >= len {
        return Err(NumFuError::new(
            ErrorKind::Index,
            format!("{what} index out of range"),
        ));
    }
    Ok(idx as usize)
}

fn set_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let l = as_list(&args[0])?;
    let i = as_num(&args[1])?.to_i64().unwrap_or(i64::MAX);
    let idx = resolve_index(i, l.len(), "List")?;
    let (expr, curry) = interp.lift(args[2].clone(), &l.curry);
    let mut elements: Vec<Expr> = l.elements.iter().cloned().collect();
    elements[idx] = expr;
    Ok(Value::List(ListValue::new(elements, curry, l.module.clone())))
}

fn set_string(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let s = as_str(&args[0])?;
    let i = as_num(&args[1])?.to_i64().unwrap_or(i64::MAX);
    let replacement = as_str(&args[2])?;
    let chars: Vec<char> = s.chars().collect();
    let idx = resolve_index(i, chars.len(), "String")?;
    let mut out: String = chars[..idx].iter().collect();
    out.push_str(replacement);
    out.extend(&chars[idx + 1..]);
    Ok(Value::Str(out))
}

fn reverse(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(match &args[0] {
        Value::Str(s) => Value::Str(s.chars().rev().collect()),
        Value::List(l) => {
            let elements: Vec<Expr> = l.elements.iter().rev().cloned().collect();
            Value::List(ListValue::new(elements, l.curry.clone(), l.module.clone()))
        }
        other => {
            return Err(NumFuError::new(
                ErrorKind::Type,
                format!("expected List or String, got {}", other.type_name()),
            ))
        }
    })
}

fn sort(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    if let Value::Str(s) = &args[0] {
        let mut chars: Vec<char> = s.chars().collect();
        chars.sort_unstable();
        return Ok(Value::Str(chars.into_iter().collect()));
    }
    let l = as_list(&args[0])?;
    let mut values = interp.list_values(l)?;
    let all_numbers = values.iter().all(|v| matches!(v, Value::Number(_)));
    let all_strings = values.iter().all(|v| matches!(v, Value::Str(_)));
    if !all_numbers && !all_strings {
        return Err(NumFuError::new(
            ErrorKind::Type,
            "Cannot sort a list with mixed element types",
        ));
    }
    if all_numbers {
        values.sort_by(|a, b| match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                x.cmp_num(y).unwrap_or(std::cmp::Ordering::Equal)
            }
            _ => std::cmp::Ordering::Equal,
        });
    } else {
        values.sort_by(|a, b| match (a, b) {
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        });
    }
    let mut curry = l.curry.clone();
    let mut elements = Vec::with_capacity(values.len());
    for v in values {
        let (expr, next) = interp.lift(v, &curry);
        curry = next;
        elements.push(expr);
    }
    Ok(Value::List(ListValue::new(elements, curry, l.module.clone())))
}

fn slice(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let start = as_num(&args[1])?.to_i64().unwrap_or(0);
    let stop = as_num(&args[2])?.to_i64().unwrap_or(-1);
    let clamp = |i: i64, len: usize| -> usize {
        let len = len as i64;
        let idx = if i < 0 { len + i } else { i };
        idx.clamp(0, len) as usize
    };
    Ok(match &args[0] {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = clamp(start, chars.len());
            let to = if stop == -1 {
                chars.len()
            } else {
                clamp(stop + 1, chars.len())
            };
            Value::Str(chars[from..to.max(from)].iter().collect())
        }
        Value::List(l) => {
            let from = clamp(start, l.len());
            let to = if stop == -1 {
                l.len()
            } else {
                clamp(stop + 1, l.len())
            };
            let elements: Vec<Expr> = l.elements[from..to.max(from)].to_vec();
            Value::List(ListValue::new(elements, l.curry.clone(), l.module.clone()))
        }
        other => {
            return Err(NumFuError::new(
                ErrorKind::Type,
                format!("expected List or String, got {}", other.type_name()),
            ))
        }
    })
}

fn join(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let values = interp.list_values(as_list(&args[0])?)?;
    let sep = as_str(&args[1])?;
    let mut parts = Vec::with_capacity(values.len());
    for v in &values {
        parts.push(as_str(v)?.to_string());
    }
    Ok(Value::Str(parts.join(sep)))
}

fn split(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (s, sep) = (as_str(&args[0])?, as_str(&args[1])?);
    let pieces: Vec<String> = if sep.is_empty() {
        s.chars().map(|c| c.to_string()).collect()
    } else {
        s.split(sep).map(|p| p.to_string()).collect()
    };
    let elements: Vec<Expr> = pieces
        .into_iter()
        .map(|p| Expr::Str {
            value: p,
            pos: Pos::default(),
        })
        .collect();
    Ok(Value::List(ListValue::new(
        elements,
        crate::env::Env::new(),
        interp.ctx_module().to_string(),
    )))
}

/// `map` stays lazy: every element becomes a pending call of the mapped
/// function, evaluated in the list's capture environment on demand.
fn map(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let l = as_list(&args[0])?;
    let (func_expr, curry) = interp.lift(args[1].clone(), &l.curry);
    let elements: Vec<Expr> = l
        .elements
        .iter()
        .map(|e| Expr::Call {
            func: Box::new(func_expr.clone()),
            args: vec![e.clone()],
            pos: e.pos(),
        })
        .collect();
    Ok(Value::List(ListValue::new(elements, curry, l.module.clone())))
}

/// `filter` evaluates eagerly: the predicate runs against each element in
/// the list's capture environment, keeping the surviving element
/// expressions in their original positions.
fn filter(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let l = as_list(&args[0])?.clone();
    let func = args[1].clone();
    let mut elements = Vec::new();
    for e in l.elements.iter() {
        let value = interp.eval_in_env(e, &l.curry, &l.module)?;
        let keep = interp.call_function(&func, vec![value], &l.curry)?;
        if keep.truthy() {
            elements.push(e.clone());
        }
    }
    Ok(Value::List(ListValue::new(elements, l.curry.clone(), l.module.clone())))
}

fn range(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let from = as_num(&args[0])?.to_i64().unwrap_or(0);
    let to = as_num(&args[1])?.to_i64().unwrap_or(0);
    let elements: Vec<Expr> = (from..to)
        .map(|i| Expr::Number {
            text: i.to_string(),
            pos: Pos::default(),
        })
        .collect();
    Ok(Value::List(ListValue::new(
        elements,
        crate::env::Env::new(),
        interp.ctx_module().to_string(),
    )))
}

fn sum_values(interp: &mut Interpreter, values: &[Value]) -> Result<Value, NumFuError> {
    let mut total = Number::zero();
    for v in values {
        total = total.add(as_num(v)?, interp.precision);
    }
    Ok(Value::Number(total))
}

fn sum_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let values = interp.list_values(as_list(&args[0])?)?;
    sum_values(interp, &values)
}

fn sum_variadic(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    sum_values(interp, args)
}

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("length").add(
        vec![TypeSpec::union(vec![TypeSpec::List, TypeSpec::Str])],
        length,
    ));
    reg.core(BuiltinFunc::new("append").add(vec![TypeSpec::List, TypeSpec::Any], append));
    reg.core(
        BuiltinFunc::new("member")
            .add(vec![TypeSpec::Str, TypeSpec::Str], member_str)
            .add(vec![TypeSpec::Any, TypeSpec::List], member_list),
    );
    reg.core(
        BuiltinFunc::new("set")
            .add_checked(
                vec![TypeSpec::List, TypeSpec::Number, TypeSpec::Any],
                vec![None, Some(validators::LIST_INDEX), None],
                set_list,
            )
            .add_checked(
                vec![TypeSpec::Str, TypeSpec::Number, TypeSpec::Str],
                vec![None, Some(validators::STRING_INDEX), None],
                set_string,
            ),
    );
    reg.core(BuiltinFunc::new("reverse").add(
        vec![TypeSpec::union(vec![TypeSpec::List, TypeSpec::Str])],
        reverse,
    ));
    reg.core(
        BuiltinFunc::new("sort")
            .eval_lists()
            .add(
                vec![TypeSpec::list_of(TypeSpec::union(vec![
                    TypeSpec::Number,
                    TypeSpec::Str,
                ]))],
                sort,
            )
            .add(vec![TypeSpec::Str], sort),
    );
    reg.core(
        BuiltinFunc::new("slice").add_checked(
            vec![
                TypeSpec::union(vec![TypeSpec::List, TypeSpec::Str]),
                TypeSpec::Number,
                TypeSpec::Number,
            ],
            vec![
                None,
                Some(validators::STRING_INDEX),
                Some(validators::STRING_INDEX),
            ],
            slice,
        ),
    );
    reg.core(
        BuiltinFunc::new("join")
            .eval_lists()
            .add(vec![TypeSpec::list_of(TypeSpec::Str), TypeSpec::Str], join),
    );
    reg.core(BuiltinFunc::new("split").add(vec![TypeSpec::Str, TypeSpec::Str], split));
    reg.core(BuiltinFunc::new("map").add(vec![TypeSpec::List, TypeSpec::Function], map));
    reg.core(BuiltinFunc::new("filter").add(vec![TypeSpec::List, TypeSpec::Function], filter));
    reg.core(
        BuiltinFunc::new("range").add_checked(
            vec![TypeSpec::Number, TypeSpec::Number],
            vec![
                Some(validators::RANGE_BOUND),
                Some(validators::RANGE_BOUND),
            ],
            range,
        ),
    );
    reg.core(
        BuiltinFunc::new("sum")
            .eval_lists()
            .add(vec![TypeSpec::list_of(TypeSpec::Number)], sum_list)
            .add(
                vec![TypeSpec::Number, TypeSpec::infinite_of(TypeSpec::Number)],
                sum_variadic,
            ),
    );
}
