// ABOUTME: Re-renders closure source from stored parse fragments

use std::collections::HashSet;

use crate::ast::{is_operator, Expr};
use crate::interpreter::Interpreter;
use crate::value::{Closure, Fragment, Value};

/// Produce source text for a closure that would reparse to an equivalent
/// closure: captured bindings are substituted into the stored fragment.
/// Returns None when the fragment is absent or corrupt.
pub fn reconstruct(closure: &Closure, interp: &mut Interpreter) -> Option<String> {
    let fragment: Fragment = serde_json::from_slice(&closure.fragment).ok()?;
    let shadow: HashSet<String> = fragment
        .params
        .iter()
        .map(|p| p.trim_start_matches("...").to_string())
        .collect();
    let body = render(&fragment.body, closure, interp, &shadow)?;
    Some(format!("{{{} -> {}}}", fragment.params.join(", "), body))
}

fn render(
    e: &Expr,
    closure: &Closure,
    interp: &mut Interpreter,
    shadow: &HashSet<String>,
) -> Option<String> {
    match e {
        Expr::Number { text, .. } => Some(text.clone()),
        Expr::Str { value, .. } => Some(quote(value)),
        Expr::Bool { value, .. } => Some(if *value { "true" } else { "false" }.to_string()),
        Expr::Variable { name, .. } => {
            if shadow.contains(name) {
                return Some(name.clone());
            }
            match closure.curry.get(name) {
                Some(value) => substitute(&value, name, interp),
                None => Some(name.clone()),
            }
        }
        Expr::Lambda { params, body, .. } => {
            let mut inner = shadow.clone();
            for p in params {
                inner.insert(p.trim_start_matches("...").to_string());
            }
            let body = render(body, closure, interp, &inner)?;
            Some(format!("{{{} -> {}}}", params.join(", "), body))
        }
        Expr::Call { func, args, .. } => {
            if let Expr::Variable { name, .. } = func.as_ref() {
                if is_operator(name) && args.len() == 2 {
                    let left = operand(&args[0], closure, interp, shadow)?;
                    let right = operand(&args[1], closure, interp, shadow)?;
                    return Some(format!("{left} {name} {right}"));
                }
                if is_operator(name) && args.len() == 1 {
                    let value = operand(&args[0], closure, interp, shadow)?;
                    return Some(format!("{name}{value}"));
                }
            }
            let head = render(func, closure, interp, shadow)?;
            let rendered: Option<Vec<String>> = args
                .iter()
                .map(|a| render(a, closure, interp, shadow))
                .collect();
            Some(format!("{head}({})", rendered?.join(", ")))
        }
        Expr::Index { target, index, .. } => {
            let t = operand(target, closure, interp, shadow)?;
            let i = render(index, closure, interp, shadow)?;
            Some(format!("{t}[{i}]"))
        }
        Expr::Conditional {
            test,
            then_body,
            else_body,
            ..
        } => {
            let t = render(test, closure, interp, shadow)?;
            let a = render(then_body, closure, interp, shadow)?;
            let b = render(else_body, closure, interp, shadow)?;
            Some(format!("if {t} then {a} else {b}"))
        }
        Expr::List { elements, .. } => {
            let rendered: Option<Vec<String>> = elements
                .iter()
                .map(|e| render(e, closure, interp, shadow))
                .collect();
            Some(format!("[{}]", rendered?.join(", ")))
        }
        Expr::Spread { expr, .. } => {
            let inner = render(expr, closure, interp, shadow)?;
            Some(format!("...{inner}"))
        }
        _ => None,
    }
}

/// Operands of binary operators keep their grouping explicit.
fn operand(
    e: &Expr,
    closure: &Closure,
    interp: &mut Interpreter,
    shadow: &HashSet<String>,
) -> Option<String> {
    let rendered = render(e, closure, interp, shadow)?;
    let needs_parens = matches!(
        e,
        Expr::Call { func, args, .. }
            if args.len() == 2
                && matches!(func.as_ref(), Expr::Variable { name, .. } if is_operator(name))
    );
    Some(if needs_parens {
        format!("({rendered})")
    } else {
        rendered
    })
}

/// Render a captured value in place of its name.
fn substitute(value: &Value, name: &str, interp: &mut Interpreter) -> Option<String> {
    Some(match value {
        Value::Number(n) => n.to_string_prec(interp.precision),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Str(s) => quote(s),
        Value::Closure(c) => {
            let c = c.clone();
            reconstruct(&c, interp).unwrap_or_else(|| name.to_string())
        }
        Value::Builtin(b) => b.func.name.clone(),
        Value::List(_) => interp.render_value(value, true).ok()?,
        Value::PrintEffect(p) => substitute(&p.value, name, interp)?,
        Value::Placeholder => "_".to_string(),
    })
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn test_reconstruct_roundtrips_through_parser() {
        let mut interp = Interpreter::with_capture(15, 1000, None);
        let rendered = interp
            .run_source("{x, y -> if x < y then x else y}", "t.nfu", false)
            .expect("run");
        let reparsed = crate::parser::parse(&rendered[0]).expect("reparse");
        assert_eq!(reparsed.len(), 1);
    }

    #[test]
    fn test_corrupt_fragment_degrades() {
        let mut interp = Interpreter::with_capture(15, 1000, None);
        let closure = Closure {
            params: vec![],
            body: Expr::Bool {
                value: true,
                pos: crate::ast::Pos::default(),
            },
            curry: crate::env::Env::new(),
            module: String::new(),
            fragment: vec![1, 2, 3],
        };
        assert!(reconstruct(&closure, &mut interp).is_none());
    }
}
