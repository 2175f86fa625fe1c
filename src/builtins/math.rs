//! Numeric builtins: rounding and extrema in the core table, the
//! transcendental functions in the `math` stdlib group.
//!
//! Out-of-domain arguments (sqrt of a negative, log of a non-positive,
//! asin beyond [-1, 1]) produce nan rather than an error; the number
//! layer folds would-be complex results to nan.

use super::{as_list, as_num, BuiltinFunc, Registry, Transformer, TypeSpec};
use crate::error::NumFuError;
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::value::Value;

fn abs(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.abs()))
}

fn sign(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.signum()))
}

fn floor(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.floor()))
}

fn ceil(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.ceil()))
}

fn round(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    Ok(Value::Number(as_num(&args[0])?.round_places(0)))
}

fn round_digits(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let x = as_num(&args[0])?;
    let places = as_num(&args[1])?.to_i64().unwrap_or(0);
    Ok(Value::Number(x.round_places(places)))
}

fn fold_extremum(values: &[&Number], want_greater: bool) -> Number {
    let mut best = values[0].clone();
    for v in &values[1..] {
        if let Some(ord) = v.cmp_num(&best) {
            if (want_greater && ord == std::cmp::Ordering::Greater)
                || (!want_greater && ord == std::cmp::Ordering::Less)
            {
                best = (*v).clone();
            }
        }
    }
    best
}

fn extremum_of(args: &[Value], want_greater: bool) -> Result<Value, NumFuError> {
    let nums: Vec<&Number> = args
        .iter()
        .map(as_num)
        .collect::<Result<Vec<_>, NumFuError>>()?;
    Ok(Value::Number(fold_extremum(&nums, want_greater)))
}

fn max_variadic(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    extremum_of(args, true)
}

fn min_variadic(_interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    extremum_of(args, false)
}

fn extremum_of_list(
    interp: &mut Interpreter,
    args: &[Value],
    want_greater: bool,
) -> Result<Value, NumFuError> {
    let values = interp.list_values(as_list(&args[0])?)?;
    if values.is_empty() {
        return Err(NumFuError::new(
            crate::error::ErrorKind::Value,
            "Cannot take the extremum of an empty list",
        ));
    }
    extremum_of(&values, want_greater)
}

fn max_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    extremum_of_list(interp, args, true)
}

fn min_list(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    extremum_of_list(interp, args, false)
}

/// Force the lazy list so the implementation behind the `ListOf`
/// overload sees settled element values.
fn materialize_list(interp: &mut Interpreter, args: &[Value]) -> Result<Vec<Value>, NumFuError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        out.push(match arg {
            Value::List(l) => interp.materialize(l)?,
            other => other.clone(),
        });
    }
    Ok(out)
}

macro_rules! unary_math {
    ($fn_name:ident, $method:ident) => {
        fn $fn_name(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
            Ok(Value::Number(as_num(&args[0])?.$method(interp.precision)))
        }
    };
}

unary_math!(sqrt, sqrt);
unary_math!(exp, exp);
unary_math!(log10, log10);
unary_math!(sin, sin);
unary_math!(cos, cos);
unary_math!(tan, tan);
unary_math!(asin, asin);
unary_math!(acos, acos);
unary_math!(atan, atan);
unary_math!(sinh, sinh);
unary_math!(cosh, cosh);
unary_math!(tanh, tanh);
unary_math!(asinh, asinh);
unary_math!(acosh, acosh);
unary_math!(atanh, atanh);
unary_math!(ln, ln);

fn log_base(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (x, base) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(x.log_base(base, interp.precision)))
}

fn atan2(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NumFuError> {
    let (y, x) = (as_num(&args[0])?, as_num(&args[1])?);
    Ok(Value::Number(y.atan2(x, interp.precision)))
}

pub fn register(reg: &mut Registry) {
    reg.core(BuiltinFunc::new("abs").add(vec![TypeSpec::Number], abs));
    reg.core(BuiltinFunc::new("sign").add(vec![TypeSpec::Number], sign));
    reg.core(BuiltinFunc::new("floor").add(vec![TypeSpec::Number], floor));
    reg.core(BuiltinFunc::new("ceil").add(vec![TypeSpec::Number], ceil));
    reg.core(
        BuiltinFunc::new("round")
            .add(vec![TypeSpec::Number], round)
            .add_checked(
                vec![TypeSpec::Number, TypeSpec::Number],
                vec![None, Some(super::validators::ROUND_DIGITS)],
                round_digits,
            ),
    );
    reg.core(
        BuiltinFunc::new("max")
            .eval_lists()
            .add(
                vec![TypeSpec::Number, TypeSpec::infinite_of(TypeSpec::Number)],
                max_variadic,
            )
            .add_transformed(
                vec![TypeSpec::list_of(TypeSpec::Number)],
                materialize_list as Transformer,
                Some("Only numbers are supported"),
                max_list,
            ),
    );
    reg.core(
        BuiltinFunc::new("min")
            .eval_lists()
            .add(
                vec![TypeSpec::Number, TypeSpec::infinite_of(TypeSpec::Number)],
                min_variadic,
            )
            .add_transformed(
                vec![TypeSpec::list_of(TypeSpec::Number)],
                materialize_list as Transformer,
                Some("Only numbers are supported"),
                min_list,
            ),
    );

    for (name, imp) in [
        ("sqrt", sqrt as super::BuiltinImpl),
        ("exp", exp),
        ("log10", log10),
        ("sin", sin),
        ("cos", cos),
        ("tan", tan),
        ("asin", asin),
        ("acos", acos),
        ("atan", atan),
        ("sinh", sinh),
        ("cosh", cosh),
        ("tanh", tanh),
        ("asinh", asinh),
        ("acosh", acosh),
        ("atanh", atanh),
    ] {
        reg.group("math", BuiltinFunc::new(name).add(vec![TypeSpec::Number], imp));
    }
    reg.group(
        "math",
        BuiltinFunc::new("log")
            .add(vec![TypeSpec::Number], ln)
            .add(vec![TypeSpec::Number, TypeSpec::Number], log_base),
    );
    reg.group(
        "math",
        BuiltinFunc::new("atan2").add(vec![TypeSpec::Number, TypeSpec::Number], atan2),
    );
}
