//! # Built-in Functions Module
//!
//! Overloaded built-in operations for the NumFu interpreter, organized by
//! category. Each category sub-module owns its implementations and a
//! `register` function that adds them to the [`Registry`].
//!
//! Overloads are plain data: an ordered list of parameter type specifiers,
//! optional per-position validators, an optional transformer, and the
//! target implementation. Dispatch walks the overloads in registration
//! order and picks the first structural match, so error messages and help
//! text can introspect the table.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{is_operator, Pos};
use crate::error::{ErrorKind, NumFuError};
use crate::interpreter::Interpreter;
use crate::value::Value;

pub mod arithmetic;
pub mod comparison;
pub mod lists;
pub mod logic;
pub mod math;
pub mod output;
pub mod strings;
pub mod system;
pub mod types_mod;

/// Parameter type specifier for one overload position.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Any,
    Number,
    Str,
    Bool,
    List,
    Function,
    Union(Vec<TypeSpec>),
    /// Homogeneous list.
    ListOf(Box<TypeSpec>),
    /// Zero or more trailing arguments of the element type. Only valid in
    /// the last position.
    InfiniteOf(Box<TypeSpec>),
}

impl TypeSpec {
    pub fn list_of(t: TypeSpec) -> TypeSpec {
        TypeSpec::ListOf(Box::new(t))
    }

    pub fn infinite_of(t: TypeSpec) -> TypeSpec {
        TypeSpec::InfiniteOf(Box::new(t))
    }

    pub fn union(ts: Vec<TypeSpec>) -> TypeSpec {
        TypeSpec::Union(ts)
    }

    pub fn name(&self) -> String {
        match self {
            TypeSpec::Any => "any".to_string(),
            TypeSpec::Number => "Number".to_string(),
            TypeSpec::Str => "String".to_string(),
            TypeSpec::Bool => "Boolean".to_string(),
            TypeSpec::List => "List".to_string(),
            TypeSpec::Function => "Function".to_string(),
            TypeSpec::Union(ts) => ts
                .iter()
                .map(TypeSpec::name)
                .collect::<Vec<_>>()
                .join(" or "),
            TypeSpec::ListOf(t) => format!("List<{}>", t.name()),
            TypeSpec::InfiniteOf(t) => t.name(),
        }
    }
}

/// Per-position argument validator: a predicate plus the documented
/// failure template. Templates support `{i}`, `{typename}` and `{arg}`.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    pub check: fn(&Value) -> bool,
    pub template: &'static str,
}

pub mod validators {
    use super::Validator;
    use crate::number::Number;
    use crate::value::Value;

    fn integer_number(v: &Value) -> bool {
        matches!(v, Value::Number(n) if n.is_integer())
    }

    pub const MUL_INTEGER: Validator = Validator {
        check: integer_number,
        template: "Can't multiply by non-integer",
    };

    pub const LIST_INDEX: Validator = Validator {
        check: integer_number,
        template: "List index must be an integer",
    };

    pub const STRING_INDEX: Validator = Validator {
        check: integer_number,
        template: "String index must be an integer",
    };

    pub const RANGE_BOUND: Validator = Validator {
        check: integer_number,
        template: "Range bounds must be integers",
    };

    pub const ROUND_DIGITS: Validator = Validator {
        check: integer_number,
        template: "Number of digits must be an integer",
    };

    fn numeric_text(v: &Value) -> bool {
        match v {
            Value::Number(_) | Value::Bool(_) => true,
            Value::Str(s) => Number::parse(s).is_some(),
            _ => false,
        }
    }

    pub const IS_NUMBER: Validator = Validator {
        check: numeric_text,
        template: "Can't convert to number with base 10: '{arg}'",
    };

    fn iterable(v: &Value) -> bool {
        matches!(v, Value::List(_) | Value::Str(_))
    }

    pub const IS_ITERABLE: Validator = Validator {
        check: iterable,
        template: "Type '{typename}' is not iterable",
    };
}

pub type BuiltinImpl = fn(&mut Interpreter, &[Value]) -> Result<Value, NumFuError>;
pub type Transformer = fn(&mut Interpreter, &[Value]) -> Result<Vec<Value>, NumFuError>;

#[derive(Debug, Clone)]
pub struct Overload {
    pub arg_types: Vec<TypeSpec>,
    pub validators: Vec<Option<Validator>>,
    pub transformer: Option<Transformer>,
    pub imp: BuiltinImpl,
    /// For commutative overloads: position `i` of the incoming arguments
    /// is canonical position `perm[i]` of the implementation.
    pub perm: Option<Vec<usize>>,
    /// Extra hint appended to type mismatch messages.
    pub help: Option<&'static str>,
}

#[derive(Debug)]
pub struct BuiltinFunc {
    pub name: String,
    pub eval_lists: bool,
    pub help: Option<&'static str>,
    pub overloads: Vec<Overload>,
    pub errors: Vec<(Vec<TypeSpec>, &'static str)>,
}

impl BuiltinFunc {
    pub fn new(name: &str) -> Self {
        BuiltinFunc {
            name: name.to_string(),
            eval_lists: false,
            help: None,
            overloads: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn eval_lists(mut self) -> Self {
        self.eval_lists = true;
        self
    }

    pub fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }

    pub fn add(self, arg_types: Vec<TypeSpec>, imp: BuiltinImpl) -> Self {
        self.add_overload(arg_types, Vec::new(), None, imp, false, None)
    }

    pub fn add_checked(
        self,
        arg_types: Vec<TypeSpec>,
        validators: Vec<Option<Validator>>,
        imp: BuiltinImpl,
    ) -> Self {
        self.add_overload(arg_types, validators, None, imp, false, None)
    }

    pub fn add_commutative(
        self,
        arg_types: Vec<TypeSpec>,
        validators: Vec<Option<Validator>>,
        imp: BuiltinImpl,
    ) -> Self {
        self.add_overload(arg_types, validators, None, imp, true, None)
    }

    pub fn add_transformed(
        self,
        arg_types: Vec<TypeSpec>,
        transformer: Transformer,
        help: Option<&'static str>,
        imp: BuiltinImpl,
    ) -> Self {
        self.add_overload(arg_types, Vec::new(), Some(transformer), imp, false, help)
    }

    fn add_overload(
        mut self,
        arg_types: Vec<TypeSpec>,
        validators: Vec<Option<Validator>>,
        transformer: Option<Transformer>,
        imp: BuiltinImpl,
        commutative: bool,
        help: Option<&'static str>,
    ) -> Self {
        debug_assert!(validators.is_empty() || validators.len() == arg_types.len());
        debug_assert!(
            arg_types
                .iter()
                .position(|t| matches!(t, TypeSpec::InfiniteOf(_)))
                .map(|i| i == arg_types.len() - 1)
                .unwrap_or(true),
            "InfiniteOf must be last"
        );
        if commutative {
            for perm in permutations(arg_types.len()) {
                let types = perm.iter().map(|&i| arg_types[i].clone()).collect();
                let vals = if validators.is_empty() {
                    Vec::new()
                } else {
                    perm.iter().map(|&i| validators[i]).collect()
                };
                self.overloads.push(Overload {
                    arg_types: types,
                    validators: vals,
                    transformer,
                    imp,
                    perm: Some(perm),
                    help,
                });
            }
        } else {
            self.overloads.push(Overload {
                arg_types,
                validators,
                transformer,
                imp,
                perm: None,
                help,
            });
        }
        self
    }

    pub fn error(mut self, arg_types: Vec<TypeSpec>, message: &'static str) -> Self {
        self.errors.push((arg_types, message));
        self
    }

    fn is_operator(&self) -> bool {
        is_operator(&self.name)
    }

    /// Overload resolution: first structural match in registration order,
    /// validator failures raised eagerly, accumulated type errors raised
    /// as the first collected message, arity errors last.
    pub fn dispatch(
        &self,
        interp: &mut Interpreter,
        args: &[Value],
        func_pos: Pos,
        args_pos: Pos,
    ) -> Result<Value, NumFuError> {
        let err_pos = if self.is_operator() { func_pos } else { args_pos };
        let mut first_type_error: Option<String> = None;

        'overloads: for ov in &self.overloads {
            let mut types = ov.arg_types.clone();
            if let Some(TypeSpec::InfiniteOf(elem)) = types.last().cloned() {
                if args.len() + 1 < types.len() {
                    continue;
                }
                types.pop();
                while types.len() < args.len() {
                    types.push((*elem).clone());
                }
            }
            if args.len() != types.len() {
                continue;
            }

            let args: Vec<Value> = match ov.transformer {
                Some(t) => t(interp, args)?,
                None => args.to_vec(),
            };

            for i in (0..args.len()).rev() {
                if !check_type(interp, &args[i], &types[i])? {
                    if first_type_error.is_none() {
                        let mut msg = format!(
                            "Invalid argument type for {}'{}': argument {} must be {}, got {}",
                            if self.is_operator() { "operator " } else { "" },
                            self.name,
                            i + 1,
                            types[i].name(),
                            args[i].type_name(),
                        );
                        if let Some(help) = ov.help {
                            msg.push_str(&format!("\nhelp: {help}"));
                        }
                        first_type_error = Some(msg);
                    }
                    continue 'overloads;
                }
                if let Some(Some(v)) = ov.validators.get(i) {
                    if !(v.check)(&args[i]) {
                        let msg = v
                            .template
                            .replace("{i}", &(i + 1).to_string())
                            .replace("{typename}", args[i].type_name())
                            .replace("{arg}", &interp.render_for_message(&args[i]));
                        return Err(NumFuError::at(ErrorKind::Type, msg, err_pos));
                    }
                }
            }

            // Undo the commutative permutation so the implementation sees
            // its canonical argument order.
            let canonical: Vec<Value> = match &ov.perm {
                Some(perm) => {
                    let mut out = vec![Value::Placeholder; args.len()];
                    for (i, &target) in perm.iter().enumerate() {
                        out[target] = args[i].clone();
                    }
                    out
                }
                None => args,
            };
            return (ov.imp)(interp, &canonical).map_err(|e| match e.pos {
                Some(_) => e,
                None => {
                    let mut e = e;
                    e.pos = Some(err_pos);
                    e
                }
            });
        }

        for (types, message) in &self.errors {
            if args.len() == types.len() {
                let mut all = true;
                for (arg, t) in args.iter().zip(types) {
                    if !check_type(interp, arg, t)? {
                        all = false;
                        break;
                    }
                }
                if all {
                    return Err(NumFuError::at(ErrorKind::Type, *message, err_pos));
                }
            }
        }

        if let Some(msg) = first_type_error {
            return Err(NumFuError::at(ErrorKind::Type, msg, err_pos));
        }

        let expected = self
            .overloads
            .first()
            .map(|o| o.arg_types.len())
            .unwrap_or(0);
        let mut msg = format!(
            "'{}' expected {} argument{}, got {}",
            self.name,
            expected,
            if expected == 1 { "" } else { "s" },
            args.len()
        );
        if let Some(help) = self.help {
            msg.push_str(&format!("\nhelp: {help}"));
        }
        Err(NumFuError::at(ErrorKind::Type, msg, err_pos))
    }
}

/// Check one value against one specifier. List element checks force
/// evaluation of the list in its capture environment.
pub fn check_type(
    interp: &mut Interpreter,
    value: &Value,
    spec: &TypeSpec,
) -> Result<bool, NumFuError> {
    Ok(match spec {
        TypeSpec::Any => true,
        TypeSpec::Number => matches!(value, Value::Number(_)),
        TypeSpec::Str => matches!(value, Value::Str(_)),
        TypeSpec::Bool => matches!(value, Value::Bool(_)),
        TypeSpec::List => matches!(value, Value::List(_)),
        TypeSpec::Function => matches!(value, Value::Closure(_) | Value::Builtin(_)),
        TypeSpec::Union(ts) => {
            for t in ts {
                if check_type(interp, value, t)? {
                    return Ok(true);
                }
            }
            false
        }
        TypeSpec::ListOf(t) => match value {
            Value::List(l) => {
                let items = interp.list_values(l)?;
                for item in &items {
                    if !check_type(interp, item, t)? {
                        return Ok(false);
                    }
                }
                true
            }
            _ => false,
        },
        TypeSpec::InfiniteOf(t) => check_type(interp, value, t)?,
    })
}

// Argument accessors for implementations running after a successful type
// check. The fallbacks exist for overloads registered with mismatched
// specifiers, not for user input.

pub(crate) fn as_num(v: &Value) -> Result<&crate::number::Number, NumFuError> {
    match v {
        Value::Number(n) => Ok(n),
        _ => Err(NumFuError::new(
            ErrorKind::Type,
            format!("expected Number, got {}", v.type_name()),
        )),
    }
}

pub(crate) fn as_str(v: &Value) -> Result<&str, NumFuError> {
    match v {
        Value::Str(s) => Ok(s),
        _ => Err(NumFuError::new(
            ErrorKind::Type,
            format!("expected String, got {}", v.type_name()),
        )),
    }
}

pub(crate) fn as_list(v: &Value) -> Result<&crate::value::ListValue, NumFuError> {
    match v {
        Value::List(l) => Ok(l),
        _ => Err(NumFuError::new(
            ErrorKind::Type,
            format!("expected List, got {}", v.type_name()),
        )),
    }
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for i in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(i, n - 1);
            out.push(p);
        }
    }
    out
}

/// Deep structural equality used by `==`, `!=` and `member`. Distinct
/// kinds compare unequal; lists compare element-wise after evaluation.
pub fn value_eq(interp: &mut Interpreter, a: &Value, b: &Value) -> Result<bool, NumFuError> {
    Ok(match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.eq_num(y),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            let xs = interp.list_values(x)?;
            let ys = interp.list_values(y)?;
            for (xv, yv) in xs.iter().zip(&ys) {
                if !value_eq(interp, xv, yv)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Closure(x), Value::Closure(y)) => x.params == y.params && x.body == y.body,
        (Value::Builtin(x), Value::Builtin(y)) => x.func.name == y.func.name,
        _ => false,
    })
}

/// The process-wide builtin table plus the stdlib groups importable as
/// modules (`math`, `random`, `sys`, `io`, `types`).
#[derive(Debug, Default)]
pub struct Registry {
    core: HashMap<String, Value>,
    groups: HashMap<&'static str, HashMap<String, Value>>,
}

impl Registry {
    pub fn new(precision: u32) -> Self {
        let mut reg = Registry::default();
        arithmetic::register(&mut reg);
        comparison::register(&mut reg);
        logic::register(&mut reg);
        math::register(&mut reg);
        lists::register(&mut reg);
        strings::register(&mut reg);
        output::register(&mut reg);
        system::register(&mut reg);
        types_mod::register(&mut reg);
        reg.register_constants(precision);
        reg
    }

    fn register_constants(&mut self, precision: u32) {
        use crate::number::{euler_const, pi_const, Number};
        self.core_value("pi", Value::Number(pi_const(precision)));
        self.core_value("e", Value::Number(euler_const(precision)));
        self.core_value("nan", Value::Number(Number::nan()));
        self.core_value("inf", Value::Number(Number::inf(false)));
    }

    pub fn core(&mut self, func: BuiltinFunc) {
        let name = func.name.clone();
        self.core_value(
            &name,
            Value::Builtin(crate::value::BuiltinRef::new(Rc::new(func))),
        );
    }

    pub fn core_value(&mut self, name: &str, value: Value) {
        self.core.insert(name.to_string(), value);
    }

    pub fn group(&mut self, group: &'static str, func: BuiltinFunc) {
        let name = func.name.clone();
        self.group_value(
            group,
            &name,
            Value::Builtin(crate::value::BuiltinRef::new(Rc::new(func))),
        );
    }

    pub fn group_value(&mut self, group: &'static str, name: &str, value: Value) {
        self.groups
            .entry(group)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.core.get(name).cloned()
    }

    pub fn core_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.core.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn group_bindings(&self, group: &str) -> Option<&HashMap<String, Value>> {
        self.groups.get(group)
    }
}
