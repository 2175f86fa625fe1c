// ABOUTME: Runtime value types produced and consumed by the evaluator

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::builtins::BuiltinFunc;
use crate::env::Env;
use crate::number::Number;

/// A formal parameter of a closure. A `...` prefix in the source marks a
/// rest parameter that absorbs trailing arguments into a List.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub rest: bool,
}

impl Param {
    pub fn parse(raw: &str) -> Param {
        match raw.strip_prefix("...") {
            Some(name) => Param {
                name: name.to_string(),
                rest: true,
            },
            None => Param {
                name: raw.to_string(),
                rest: false,
            },
        }
    }
}

/// The parse fragment stored on a closure for the reconstructor. Kept as
/// opaque serialized bytes on the closure itself; a corrupt fragment
/// degrades rendering, never evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<Param>,
    pub body: Expr,
    pub curry: Env,
    /// Id of the module the closure was defined in; body evaluation
    /// resolves that module's constants and imports.
    pub module: String,
    pub fragment: Vec<u8>,
}

impl Closure {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn has_rest(&self) -> bool {
        self.params.iter().any(|p| p.rest)
    }

    /// Non-rest parameters that must be supplied before the body can run.
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.rest).count()
    }
}

/// Lazy list: unevaluated element expressions plus the environment they
/// evaluate in. Snapshotted at construction.
#[derive(Debug, Clone)]
pub struct ListValue {
    pub elements: Rc<Vec<Expr>>,
    pub curry: Env,
    /// Id of the module the list was built in, for element evaluation.
    pub module: String,
}

impl ListValue {
    pub fn new(elements: Vec<Expr>, curry: Env, module: String) -> Self {
        ListValue {
            elements: Rc::new(elements),
            curry,
            module,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A builtin reference, possibly partially applied: `applied` holds the
/// argument pattern with `Placeholder` holes still to be filled.
#[derive(Debug, Clone)]
pub struct BuiltinRef {
    pub func: Rc<BuiltinFunc>,
    pub applied: Option<Rc<Vec<Value>>>,
}

impl BuiltinRef {
    pub fn new(func: Rc<BuiltinFunc>) -> Self {
        BuiltinRef {
            func,
            applied: None,
        }
    }
}

/// Print marker: carries the rendered value and suffix out of a `print`
/// call. `printed` flips to true the first time the effect is evaluated.
#[derive(Debug, Clone)]
pub struct PrintEffect {
    pub value: Value,
    pub end: String,
    pub printed: bool,
}

#[derive(Debug, Clone)]
pub enum Value {
    Number(Number),
    Bool(bool),
    Str(String),
    List(ListValue),
    Closure(Rc<Closure>),
    Builtin(BuiltinRef),
    PrintEffect(Box<PrintEffect>),
    /// The argument placeholder `_`.
    Placeholder,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::Bool(_) => "Boolean",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Closure(_) => "Function",
            Value::Builtin(_) => "Function",
            Value::PrintEffect(_) => "Print",
            Value::Placeholder => "Placeholder",
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Placeholder)
    }

    /// Everything is truthy except `false`, zero, the empty string, and
    /// the empty list.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => !n.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::PrintEffect(p) => p.value.truthy(),
            _ => true,
        }
    }
}
