// ABOUTME: AST node types produced by the parser and consumed by the evaluator

use serde::{Deserialize, Serialize};

/// Byte-offset span into the owning module's source. Top-level nodes also
/// carry a declaration index used to enforce pre-declaration of constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Pos {
    pub start: usize,
    pub end: usize,
    pub index: Option<usize>,
}

impl Pos {
    pub fn new(start: usize, end: usize) -> Self {
        Pos {
            start,
            end,
            index: None,
        }
    }

    pub fn span(start: &Pos, end: &Pos) -> Self {
        Pos {
            start: start.start,
            end: end.end,
            index: None,
        }
    }
}

/// How an `import` statement binds names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportNames {
    /// `import m` — every export, prefixed with the module stem.
    Whole,
    /// `from m import *`
    Star,
    /// `from m import a, b`
    Listed(Vec<(String, Pos)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number {
        text: String,
        pos: Pos,
    },
    Str {
        value: String,
        pos: Pos,
    },
    Bool {
        value: bool,
        pos: Pos,
    },
    Variable {
        name: String,
        pos: Pos,
    },
    List {
        elements: Vec<Expr>,
        pos: Pos,
    },
    Spread {
        expr: Box<Expr>,
        pos: Pos,
    },
    Lambda {
        /// Parameter names; a `...` prefix marks a rest parameter.
        params: Vec<String>,
        body: Box<Expr>,
        pos: Pos,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        pos: Pos,
    },
    Conditional {
        test: Box<Expr>,
        then_body: Box<Expr>,
        else_body: Box<Expr>,
        pos: Pos,
    },
    Constant {
        name: String,
        value: Box<Expr>,
        pos: Pos,
    },
    Delete {
        name: String,
        pos: Pos,
    },
    Import {
        names: ImportNames,
        module: String,
        pos: Pos,
    },
    Export {
        names: Vec<(String, Pos)>,
        pos: Pos,
    },
    Assertion {
        test: Box<Expr>,
        pos: Pos,
    },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Number { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Variable { pos, .. }
            | Expr::List { pos, .. }
            | Expr::Spread { pos, .. }
            | Expr::Lambda { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Conditional { pos, .. }
            | Expr::Constant { pos, .. }
            | Expr::Delete { pos, .. }
            | Expr::Import { pos, .. }
            | Expr::Export { pos, .. }
            | Expr::Assertion { pos, .. } => *pos,
        }
    }

    pub fn set_index(&mut self, index: usize) {
        match self {
            Expr::Number { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Variable { pos, .. }
            | Expr::List { pos, .. }
            | Expr::Spread { pos, .. }
            | Expr::Lambda { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Conditional { pos, .. }
            | Expr::Constant { pos, .. }
            | Expr::Delete { pos, .. }
            | Expr::Import { pos, .. }
            | Expr::Export { pos, .. }
            | Expr::Assertion { pos, .. } => pos.index = Some(index),
        }
    }

    /// Variable reference to the argument placeholder?
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Expr::Variable { name, .. } if name == "_")
    }
}

/// The operators whose errors are reported at the function position
/// rather than the argument span.
pub const OPERATORS: &[&str] = &[
    "+", "-", "*", "/", "^", "%", "<", ">", "<=", ">=", "==", "!=", "&&", "||", "!", "xor",
];

pub fn is_operator(name: &str) -> bool {
    OPERATORS.contains(&name)
}
