// ABOUTME: Parser turning NumFu source text into AST nodes using nom combinators

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace1},
    combinator::{opt, value},
    IResult, Parser as NomParser,
};

use crate::ast::{Expr, ImportNames, Pos};
use crate::error::{ErrorKind, NumFuError};

const KEYWORDS: &[&str] = &[
    "let", "in", "if", "then", "else", "true", "false", "import", "from", "export", "del",
];

/// Parse a whole program into top-level nodes. Indices are assigned in
/// declaration order and drive pre-declaration checks in the evaluator.
pub fn parse(code: &str) -> Result<Vec<Expr>, NumFuError> {
    let p = P { src: code };
    let mut rest = skip_ws(code);
    let mut out = Vec::new();
    let mut index = 0;
    while !rest.is_empty() {
        let (next, mut stmt) = p
            .statement(rest)
            .map_err(|_| p.syntax_error(rest))?;
        stmt.set_index(index);
        index += 1;
        out.push(stmt);
        rest = skip_ws(next);
        while let Some(stripped) = rest.strip_prefix(';') {
            rest = skip_ws(stripped);
        }
    }
    Ok(out)
}

struct P<'a> {
    src: &'a str,
}

/// Skip whitespace and `//` line comments.
fn skip_ws(input: &str) -> &str {
    let mut rest = input;
    loop {
        let trimmed = rest.trim_start();
        if let Some(comment) = trimmed.strip_prefix("//") {
            rest = match comment.find('\n') {
                Some(i) => &comment[i + 1..],
                None => "",
            };
        } else if trimmed.len() != rest.len() {
            rest = trimmed;
        } else {
            return rest;
        }
    }
}

fn ws(input: &str) -> IResult<&str, ()> {
    let mut rest = input;
    loop {
        let before = rest;
        if let Ok((r, _)) = multispace1::<&str, nom::error::Error<&str>>(rest) {
            rest = r;
        }
        if let Ok((r, _)) = tag::<&str, &str, nom::error::Error<&str>>("//")(rest) {
            rest = match r.find('\n') {
                Some(i) => &r[i + 1..],
                None => "",
            };
        }
        if before == rest {
            return Ok((rest, ()));
        }
    }
}

fn ident_raw(input: &str) -> IResult<&str, &str> {
    let mut end = 0;
    for (i, c) in input.char_indices() {
        let ok = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Alpha,
        )));
    }
    Ok((&input[end..], &input[..end]))
}

fn keyword(word: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let (rest, id) = ident_raw(input)?;
        if id == word {
            Ok((rest, id))
        } else {
            Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    }
}

/// Module path token for import statements: identifiers with an optional
/// relative path prefix. Validity is enforced by the resolver.
fn module_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || "_./~".contains(c))(input)
}

impl<'a> P<'a> {
    fn off(&self, rest: &str) -> usize {
        self.src.len() - rest.len()
    }

    fn syntax_error(&self, rest: &str) -> NumFuError {
        let rest = skip_ws(rest);
        let start = self.off(rest);
        let token: String = rest.chars().take_while(|c| !c.is_whitespace()).take(12).collect();
        let (message, end) = if token.is_empty() {
            ("Unexpected end of input".to_string(), start + 1)
        } else {
            (format!("Unexpected token '{token}'"), start + token.chars().count())
        };
        NumFuError::at(ErrorKind::Syntax, message, Pos::new(start, end))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&self, i: &'a str) -> IResult<&'a str, Expr> {
        if let Ok(r) = self.import_stmt(i) {
            return Ok(r);
        }
        if let Ok(r) = self.from_stmt(i) {
            return Ok(r);
        }
        if let Ok(r) = self.export_stmt(i) {
            return Ok(r);
        }
        if let Ok(r) = self.del_stmt(i) {
            return Ok(r);
        }
        if let Ok(r) = self.let_stmt(i) {
            return Ok(r);
        }
        self.expr(i)
    }

    fn import_stmt(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (i2, _) = keyword("import")(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, module) = module_name(i2)?;
        Ok((
            i2,
            Expr::Import {
                names: ImportNames::Whole,
                module: module.to_string(),
                pos: Pos::new(start, self.off(i2)),
            },
        ))
    }

    fn from_stmt(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (i2, _) = keyword("from")(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, module) = module_name(i2)?;
        let (i2, _) = ws(i2)?;
        let (i2, _) = keyword("import")(i2)?;
        let (i2, _) = ws(i2)?;
        if let Ok((i3, _)) = char::<&str, nom::error::Error<&str>>('*')(i2) {
            return Ok((
                i3,
                Expr::Import {
                    names: ImportNames::Star,
                    module: module.to_string(),
                    pos: Pos::new(start, self.off(i3)),
                },
            ));
        }
        let (i2, names) = self.name_list(i2)?;
        Ok((
            i2,
            Expr::Import {
                names: ImportNames::Listed(names),
                module: module.to_string(),
                pos: Pos::new(start, self.off(i2)),
            },
        ))
    }

    fn export_stmt(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (i2, _) = keyword("export")(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, names) = self.name_list(i2)?;
        Ok((
            i2,
            Expr::Export {
                names,
                pos: Pos::new(start, self.off(i2)),
            },
        ))
    }

    fn del_stmt(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (i2, _) = keyword("del")(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, name) = self.ident(i2)?;
        Ok((
            i2,
            Expr::Delete {
                name,
                pos: Pos::new(start, self.off(i2)),
            },
        ))
    }

    fn name_list(&self, i: &'a str) -> IResult<&'a str, Vec<(String, Pos)>> {
        let mut names = Vec::new();
        let name_start = self.off(i);
        let (mut rest, first) = self.ident(i)?;
        names.push((first, Pos::new(name_start, self.off(rest))));
        loop {
            let (r, _) = ws(rest)?;
            match char::<&str, nom::error::Error<&str>>(',')(r) {
                Ok((r2, _)) => {
                    let (r2, _) = ws(r2)?;
                    let name_start = self.off(r2);
                    let (r2, name) = self.ident(r2)?;
                    names.push((name, Pos::new(name_start, self.off(r2))));
                    rest = r2;
                }
                Err(_) => return Ok((rest, names)),
            }
        }
    }

    /// `let` at statement level: with `in` it is an expression, without it
    /// a module constant declaration.
    fn let_stmt(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (i2, _) = keyword("let")(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, bindings) = self.let_bindings(i2)?;
        let (r, _) = ws(i2)?;
        if let Ok((r2, _)) = keyword("in")(r) {
            let (r2, _) = ws(r2)?;
            let (r2, body) = self.expr(r2)?;
            return Ok((r2, self.desugar_let(bindings, body, start, self.off(r2))));
        }
        // Bare constant declaration: exactly one binding.
        if bindings.len() != 1 {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Tag,
            )));
        }
        let (name, val) = bindings.into_iter().next().expect("one binding");
        Ok((
            i2,
            Expr::Constant {
                name,
                value: Box::new(val),
                pos: Pos::new(start, self.off(i2)),
            },
        ))
    }

    fn let_bindings(&self, i: &'a str) -> IResult<&'a str, Vec<(String, Expr)>> {
        let mut bindings = Vec::new();
        let (mut rest, (name, val)) = self.let_binding(i)?;
        bindings.push((name, val));
        loop {
            let (r, _) = ws(rest)?;
            match char::<&str, nom::error::Error<&str>>(',')(r) {
                Ok((r2, _)) => {
                    let (r2, _) = ws(r2)?;
                    let (r2, (name, val)) = self.let_binding(r2)?;
                    bindings.push((name, val));
                    rest = r2;
                }
                Err(_) => return Ok((rest, bindings)),
            }
        }
    }

    fn let_binding(&self, i: &'a str) -> IResult<&'a str, (String, Expr)> {
        let (i2, name) = self.ident(i)?;
        let (i2, _) = ws(i2)?;
        let (i2, _) = char('=')(i2)?;
        // Reject `==` so comparisons are not torn apart.
        if i2.starts_with('=') {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Char,
            )));
        }
        let (i2, _) = ws(i2)?;
        let (i2, val) = self.pipe_expr(i2)?;
        Ok((i2, (name, val)))
    }

    /// `let a = x, b = y in body` becomes `{a, b -> body}(x, y)`.
    fn desugar_let(
        &self,
        bindings: Vec<(String, Expr)>,
        body: Expr,
        start: usize,
        end: usize,
    ) -> Expr {
        let pos = Pos::new(start, end);
        let (params, values): (Vec<String>, Vec<Expr>) = bindings.into_iter().unzip();
        Expr::Call {
            func: Box::new(Expr::Lambda {
                params,
                body: Box::new(body),
                pos,
            }),
            args: values,
            pos,
        }
    }

    // ------------------------------------------------------------------
    // Expressions, loosest binding first
    // ------------------------------------------------------------------

    fn expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        self.pipe_expr(i)
    }

    /// `a |> f(b)` applies `f` with `a` prepended to the arguments.
    fn pipe_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let (mut rest, mut lhs) = self.or_expr(i)?;
        loop {
            let (r, _) = ws(rest)?;
            match tag::<&str, &str, nom::error::Error<&str>>("|>")(r) {
                Ok((r2, _)) => {
                    let (r2, _) = ws(r2)?;
                    let (r2, rhs) = self.or_expr(r2)?;
                    let pos = Pos::span(&lhs.pos(), &rhs.pos());
                    lhs = match rhs {
                        Expr::Call { func, mut args, .. } => {
                            args.insert(0, lhs);
                            Expr::Call { func, args, pos }
                        }
                        other => Expr::Call {
                            func: Box::new(other),
                            args: vec![lhs],
                            pos,
                        },
                    };
                    rest = r2;
                }
                Err(_) => return Ok((rest, lhs)),
            }
        }
    }

    fn or_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        self.binary_level(i, &["||"], &Self::and_expr)
    }

    fn and_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        self.binary_level(i, &["&&"], &Self::cmp_expr)
    }

    /// Comparisons chain: `a == b < c` desugars to `(a == b) && (b < c)`.
    fn cmp_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let (mut rest, first) = self.add_expr(i)?;
        let mut operands = vec![first];
        let mut ops: Vec<(String, Pos)> = Vec::new();
        loop {
            let (r, _) = ws(rest)?;
            let op_start = self.off(r);
            let found = ["==", "!=", "<=", ">=", "<", ">"]
                .iter()
                .find_map(|op| {
                    tag::<&str, &str, nom::error::Error<&str>>(op)(r)
                        .ok()
                        .map(|(r2, _)| (op.to_string(), r2))
                });
            match found {
                Some((op, r2)) => {
                    let (r2, _) = ws(r2)?;
                    let (r2, next) = self.add_expr(r2)?;
                    ops.push((op, Pos::new(op_start, op_start + 2)));
                    operands.push(next);
                    rest = r2;
                }
                None => break,
            }
        }
        if ops.is_empty() {
            return Ok((rest, operands.pop().expect("one operand")));
        }
        let full = Pos::span(
            &operands[0].pos(),
            &operands[operands.len() - 1].pos(),
        );
        let link = |op: &(String, Pos), l: Expr, r: Expr| Expr::Call {
            func: Box::new(Expr::Variable {
                name: op.0.clone(),
                pos: op.1,
            }),
            args: vec![l, r],
            pos: full,
        };
        let mut expr = link(&ops[0], operands[0].clone(), operands[1].clone());
        for (k, op) in ops.iter().enumerate().skip(1) {
            let next = link(op, operands[k].clone(), operands[k + 1].clone());
            expr = Expr::Call {
                func: Box::new(Expr::Variable {
                    name: "&&".to_string(),
                    pos: op.1,
                }),
                args: vec![expr, next],
                pos: full,
            };
        }
        Ok((rest, expr))
    }

    fn add_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        self.binary_level(i, &["+", "-"], &Self::mul_expr)
    }

    fn mul_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        self.binary_level(i, &["*", "/", "%"], &Self::unary_expr)
    }

    fn binary_level(
        &self,
        i: &'a str,
        ops: &[&'static str],
        next: &dyn Fn(&Self, &'a str) -> IResult<&'a str, Expr>,
    ) -> IResult<&'a str, Expr> {
        let (mut rest, mut lhs) = next(self, i)?;
        loop {
            let (r, _) = ws(rest)?;
            let op_start = self.off(r);
            let found = ops.iter().find_map(|op| {
                // `|>` must not be eaten by a bare `|`, nor `==` by `=`.
                tag::<&str, &str, nom::error::Error<&str>>(*op)(r)
                    .ok()
                    .map(|(r2, m)| (*op, m, r2))
            });
            match found {
                Some((op, _m, r2)) => {
                    let (r2, _) = ws(r2)?;
                    let (r2, rhs) = next(self, r2)?;
                    let pos = Pos::span(&lhs.pos(), &rhs.pos());
                    lhs = Expr::Call {
                        func: Box::new(Expr::Variable {
                            name: op.to_string(),
                            pos: Pos::new(op_start, op_start + op.len()),
                        }),
                        args: vec![lhs, rhs],
                        pos,
                    };
                    rest = r2;
                }
                None => return Ok((rest, lhs)),
            }
        }
    }

    fn unary_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        if let Ok((r, op)) = alt((
            value("-", char::<&str, nom::error::Error<&str>>('-')),
            value("!", char('!')),
        ))
        .parse(i)
        {
            let (r, _) = ws(r)?;
            let (r, operand) = self.unary_expr(r)?;
            let op_pos = Pos::new(start, start + 1);
            return Ok((
                r,
                Expr::Call {
                    func: Box::new(Expr::Variable {
                        name: op.to_string(),
                        pos: op_pos,
                    }),
                    args: vec![operand],
                    pos: op_pos,
                },
            ));
        }
        self.power_expr(i)
    }

    /// `^` is right-associative and binds tighter than unary minus on the
    /// left: `-2^2` is `-(2^2)`.
    fn power_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let (rest, base) = self.postfix_expr(i)?;
        let (r, _) = ws(rest)?;
        let op_start = self.off(r);
        if let Ok((r2, _)) = char::<&str, nom::error::Error<&str>>('^')(r) {
            let (r2, _) = ws(r2)?;
            let (r2, exponent) = self.unary_expr(r2)?;
            let pos = Pos::span(&base.pos(), &exponent.pos());
            return Ok((
                r2,
                Expr::Call {
                    func: Box::new(Expr::Variable {
                        name: "^".to_string(),
                        pos: Pos::new(op_start, op_start + 1),
                    }),
                    args: vec![base, exponent],
                    pos,
                },
            ));
        }
        Ok((rest, base))
    }

    /// Postfix call and index chains: `f(a)(b)[i]`.
    fn postfix_expr(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let (mut rest, mut target) = self.atom(i)?;
        loop {
            if let Ok((r, args)) = self.call_args(rest) {
                let pos = Pos::new(target.pos().start, self.off(r));
                target = Expr::Call {
                    func: Box::new(target),
                    args,
                    pos,
                };
                rest = r;
                continue;
            }
            if let Ok((r, _)) = char::<&str, nom::error::Error<&str>>('[')(rest) {
                let (r, _) = ws(r)?;
                let (r, index) = self.expr(r)?;
                let (r, _) = ws(r)?;
                let (r, _) = char(']')(r)?;
                let pos = Pos::new(target.pos().start, self.off(r));
                target = Expr::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                    pos,
                };
                rest = r;
                continue;
            }
            return Ok((rest, target));
        }
    }

    fn call_args(&self, i: &'a str) -> IResult<&'a str, Vec<Expr>> {
        let (r, _) = char('(')(i)?;
        let (r, _) = ws(r)?;
        if let Ok((r2, _)) = char::<&str, nom::error::Error<&str>>(')')(r) {
            return Ok((r2, Vec::new()));
        }
        let (mut rest, first) = self.element(r)?;
        let mut args = vec![first];
        loop {
            let (r, _) = ws(rest)?;
            if let Ok((r2, _)) = char::<&str, nom::error::Error<&str>>(',')(r) {
                let (r2, _) = ws(r2)?;
                let (r2, next) = self.element(r2)?;
                args.push(next);
                rest = r2;
            } else {
                let (r2, _) = char(')')(r)?;
                return Ok((r2, args));
            }
        }
    }

    /// A call argument or list element: an expression or a spread.
    fn element(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        if let Ok((r, _)) = tag::<&str, &str, nom::error::Error<&str>>("...")(i) {
            let (r, _) = ws(r)?;
            let (r, inner) = self.expr(r)?;
            return Ok((
                r,
                Expr::Spread {
                    expr: Box::new(inner),
                    pos: Pos::new(start, self.off(r)),
                },
            ));
        }
        self.expr(i)
    }

    fn atom(&self, i: &'a str) -> IResult<&'a str, Expr> {
        if let Ok(r) = self.number(i) {
            return Ok(r);
        }
        if let Ok(r) = self.string(i) {
            return Ok(r);
        }
        if let Ok(r) = self.list(i) {
            return Ok(r);
        }
        if let Ok(r) = self.lambda(i) {
            return Ok(r);
        }
        if let Ok(r) = self.conditional(i) {
            return Ok(r);
        }
        if let Ok(r) = self.let_in(i) {
            return Ok(r);
        }
        if let Ok(r) = self.paren(i) {
            return Ok(r);
        }
        self.boolean_or_variable(i)
    }

    fn number(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (rest, text) = nom::combinator::recognize((
            alt((
                nom::combinator::recognize((digit1, opt((char('.'), opt(digit1))))),
                nom::combinator::recognize((char('.'), digit1)),
            )),
            opt((
                alt((char('e'), char('E'))),
                opt(alt((char('+'), char('-')))),
                digit1,
            )),
        ))
        .parse(i)?;
        Ok((
            rest,
            Expr::Number {
                text: text.to_string(),
                pos: Pos::new(start, self.off(rest)),
            },
        ))
    }

    fn string(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (mut rest, _) = char('"')(i)?;
        let mut out = String::new();
        loop {
            let mut chars = rest.char_indices();
            match chars.next() {
                Some((_, '"')) => {
                    let rest = &rest[1..];
                    return Ok((
                        rest,
                        Expr::Str {
                            value: out,
                            pos: Pos::new(start, self.off(rest)),
                        },
                    ));
                }
                Some((_, '\\')) => match chars.next() {
                    Some((j, c)) => {
                        out.push(match c {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        rest = &rest[j + c.len_utf8()..];
                    }
                    None => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            rest,
                            nom::error::ErrorKind::Char,
                        )))
                    }
                },
                Some((j, c)) => {
                    out.push(c);
                    rest = &rest[j + c.len_utf8()..];
                }
                None => {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Char,
                    )))
                }
            }
        }
    }

    fn list(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (r, _) = char('[')(i)?;
        let (r, _) = ws(r)?;
        if let Ok((r2, _)) = char::<&str, nom::error::Error<&str>>(']')(r) {
            return Ok((
                r2,
                Expr::List {
                    elements: Vec::new(),
                    pos: Pos::new(start, self.off(r2)),
                },
            ));
        }
        let (mut rest, first) = self.element(r)?;
        let mut elements = vec![first];
        loop {
            let (r, _) = ws(rest)?;
            if let Ok((r2, _)) = char::<&str, nom::error::Error<&str>>(',')(r) {
                let (r2, _) = ws(r2)?;
                let (r2, next) = self.element(r2)?;
                elements.push(next);
                rest = r2;
            } else {
                let (r2, _) = char(']')(r)?;
                return Ok((
                    r2,
                    Expr::List {
                        elements,
                        pos: Pos::new(start, self.off(r2)),
                    },
                ));
            }
        }
    }

    /// `{a, b, ...rest -> body}`
    fn lambda(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (r, _) = char('{')(i)?;
        let (r, _) = ws(r)?;
        let (r, params) = self.lambda_params(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = tag("->")(r)?;
        let (r, _) = ws(r)?;
        let (r, body) = self.expr(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = char('}')(r)?;
        Ok((
            r,
            Expr::Lambda {
                params,
                body: Box::new(body),
                pos: Pos::new(start, self.off(r)),
            },
        ))
    }

    fn lambda_params(&self, i: &'a str) -> IResult<&'a str, Vec<String>> {
        let mut params = Vec::new();
        let mut rest = i;
        loop {
            let (r, _) = ws(rest)?;
            if !params.is_empty() {
                match char::<&str, nom::error::Error<&str>>(',')(r) {
                    Ok((r2, _)) => {
                        let (r2, _) = ws(r2)?;
                        let (r2, p) = self.lambda_param(r2)?;
                        params.push(p);
                        rest = r2;
                        continue;
                    }
                    Err(_) => return Ok((rest, params)),
                }
            }
            match self.lambda_param(r) {
                Ok((r2, p)) => {
                    params.push(p);
                    rest = r2;
                }
                Err(_) => return Ok((rest, params)),
            }
        }
    }

    fn lambda_param(&self, i: &'a str) -> IResult<&'a str, String> {
        if let Ok((r, _)) = tag::<&str, &str, nom::error::Error<&str>>("...")(i) {
            let (r, name) = self.ident(r)?;
            return Ok((r, format!("...{name}")));
        }
        self.ident(i)
    }

    fn conditional(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (r, _) = keyword("if")(i)?;
        let (r, _) = ws(r)?;
        let (r, test) = self.expr(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = keyword("then")(r)?;
        let (r, _) = ws(r)?;
        let (r, then_body) = self.expr(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = keyword("else")(r)?;
        let (r, _) = ws(r)?;
        let (r, else_body) = self.expr(r)?;
        Ok((
            r,
            Expr::Conditional {
                test: Box::new(test),
                then_body: Box::new(then_body),
                else_body: Box::new(else_body),
                pos: Pos::new(start, self.off(r)),
            },
        ))
    }

    /// `let x = e in body` as an expression.
    fn let_in(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (r, _) = keyword("let")(i)?;
        let (r, _) = ws(r)?;
        let (r, bindings) = self.let_bindings(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = keyword("in")(r)?;
        let (r, _) = ws(r)?;
        let (r, body) = self.expr(r)?;
        Ok((r, self.desugar_let(bindings, body, start, self.off(r))))
    }

    fn paren(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let (r, _) = char('(')(i)?;
        let (r, _) = ws(r)?;
        let (r, inner) = self.expr(r)?;
        let (r, _) = ws(r)?;
        let (r, _) = char(')')(r)?;
        Ok((r, inner))
    }

    fn boolean_or_variable(&self, i: &'a str) -> IResult<&'a str, Expr> {
        let start = self.off(i);
        let (mut rest, name) = ident_raw(i)?;
        match name {
            "true" => {
                return Ok((
                    rest,
                    Expr::Bool {
                        value: true,
                        pos: Pos::new(start, self.off(rest)),
                    },
                ))
            }
            "false" => {
                return Ok((
                    rest,
                    Expr::Bool {
                        value: false,
                        pos: Pos::new(start, self.off(rest)),
                    },
                ))
            }
            _ if KEYWORDS.contains(&name) => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Tag,
                )))
            }
            _ => {}
        }
        // Qualified references from whole-module imports: `math.sin`.
        let mut full = name.to_string();
        while let Some(after_dot) = rest.strip_prefix('.') {
            match ident_raw(after_dot) {
                Ok((r2, part)) if !KEYWORDS.contains(&part) => {
                    full.push('.');
                    full.push_str(part);
                    rest = r2;
                }
                _ => break,
            }
        }
        Ok((
            rest,
            Expr::Variable {
                name: full,
                pos: Pos::new(start, self.off(rest)),
            },
        ))
    }

    fn ident(&self, i: &'a str) -> IResult<&'a str, String> {
        let (rest, name) = ident_raw(i)?;
        if KEYWORDS.contains(&name) {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Tag,
            )));
        }
        Ok((rest, name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(code: &str) -> Expr {
        let tree = parse(code).expect("parse");
        assert_eq!(tree.len(), 1, "expected one node for {code}");
        tree.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_number() {
        match one("42") {
            Expr::Number { text, pos } => {
                assert_eq!(text, "42");
                assert_eq!(pos.start, 0);
                assert_eq!(pos.end, 2);
                assert_eq!(pos.index, Some(0));
            }
            other => panic!("Expected Number, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_string_escapes() {
        match one(r#""a\nb\"c""#) {
            Expr::Str { value, .. } => assert_eq!(value, "a\nb\"c"),
            other => panic!("Expected Str, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match one("1 + 2 * 3") {
            Expr::Call { func, args, .. } => {
                match *func {
                    Expr::Variable { name, .. } => assert_eq!(name, "+"),
                    other => panic!("Expected +, got {other:?}"),
                }
                match &args[1] {
                    Expr::Call { func, .. } => match func.as_ref() {
                        Expr::Variable { name, .. } => assert_eq!(name, "*"),
                        other => panic!("Expected *, got {other:?}"),
                    },
                    other => panic!("Expected Call, got {other:?}"),
                }
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_power_right_associative() {
        // 2 ^ 3 ^ 2 parses as 2 ^ (3 ^ 2)
        match one("2 ^ 3 ^ 2") {
            Expr::Call { args, .. } => match &args[1] {
                Expr::Call { func, .. } => match func.as_ref() {
                    Expr::Variable { name, .. } => assert_eq!(name, "^"),
                    other => panic!("Expected ^, got {other:?}"),
                },
                other => panic!("Expected nested ^, got {other:?}"),
            },
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_lambda_and_call() {
        match one("{x, y -> x}(1, 2)") {
            Expr::Call { func, args, .. } => {
                assert_eq!(args.len(), 2);
                match *func {
                    Expr::Lambda { params, .. } => assert_eq!(params, vec!["x", "y"]),
                    other => panic!("Expected Lambda, got {other:?}"),
                }
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_rest_param() {
        match one("{a, ...rest -> a}") {
            Expr::Lambda { params, .. } => {
                assert_eq!(params, vec!["a".to_string(), "...rest".to_string()]);
            }
            other => panic!("Expected Lambda, got {other:?}"),
        }
    }

    #[test]
    fn test_let_in_desugars_to_call() {
        match one("let x = 3 in x * x") {
            Expr::Call { func, args, .. } => {
                assert_eq!(args.len(), 1);
                match *func {
                    Expr::Lambda { params, .. } => assert_eq!(params, vec!["x"]),
                    other => panic!("Expected Lambda, got {other:?}"),
                }
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_let_is_constant() {
        match one("let x = 42") {
            Expr::Constant { name, .. } => assert_eq!(name, "x"),
            other => panic!("Expected Constant, got {other:?}"),
        }
    }

    #[test]
    fn test_pipe_desugar() {
        // a |> f(b) becomes f(a, b)
        match one("a |> f(b)") {
            Expr::Call { func, args, .. } => {
                match *func {
                    Expr::Variable { name, .. } => assert_eq!(name, "f"),
                    other => panic!("Expected f, got {other:?}"),
                }
                assert_eq!(args.len(), 2);
                match &args[0] {
                    Expr::Variable { name, .. } => assert_eq!(name, "a"),
                    other => panic!("Expected a, got {other:?}"),
                }
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_pipe_bare_function() {
        match one("xs |> sum") {
            Expr::Call { func, args, .. } => {
                match *func {
                    Expr::Variable { name, .. } => assert_eq!(name, "sum"),
                    other => panic!("Expected sum, got {other:?}"),
                }
                assert_eq!(args.len(), 1);
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_chained_comparison_desugar() {
        // 0 == 0 < 1 becomes (0 == 0) && (0 < 1)
        match one("0 == 0 < 1") {
            Expr::Call { func, args, .. } => {
                match *func {
                    Expr::Variable { name, .. } => assert_eq!(name, "&&"),
                    other => panic!("Expected &&, got {other:?}"),
                }
                assert_eq!(args.len(), 2);
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_conditional() {
        match one("if x then 1 else 2") {
            Expr::Conditional { .. } => {}
            other => panic!("Expected Conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_index_and_negative() {
        match one("xs[0]") {
            Expr::Index { .. } => {}
            other => panic!("Expected Index, got {other:?}"),
        }
    }

    #[test]
    fn test_list_with_spread() {
        match one("[1, ...xs, 2]") {
            Expr::List { elements, .. } => {
                assert_eq!(elements.len(), 3);
                assert!(matches!(elements[1], Expr::Spread { .. }));
            }
            other => panic!("Expected List, got {other:?}"),
        }
    }

    #[test]
    fn test_import_forms() {
        let tree = parse("import math\nfrom util import a, b\nfrom util import *").unwrap();
        assert_eq!(tree.len(), 3);
        assert!(matches!(
            &tree[0],
            Expr::Import {
                names: ImportNames::Whole,
                ..
            }
        ));
        match &tree[1] {
            Expr::Import {
                names: ImportNames::Listed(names),
                module,
                ..
            } => {
                assert_eq!(module, "util");
                assert_eq!(names.len(), 2);
                assert_eq!(names[0].0, "a");
            }
            other => panic!("Expected Listed import, got {other:?}"),
        }
        assert!(matches!(
            &tree[2],
            Expr::Import {
                names: ImportNames::Star,
                ..
            }
        ));
    }

    #[test]
    fn test_export_and_delete() {
        let tree = parse("export a, b\ndel a").unwrap();
        match &tree[0] {
            Expr::Export { names, .. } => assert_eq!(names.len(), 2),
            other => panic!("Expected Export, got {other:?}"),
        }
        assert!(matches!(&tree[1], Expr::Delete { .. }));
    }

    #[test]
    fn test_statements_with_semicolons() {
        let tree = parse("print(\"hi\"); 2 + 2").unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].pos().index, Some(0));
        assert_eq!(tree[1].pos().index, Some(1));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tree = parse("// leading\n1 + 1 // trailing\n// only comment\n2").unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_placeholder_is_variable() {
        match one("add(_, 5)") {
            Expr::Call { args, .. } => {
                assert!(args[0].is_placeholder());
            }
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse("1 + $").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.pos.is_some());
        assert!(err.message.contains('$'), "{}", err.message);
    }

    #[test]
    fn test_unary_and_power() {
        // -2^2 is -(2^2)
        match one("-2^2") {
            Expr::Call { func, .. } => match *func {
                Expr::Variable { name, .. } => assert_eq!(name, "-"),
                other => panic!("Expected -, got {other:?}"),
            },
            other => panic!("Expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_scientific_number() {
        match one("1.5e-3") {
            Expr::Number { text, .. } => assert_eq!(text, "1.5e-3"),
            other => panic!("Expected Number, got {other:?}"),
        }
    }
}
