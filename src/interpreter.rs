// ABOUTME: Tree-walking evaluator with tail-call trampolining and module context

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::{Expr, Pos};
use crate::builtins::Registry;
use crate::env::Env;
use crate::error::{ErrorKind, NumFuError};
use crate::modules::{Global, ImportResolver};
use crate::number::Number;
use crate::parser;
use crate::value::{BuiltinRef, Closure, Fragment, ListValue, Param, PrintEffect, Value};

/// Result of evaluating a node in tail position. A Bounce asks the
/// closure-entry loop to iterate instead of recursing on the host stack.
pub enum Step {
    Done(Value),
    Bounce {
        closure: Rc<Closure>,
        args: Vec<Value>,
        env: Env,
    },
}

/// Ambient evaluation context: lexical environment, owning module,
/// current top-level index, tail flag, and host recursion depth.
#[derive(Clone)]
pub struct State {
    pub env: Env,
    pub module: String,
    pub index: Option<usize>,
    pub tail: bool,
    pub depth: usize,
}

impl State {
    fn nested(&self) -> State {
        State {
            env: self.env.clone(),
            module: self.module.clone(),
            index: self.index,
            tail: false,
            depth: self.depth + 1,
        }
    }
}

#[derive(Clone)]
enum OutputSink {
    Stdout,
    Capture(Rc<RefCell<String>>),
}

pub struct Interpreter {
    pub precision: u32,
    pub rec_depth: usize,
    pub iter_depth: Option<u64>,
    pub registry: Registry,
    pub resolver: ImportResolver,
    out: OutputSink,
    rng: StdRng,
    lit_counter: u64,
    next_index: usize,
    ctx_module: String,
    line_pending: bool,
}

impl Interpreter {
    pub fn new(precision: u32, rec_depth: usize, iter_depth: Option<u64>) -> Self {
        Interpreter {
            precision,
            rec_depth,
            iter_depth,
            registry: Registry::new(precision),
            resolver: ImportResolver::new(),
            out: OutputSink::Stdout,
            rng: StdRng::from_entropy(),
            lit_counter: 0,
            next_index: 0,
            ctx_module: String::new(),
            line_pending: false,
        }
    }

    /// Interpreter writing into a shared buffer, for tests and the REPL.
    pub fn with_capture(precision: u32, rec_depth: usize, iter_depth: Option<u64>) -> Self {
        let mut interp = Interpreter::new(precision, rec_depth, iter_depth);
        interp.out = OutputSink::Capture(Rc::new(RefCell::new(String::new())));
        interp
    }

    pub fn captured_output(&self) -> Option<String> {
        match &self.out {
            OutputSink::Capture(buf) => Some(buf.borrow().clone()),
            OutputSink::Stdout => None,
        }
    }

    pub fn ctx_module(&self) -> &str {
        &self.ctx_module
    }

    // ------------------------------------------------------------------
    // Program entry points
    // ------------------------------------------------------------------

    /// Parse and run a program. Rendered top-level results are returned;
    /// with `echo` they are also written to the output stream in order.
    pub fn run_source(
        &mut self,
        code: &str,
        path: &str,
        echo: bool,
    ) -> Result<Vec<String>, NumFuError> {
        let tree = parser::parse(code)?;
        self.run_tree(tree, path, code, echo)
    }

    pub fn run_tree(
        &mut self,
        mut tree: Vec<Expr>,
        path: &str,
        code: &str,
        echo: bool,
    ) -> Result<Vec<String>, NumFuError> {
        // Keep declaration indices increasing across REPL lines.
        for node in &mut tree {
            if let Some(i) = node.pos().index {
                node.set_index(i + self.next_index);
            }
        }
        self.next_index += tree.len();

        let resolved = self
            .resolver
            .resolve(tree, path, code, &self.registry)?;

        // Imported module bodies run at load, dependencies first.
        for id in &resolved.order {
            if let Some(body) = self.resolver.bodies.get(id).cloned() {
                self.exec_nodes(id.clone(), &body, false)?;
            }
        }

        let body = self
            .resolver
            .bodies
            .get(&resolved.main)
            .cloned()
            .unwrap_or_default();
        self.exec_nodes(resolved.main, &body, echo)
    }

    fn exec_nodes(
        &mut self,
        module_id: String,
        nodes: &[Expr],
        echo: bool,
    ) -> Result<Vec<String>, NumFuError> {
        self.ctx_module = module_id.clone();
        let mut results = Vec::new();
        for node in nodes {
            match node {
                Expr::Import { .. } | Expr::Export { .. } => {}
                Expr::Constant { name, value, pos } => {
                    let global = Global::Const {
                        value: (**value).clone(),
                        index: pos.index.unwrap_or(0),
                    };
                    if let Some(m) = self.resolver.modules.get_mut(&module_id) {
                        m.globals.insert(name.clone(), global);
                    }
                }
                Expr::Delete { name, pos } => {
                    let removed = self
                        .resolver
                        .modules
                        .get_mut(&module_id)
                        .map(|m| m.globals.remove(name).is_some())
                        .unwrap_or(false);
                    if !removed {
                        return Err(NumFuError::at(
                            ErrorKind::Name,
                            format!("'{name}' is not defined in the current scope"),
                            *pos,
                        )
                        .in_module(&module_id));
                    }
                }
                _ => {
                    let st = State {
                        env: Env::new(),
                        module: module_id.clone(),
                        index: node.pos().index,
                        tail: false,
                        depth: 0,
                    };
                    let value = self
                        .eval(node, &st)
                        .map_err(|e| e.in_module(&module_id))?;
                    match &value {
                        Value::PrintEffect(_) => {
                            if self.line_pending {
                                self.write_out("\n");
                            }
                        }
                        _ => {
                            if matches!(node, Expr::Assertion { .. }) {
                                continue;
                            }
                            let rendered = self
                                .render_value(&value, false)
                                .map_err(|e| e.in_module(&module_id))?;
                            if echo {
                                self.write_out(&rendered);
                                self.write_out("\n");
                            }
                            results.push(rendered);
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Core evaluation
    // ------------------------------------------------------------------

    /// Evaluate in non-tail position; any Bounce that still surfaces is
    /// run to completion here.
    pub fn eval(&mut self, node: &Expr, st: &State) -> Result<Value, NumFuError> {
        let mut non_tail = st.clone();
        non_tail.tail = false;
        match self.eval_step(node, &non_tail)? {
            Step::Done(v) => Ok(v),
            Step::Bounce { closure, args, env } => self.trampoline(closure, args, env, &non_tail),
        }
    }

    fn eval_step(&mut self, node: &Expr, st: &State) -> Result<Step, NumFuError> {
        if st.depth > self.rec_depth {
            return Err(NumFuError::at(
                ErrorKind::Recursion,
                "maximum recursion depth exceeded",
                node.pos(),
            ));
        }
        match node {
            Expr::Number { text, pos } => match Number::parse(text) {
                Some(n) => Ok(Step::Done(Value::Number(n.round_to(self.precision)))),
                None => Err(NumFuError::at(
                    ErrorKind::Value,
                    format!("Invalid number literal '{text}'"),
                    *pos,
                )),
            },
            Expr::Str { value, .. } => Ok(Step::Done(Value::Str(value.clone()))),
            Expr::Bool { value, .. } => Ok(Step::Done(Value::Bool(*value))),
            Expr::Variable { name, pos } => Ok(Step::Done(self.lookup(name, st, *pos)?)),
            Expr::Lambda { params, body, .. } => {
                Ok(Step::Done(self.make_closure(params, body, st)))
            }
            Expr::List { elements, pos } => Ok(Step::Done(self.make_list(elements, *pos, st)?)),
            Expr::Spread { pos, .. } => Err(NumFuError::at(
                ErrorKind::Syntax,
                "Spread is only valid inside lists and call arguments",
                *pos,
            )),
            Expr::Conditional {
                test,
                then_body,
                else_body,
                ..
            } => {
                let condition = self.eval(test, &st.nested())?;
                let branch = if condition.truthy() {
                    then_body
                } else {
                    else_body
                };
                // Tail position forwards into the chosen branch.
                let mut branch_state = st.clone();
                branch_state.depth += 1;
                self.eval_step(branch, &branch_state)
            }
            Expr::Call { func, args, pos } => self.eval_call(func, args, *pos, st),
            Expr::Index { target, index, pos } => {
                Ok(Step::Done(self.eval_index(target, index, *pos, st)?))
            }
            Expr::Constant { pos, .. } => Err(NumFuError::at(
                ErrorKind::Syntax,
                "Constant definitions must be placed at the top level of the module",
                *pos,
            )),
            Expr::Delete { pos, .. } | Expr::Import { pos, .. } | Expr::Export { pos, .. } => {
                Err(NumFuError::at(
                    ErrorKind::Syntax,
                    "This statement must be placed at the top level of the module",
                    *pos,
                ))
            }
            Expr::Assertion { test, pos } => {
                let value = self.eval(test, &st.nested())?;
                if !value.truthy() {
                    return Err(NumFuError::at(ErrorKind::Assertion, "", *pos));
                }
                Ok(Step::Done(Value::Bool(true)))
            }
        }
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        pos: Pos,
        st: &State,
    ) -> Result<Step, NumFuError> {
        // Short-circuit forms are recognized syntactically.
        if let Expr::Variable { name, .. } = func {
            if args.len() == 2 && (name == "&&" || name == "||") {
                let left = self.eval(&args[0], &st.nested())?;
                let result = if name == "&&" {
                    if left.truthy() {
                        Value::Bool(self.eval(&args[1], &st.nested())?.truthy())
                    } else {
                        Value::Bool(false)
                    }
                } else if left.truthy() {
                    Value::Bool(true)
                } else {
                    Value::Bool(self.eval(&args[1], &st.nested())?.truthy())
                };
                return Ok(Step::Done(result));
            }
        }

        let callee = self.eval(func, &st.nested())?;

        let mut had_spread = false;
        let mut call_args: Vec<Value> = Vec::new();
        for arg in args {
            match arg {
                Expr::Spread { expr, pos } => {
                    had_spread = true;
                    let spread = self.eval(expr, &st.nested())?;
                    match spread {
                        Value::List(l) => call_args.extend(self.list_values(&l)?),
                        other => {
                            return Err(NumFuError::at(
                                ErrorKind::Type,
                                format!("Type '{}' is not iterable", other.type_name()),
                                *pos,
                            ))
                        }
                    }
                }
                _ => call_args.push(self.eval(arg, &st.nested())?),
            }
        }
        if had_spread && call_args.iter().any(Value::is_placeholder) {
            return Err(NumFuError::at(
                ErrorKind::Type,
                "Cannot mix spread arguments with placeholders",
                pos,
            ));
        }

        let args_pos = match (args.first(), args.last()) {
            (Some(first), Some(last)) => Pos::span(&first.pos(), &last.pos()),
            _ => pos,
        };

        match callee {
            Value::Builtin(b) => {
                let result = self.call_builtin(&b, call_args, func.pos(), args_pos)?;
                Ok(Step::Done(result))
            }
            Value::Closure(closure) => {
                if call_args.iter().any(Value::is_placeholder) {
                    return Ok(Step::Done(self.partial_lambda(
                        &closure,
                        &call_args,
                        &st.env,
                    )?));
                }
                if st.tail {
                    return Ok(Step::Bounce {
                        closure,
                        args: call_args,
                        env: st.env.clone(),
                    });
                }
                let result = self.trampoline(closure, call_args, st.env.clone(), st)?;
                Ok(Step::Done(result))
            }
            other => Err(NumFuError::at(
                ErrorKind::Type,
                format!("{} is not callable", other.type_name()),
                pos,
            )),
        }
    }

    /// Builtin invocation, including placeholder partial application and
    /// `eval_lists` materialization.
    fn call_builtin(
        &mut self,
        b: &BuiltinRef,
        args: Vec<Value>,
        func_pos: Pos,
        args_pos: Pos,
    ) -> Result<Value, NumFuError> {
        // Fill the stored pattern's holes left to right, then append.
        let effective: Vec<Value> = match &b.applied {
            Some(pattern) => {
                let mut supplied = args.into_iter();
                let mut merged: Vec<Value> = Vec::new();
                for slot in pattern.iter() {
                    if slot.is_placeholder() {
                        merged.push(supplied.next().unwrap_or(Value::Placeholder));
                    } else {
                        merged.push(slot.clone());
                    }
                }
                merged.extend(supplied);
                merged
            }
            None => args,
        };

        if effective.iter().any(Value::is_placeholder) {
            return Ok(Value::Builtin(BuiltinRef {
                func: b.func.clone(),
                applied: Some(Rc::new(effective)),
            }));
        }

        // Print effects always pass their inner value to builtins; lists
        // are only forced for eval_lists builtins.
        let mut final_args = effective;
        for v in &mut final_args {
            let unwrapped = match v {
                Value::PrintEffect(p) => Some(p.value.clone()),
                _ => None,
            };
            if let Some(inner) = unwrapped {
                *v = inner;
            }
        }
        if b.func.eval_lists {
            for v in &mut final_args {
                let list = match v {
                    Value::List(l) => Some(l.clone()),
                    _ => None,
                };
                if let Some(l) = list {
                    *v = self.materialize(&l)?;
                }
            }
        }

        let func = b.func.clone();
        let result = func.dispatch(self, &final_args, func_pos, args_pos)?;
        self.fire_effect(result)
    }

    /// Emit a fresh print effect exactly once and mark it printed.
    fn fire_effect(&mut self, value: Value) -> Result<Value, NumFuError> {
        match value {
            Value::PrintEffect(p) if !p.printed => {
                let rendered = self.render_value(&p.value, false)?;
                self.write_out(&format!("{}{}", rendered, p.end));
                Ok(Value::PrintEffect(Box::new(PrintEffect {
                    value: p.value,
                    end: p.end,
                    printed: true,
                })))
            }
            v => Ok(v),
        }
    }

    /// The closure-entry loop. Bounces from tail position re-enter here
    /// instead of growing the host stack.
    fn trampoline(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        env_base: Env,
        st: &State,
    ) -> Result<Value, NumFuError> {
        let mut closure = closure;
        let mut args = args;
        let mut env_base = env_base;
        let mut iterations: u64 = 0;
        loop {
            iterations += 1;
            if let Some(limit) = self.iter_depth {
                if iterations > limit {
                    return Err(NumFuError::new(
                        ErrorKind::Recursion,
                        "tail-call recursion limit exceeded",
                    ));
                }
            }

            let arity = closure.arity();
            let has_rest = closure.has_rest();

            if args.len() < closure.required() {
                return self.partial_lambda(&closure, &args, &env_base);
            }

            // Declaration indices are only meaningful inside the module
            // that assigned them.
            let body_index = if closure.module == st.module {
                st.index
            } else {
                None
            };

            if !has_rest && args.len() > arity {
                // Apply what fits, then feed the surplus to the result.
                let surplus = args.split_off(arity);
                let env = self.bind_params(&closure, &args, &env_base);
                let body_state = State {
                    env,
                    module: closure.module.clone(),
                    index: body_index,
                    tail: false,
                    depth: st.depth + 1,
                };
                let result = self.eval(&closure.body, &body_state)?;
                match result {
                    Value::Closure(next) => {
                        closure = next;
                        args = surplus;
                        continue;
                    }
                    Value::Builtin(b) => {
                        return self.call_builtin(&b, surplus, Pos::default(), Pos::default());
                    }
                    other => {
                        return Err(NumFuError::new(
                            ErrorKind::Type,
                            format!(
                                "Cannot apply {} more arguments to non-callable {}",
                                surplus.len(),
                                other.type_name()
                            ),
                        ));
                    }
                }
            }

            let env = self.bind_params(&closure, &args, &env_base);
            let body_state = State {
                env,
                module: closure.module.clone(),
                index: body_index,
                tail: true,
                depth: st.depth + 1,
            };
            match self.eval_step(&closure.body, &body_state)? {
                Step::Done(v) => return Ok(v),
                Step::Bounce {
                    closure: next,
                    args: next_args,
                    env: next_env,
                } => {
                    closure = next;
                    args = next_args;
                    env_base = next_env;
                }
            }
        }
    }

    /// Bind formals to arguments on top of caller ∪ captured. A rest
    /// parameter absorbs the tail into a List.
    fn bind_params(&mut self, closure: &Closure, args: &[Value], env_base: &Env) -> Env {
        let mut env = env_base.merge(&closure.curry);
        match closure.params.iter().position(|p| p.rest) {
            Some(rest_at) => {
                let bindings: Vec<(String, Value)> = closure.params[..rest_at]
                    .iter()
                    .zip(args.iter())
                    .map(|(p, a)| (p.name.clone(), a.clone()))
                    .collect();
                env = env.with_many(bindings);
                let rest_values: Vec<Value> = args.iter().skip(rest_at).cloned().collect();
                let (exprs, curry) = self.lift_many(rest_values, &env);
                let rest_list =
                    Value::List(ListValue::new(exprs, curry.clone(), closure.module.clone()));
                curry.with(closure.params[rest_at].name.clone(), rest_list)
            }
            None => {
                let bindings: Vec<(String, Value)> = closure
                    .params
                    .iter()
                    .zip(args.iter())
                    .map(|(p, a)| (p.name.clone(), a.clone()))
                    .collect();
                env.with_many(bindings)
            }
        }
    }

    /// Partial application of a closure: bind what was supplied, skip
    /// placeholder holes, and return a closure over the remaining
    /// parameters with a filtered reconstruction fragment.
    fn partial_lambda(
        &mut self,
        closure: &Closure,
        args: &[Value],
        env_base: &Env,
    ) -> Result<Value, NumFuError> {
        let mut env = env_base.merge(&closure.curry);
        let mut remaining: Vec<Param> = Vec::new();
        let mut bound: Vec<String> = Vec::new();

        for (i, param) in closure.params.iter().enumerate() {
            match args.get(i) {
                Some(arg) if arg.is_placeholder() => remaining.push(param.clone()),
                Some(arg) => {
                    if param.rest {
                        let items: Vec<Value> = args[i..]
                            .iter()
                            .filter(|a| !a.is_placeholder())
                            .cloned()
                            .collect();
                        let (exprs, curry) = self.lift_many(items, &env);
                        let rest_list = Value::List(ListValue::new(
                            exprs,
                            curry.clone(),
                            closure.module.clone(),
                        ));
                        env = curry.with(param.name.clone(), rest_list);
                        bound.push(param.name.clone());
                        break;
                    }
                    env = env.with(param.name.clone(), arg.clone());
                    bound.push(param.name.clone());
                }
                None => remaining.push(param.clone()),
            }
        }

        let fragment = filter_fragment(&closure.fragment, &bound);
        Ok(Value::Closure(Rc::new(Closure {
            params: remaining,
            body: closure.body.clone(),
            curry: env,
            module: closure.module.clone(),
            fragment,
        })))
    }

    fn make_closure(&mut self, params: &[String], body: &Expr, st: &State) -> Value {
        let fragment = serde_json::to_vec(&Fragment {
            params: params.to_vec(),
            body: body.clone(),
        })
        .unwrap_or_default();
        Value::Closure(Rc::new(Closure {
            params: params.iter().map(|p| Param::parse(p)).collect(),
            body: body.clone(),
            curry: st.env.clone(),
            module: st.module.clone(),
            fragment,
        }))
    }

    /// List construction: snapshot the environment and splice spreads.
    fn make_list(
        &mut self,
        elements: &[Expr],
        _pos: Pos,
        st: &State,
    ) -> Result<Value, NumFuError> {
        let mut curry = st.env.clone();
        let mut out: Vec<Expr> = Vec::new();
        for element in elements {
            match element {
                Expr::Spread { expr, pos } => {
                    let spread = self.eval(expr, &st.nested())?;
                    match spread {
                        Value::List(l) => {
                            let values = self.list_values(&l)?;
                            let (exprs, next) = self.lift_many(values, &curry);
                            curry = next;
                            out.extend(exprs);
                        }
                        other => {
                            return Err(NumFuError::at(
                                ErrorKind::Type,
                                format!("Type '{}' is not iterable", other.type_name()),
                                *pos,
                            ))
                        }
                    }
                }
                _ => out.push(element.clone()),
            }
        }
        Ok(Value::List(ListValue::new(out, curry, st.module.clone())))
    }

    fn eval_index(
        &mut self,
        target: &Expr,
        index: &Expr,
        pos: Pos,
        st: &State,
    ) -> Result<Value, NumFuError> {
        let target_v = self.eval(target, &st.nested())?;
        let index_v = self.eval(index, &st.nested())?;
        let n = match &index_v {
            Value::Number(n) => n,
            other => {
                return Err(NumFuError::at(
                    ErrorKind::Type,
                    format!("List index must be an integer, not '{}'", other.type_name()),
                    index.pos(),
                ))
            }
        };
        if !n.is_integer() {
            return Err(NumFuError::at(
                ErrorKind::Type,
                "List index must be an integer, not a floating-point number",
                index.pos(),
            ));
        }
        let raw = n.to_i64().unwrap_or(i64::MAX);
        match target_v {
            Value::List(l) => {
                let idx = resolve_index(raw, l.len()).ok_or_else(|| {
                    NumFuError::at(ErrorKind::Index, "List index out of range", pos)
                })?;
                let element = l.elements[idx].clone();
                self.eval_in_env(&element, &l.curry, &l.module)
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = resolve_index(raw, chars.len()).ok_or_else(|| {
                    NumFuError::at(ErrorKind::Index, "String index out of range", pos)
                })?;
                Ok(Value::Str(chars[idx].to_string()))
            }
            other => Err(NumFuError::at(
                ErrorKind::Type,
                format!("Type '{}' cannot be indexed", other.type_name()),
                pos,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    fn lookup(&mut self, name: &str, st: &State, pos: Pos) -> Result<Value, NumFuError> {
        if let Some(v) = st.env.get(name) {
            return Ok(v);
        }
        // The placeholder resolves to itself when unbound.
        if name == "_" {
            return Ok(Value::Placeholder);
        }

        let global = self
            .resolver
            .modules
            .get(&st.module)
            .and_then(|m| m.globals.get(name))
            .cloned();
        if let Some(global) = global {
            match global {
                Global::Value(v) => return Ok(v),
                Global::Const { value, index } => {
                    let visible = match st.index {
                        Some(current) => index <= current,
                        None => true,
                    };
                    if visible {
                        let inner = State {
                            env: Env::new(),
                            module: st.module.clone(),
                            index: Some(index),
                            tail: false,
                            depth: st.depth + 1,
                        };
                        return self.eval(&value, &inner);
                    }
                }
            }
        }

        let source = self
            .resolver
            .modules
            .get(&st.module)
            .and_then(|m| m.imports.get(name))
            .cloned();
        if let Some(source) = source {
            let tail = name.split_once('.').map(|(_, t)| t).unwrap_or(name);
            return self.lookup_in_module(&source, tail, st.depth, pos);
        }

        if let Some(v) = self.registry.lookup(name) {
            return Ok(v);
        }

        Err(NumFuError::at(
            ErrorKind::Name,
            format!("'{name}' is not defined in the current scope"),
            pos,
        ))
    }

    /// Imported name: rebind the module context to the source module and
    /// resolve there.
    fn lookup_in_module(
        &mut self,
        module_id: &str,
        name: &str,
        depth: usize,
        pos: Pos,
    ) -> Result<Value, NumFuError> {
        let global = self
            .resolver
            .modules
            .get(module_id)
            .and_then(|m| m.globals.get(name))
            .cloned();
        if let Some(global) = global {
            match global {
                Global::Value(v) => return Ok(v),
                Global::Const { value, index } => {
                    let saved = std::mem::replace(&mut self.ctx_module, module_id.to_string());
                    let inner = State {
                        env: Env::new(),
                        module: module_id.to_string(),
                        index: Some(index),
                        tail: false,
                        depth: depth + 1,
                    };
                    let result = self
                        .eval(&value, &inner)
                        .map_err(|e| e.in_module(module_id));
                    self.ctx_module = saved;
                    return result;
                }
            }
        }
        // Names the module itself re-exports from its own imports.
        let source = self
            .resolver
            .modules
            .get(module_id)
            .and_then(|m| m.imports.get(name))
            .cloned();
        if let Some(source) = source {
            let tail = name.split_once('.').map(|(_, t)| t).unwrap_or(name);
            return self.lookup_in_module(&source, tail, depth + 1, pos);
        }
        if let Some(v) = self.registry.lookup(name) {
            return Ok(v);
        }
        Err(NumFuError::at(
            ErrorKind::Name,
            format!("'{name}' is not defined in the current scope"),
            pos,
        ))
    }

    // ------------------------------------------------------------------
    // Helpers shared with builtins
    // ------------------------------------------------------------------

    pub fn eval_in_env(
        &mut self,
        node: &Expr,
        env: &Env,
        module: &str,
    ) -> Result<Value, NumFuError> {
        let module = if module.is_empty() {
            self.ctx_module.clone()
        } else {
            module.to_string()
        };
        let st = State {
            env: env.clone(),
            module,
            index: None,
            tail: false,
            depth: 0,
        };
        self.eval(node, &st)
    }

    /// Evaluate every element of a list in its capture environment.
    pub fn list_values(&mut self, list: &ListValue) -> Result<Vec<Value>, NumFuError> {
        let mut values = Vec::with_capacity(list.len());
        for element in list.elements.iter() {
            values.push(self.eval_in_env(element, &list.curry, &list.module)?);
        }
        Ok(values)
    }

    /// Fully evaluate a list, recursing into nested lists, producing a
    /// settled copy.
    pub fn materialize(&mut self, list: &ListValue) -> Result<Value, NumFuError> {
        let values = self.list_values(list)?;
        let mut settled = Vec::with_capacity(values.len());
        for v in values {
            settled.push(match v {
                Value::List(inner) => self.materialize(&inner)?,
                Value::PrintEffect(p) => p.value,
                v => v,
            });
        }
        let (exprs, curry) = self.lift_many(settled, &Env::new());
        Ok(Value::List(ListValue::new(
            exprs,
            curry,
            list.module.clone(),
        )))
    }

    /// Embed a runtime value into expression position by binding it under
    /// a synthetic name in the target environment.
    pub fn lift(&mut self, value: Value, env: &Env) -> (Expr, Env) {
        let name = format!("<lit:{}>", self.lit_counter);
        self.lit_counter += 1;
        let extended = env.with(name.clone(), value);
        (
            Expr::Variable {
                name,
                pos: Pos::default(),
            },
            extended,
        )
    }

    pub fn lift_many(&mut self, values: Vec<Value>, env: &Env) -> (Vec<Expr>, Env) {
        let mut exprs = Vec::with_capacity(values.len());
        let mut env = env.clone();
        for v in values {
            let (e, next) = self.lift(v, &env);
            env = next;
            exprs.push(e);
        }
        (exprs, env)
    }

    /// Call a first-class function value with already-evaluated
    /// arguments, as `filter` does for its predicate.
    pub fn call_function(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        env: &Env,
    ) -> Result<Value, NumFuError> {
        match func {
            Value::Closure(c) => {
                let st = State {
                    env: env.clone(),
                    module: self.ctx_module.clone(),
                    index: None,
                    tail: false,
                    depth: 0,
                };
                self.trampoline(c.clone(), args, env.clone(), &st)
            }
            Value::Builtin(b) => {
                let b = b.clone();
                self.call_builtin(&b, args, Pos::default(), Pos::default())
            }
            other => Err(NumFuError::new(
                ErrorKind::Type,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Rendering and output
    // ------------------------------------------------------------------

    pub fn render_value(&mut self, value: &Value, quoted: bool) -> Result<String, NumFuError> {
        Ok(match value {
            Value::Number(n) => n.to_string_prec(self.precision),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Str(s) => {
                if quoted {
                    format!("\"{s}\"")
                } else {
                    s.clone()
                }
            }
            Value::List(l) => {
                let values = self.list_values(l)?;
                let mut parts = Vec::with_capacity(values.len());
                for v in &values {
                    parts.push(self.render_value(v, true)?);
                }
                format!("[{}]", parts.join(", "))
            }
            Value::Closure(c) => {
                let c = c.clone();
                crate::reconstruct::reconstruct(&c, self).unwrap_or_else(|| "{...}".to_string())
            }
            Value::Builtin(b) => b.func.name.clone(),
            Value::PrintEffect(p) => self.render_value(&p.value, quoted)?,
            Value::Placeholder => "_".to_string(),
        })
    }

    /// Best-effort rendering for diagnostic messages.
    pub fn render_for_message(&mut self, value: &Value) -> String {
        self.render_value(value, false)
            .unwrap_or_else(|_| value.type_name().to_string())
    }

    fn write_out(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match &self.out {
            OutputSink::Stdout => {
                use std::io::Write;
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            OutputSink::Capture(buf) => buf.borrow_mut().push_str(text),
        }
        self.line_pending = !text.ends_with('\n');
    }

    /// Render a diagnostic against the source of the module the error
    /// occurred in, falling back to the caller's context.
    pub fn format_error(&self, err: &NumFuError, fallback_path: &str, fallback_code: &str) -> String {
        if let Some(module_id) = &err.module {
            if let Some(module) = self.resolver.modules.get(module_id) {
                let code = crate::error::decompress_code(&module.code);
                return crate::error::report(err, &module.path, &code);
            }
        }
        crate::error::report(err, fallback_path, fallback_code)
    }

    // ------------------------------------------------------------------
    // Randomness
    // ------------------------------------------------------------------

    pub fn next_random(&mut self) -> Number {
        let x: f64 = self.rng.gen();
        Number::parse(&format!("{x:.17}"))
            .unwrap_or_else(Number::zero)
            .round_to(self.precision)
    }

    pub fn seed_from_text(&mut self, text: &str) {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        self.rng = StdRng::seed_from_u64(hasher.finish());
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if i < 0 { len + i } else { i };
    if idx < 0 || idx >= len {
        None
    } else {
        Some(idx as usize)
    }
}

/// Drop the fragment entries for parameters consumed by partial
/// application; a fragment that fails to decode degrades to empty.
fn filter_fragment(fragment: &[u8], bound: &[String]) -> Vec<u8> {
    if fragment.is_empty() {
        return Vec::new();
    }
    let decoded: Fragment = match serde_json::from_slice(fragment) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let params: Vec<String> = decoded
        .params
        .into_iter()
        .filter(|raw| {
            let name = raw.trim_start_matches("...");
            !bound.iter().any(|b| b == name)
        })
        .collect();
    serde_json::to_vec(&Fragment {
        params,
        body: decoded.body,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> Vec<String> {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        interp.run_source(code, "test.nfu", false).expect("run")
    }

    fn run_err(code: &str) -> NumFuError {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        interp.run_source(code, "test.nfu", false).expect_err("err")
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run("(1 + 2) * 3"), vec!["9"]);
        assert_eq!(run("1 + 2 * 3"), vec!["7"]);
        assert_eq!(run("2 ^ 10"), vec!["1024"]);
    }

    #[test]
    fn test_let_and_lambda() {
        assert_eq!(run("let x = 3 in x * x"), vec!["9"]);
        assert_eq!(run("{a, b -> a + b}(2, 3)"), vec!["5"]);
    }

    #[test]
    fn test_recursion_via_let() {
        let code = "let fact = {n -> if n <= 1 then 1 else n * fact(n - 1)} in fact(10)";
        assert_eq!(run(code), vec!["3628800"]);
    }

    #[test]
    fn test_tail_recursion_does_not_overflow() {
        let code =
            "let loop = {n, acc -> if n == 0 then acc else loop(n - 1, acc + n)} in loop(100000, 0)";
        assert_eq!(run(code), vec!["5000050000"]);
    }

    #[test]
    fn test_iter_depth_limit() {
        let mut interp = Interpreter::with_capture(15, 10000, Some(10));
        let err = interp
            .run_source(
                "let loop = {n -> if n == 0 then 0 else loop(n - 1)} in loop(100)",
                "test.nfu",
                false,
            )
            .expect_err("limit");
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert!(err.message.contains("tail-call"), "{}", err.message);
    }

    #[test]
    fn test_host_recursion_limit() {
        let mut interp = Interpreter::with_capture(15, 200, None);
        let err = interp
            .run_source(
                "let f = {n -> if n == 0 then 0 else 1 + f(n - 1)} in f(100000)",
                "test.nfu",
                false,
            )
            .expect_err("depth");
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert!(err.message.contains("maximum recursion"), "{}", err.message);
    }

    #[test]
    fn test_currying_and_placeholder() {
        assert_eq!(run("let add = {a, b -> a + b} in add(_, 5)(3)"), vec!["8"]);
        assert_eq!(run("let add = {a, b -> a + b} in add(3)(5)"), vec!["8"]);
        assert_eq!(run("let add = {a, b, c -> a + b + c} in add(_, 2, _)(1, 3)"), vec!["6"]);
    }

    #[test]
    fn test_placeholder_on_builtin() {
        assert_eq!(run("let atLeast2 = max(_, 2) in atLeast2(10)"), vec!["10"]);
        assert_eq!(run("map([1, 2, 3], max(_, 2)) |> sum"), vec!["7"]);
    }

    #[test]
    fn test_partial_builtin_stays_partial() {
        assert_eq!(run("let f = set(_, _, 9) in f([1, 2], _)(0)[0]"), vec!["9"]);
    }

    #[test]
    fn test_spread_expansion() {
        assert_eq!(run("let xs = [2, 3] in sum([1, ...xs, 4])"), vec!["10"]);
        assert_eq!(run("let add3 = {a, b, c -> a + b + c}, xs = [1, 2, 3] in add3(...xs)"), vec!["6"]);
    }

    #[test]
    fn test_spread_placeholder_mix_rejected() {
        let err = run_err("let f = {a, b, c -> a}, xs = [1, 2] in f(_, ...xs)");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("spread"), "{}", err.message);
    }

    #[test]
    fn test_short_circuit() {
        // The right side would raise if evaluated.
        assert_eq!(run("false && error(\"boom\")"), vec!["false"]);
        assert_eq!(run("true || error(\"boom\")"), vec!["true"]);
        assert_eq!(run("true && false"), vec!["false"]);
        assert_eq!(run("false || true"), vec!["true"]);
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(run("if 0 == 0 < 1 then \"ok\" else \"no\""), vec!["ok"]);
        assert_eq!(run("1 < 2 < 3"), vec!["true"]);
        assert_eq!(run("1 < 2 > 3"), vec!["false"]);
    }

    #[test]
    fn test_pipes() {
        assert_eq!(run("[1, 2, 3, 4] |> map({x -> x * x}) |> sum"), vec!["30"]);
    }

    #[test]
    fn test_list_indexing() {
        assert_eq!(run("[10, 20, 30][1]"), vec!["20"]);
        assert_eq!(run("[10, 20, 30][-1]"), vec!["30"]);
        assert_eq!(run("\"hello\"[1]"), vec!["e"]);
        assert_eq!(run("\"hello\"[-1]"), vec!["o"]);
    }

    #[test]
    fn test_index_errors() {
        assert_eq!(run_err("[1, 2][5]").kind, ErrorKind::Index);
        assert_eq!(run_err("[1, 2][0.5]").kind, ErrorKind::Type);
        assert_eq!(run_err("[1, 2][\"a\"]").kind, ErrorKind::Type);
    }

    #[test]
    fn test_list_captures_environment() {
        assert_eq!(run("let x = 5 in [x, x + 1][1]"), vec!["6"]);
        // Later statements cannot disturb a captured snapshot.
        assert_eq!(
            run("let xs = {y -> [y, y * 2]}(7) in xs[1]"),
            vec!["14"]
        );
    }

    #[test]
    fn test_rest_parameters() {
        assert_eq!(run("{a, ...rest -> length(rest)}(1, 2, 3, 4)"), vec!["3"]);
        assert_eq!(run("{a, ...rest -> a}(1)"), vec!["1"]);
        assert_eq!(run("{...xs -> sum(xs)}(1, 2, 3)"), vec!["6"]);
    }

    #[test]
    fn test_over_application() {
        assert_eq!(run("{a -> {b -> a + b}}(1, 2)"), vec!["3"]);
    }

    #[test]
    fn test_not_callable() {
        let err = run_err("5(1)");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("not callable"), "{}", err.message);
    }

    #[test]
    fn test_name_error() {
        let err = run_err("nosuch + 1");
        assert_eq!(err.kind, ErrorKind::Name);
        assert!(err.message.contains("nosuch"), "{}", err.message);
    }

    #[test]
    fn test_print_effects() {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        let results = interp
            .run_source("print(\"hi\"); 2 + 2", "test.nfu", true)
            .expect("run");
        assert_eq!(results, vec!["4"]);
        assert_eq!(interp.captured_output().unwrap(), "hi\n4\n");
    }

    #[test]
    fn test_println_not_double_printed() {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        interp
            .run_source("println(\"once\")", "test.nfu", true)
            .expect("run");
        assert_eq!(interp.captured_output().unwrap(), "once\n");
    }

    #[test]
    fn test_nested_print_effect_fires_once() {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        let results = interp
            .run_source("let x = println(3) in 1 + x", "test.nfu", true)
            .expect("run");
        // The effect fires when println is evaluated; the value flows on.
        assert_eq!(interp.captured_output().unwrap(), "3\n4\n");
        assert_eq!(results, vec!["4"]);
    }

    #[test]
    fn test_constants_and_predeclaration() {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        let results = interp
            .run_source("let a = 2\nlet b = a * 3\nb + 1", "test.nfu", false)
            .expect("run");
        assert_eq!(results, vec!["7"]);

        let mut interp = Interpreter::with_capture(15, 10000, None);
        let err = interp
            .run_source("later + 1\nlet later = 5", "test.nfu", false)
            .expect_err("predeclaration");
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn test_delete_removes_global() {
        let err = run_err("let a = 1\ndel a\na");
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn test_assert_builtin() {
        assert_eq!(run("assert(1 < 2)"), vec!["true"]);
        assert_eq!(run("assert(true, 42)"), vec!["42"]);
        let err = run_err("assert(1 > 2)");
        assert_eq!(err.kind, ErrorKind::Assertion);
    }

    #[test]
    fn test_user_error_with_name() {
        let err = run_err("error(\"went wrong\")");
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.message, "went wrong");

        let err = run_err("error(\"oops\", \"MyError\")");
        assert_eq!(err.display_name(), "MyError");
    }

    #[test]
    fn test_equality_rules() {
        assert_eq!(run("1 == 1.0"), vec!["true"]);
        assert_eq!(run("\"1\" == 1"), vec!["false"]);
        assert_eq!(run("[1, 2] == [1, 2]"), vec!["true"]);
        assert_eq!(run("[1, 2] == [1, 3]"), vec!["false"]);
        assert_eq!(run("nan == nan"), vec!["false"]);
        assert_eq!(run("-0 == 0"), vec!["true"]);
    }

    #[test]
    fn test_constants_render_by_name() {
        assert_eq!(run("pi"), vec!["pi"]);
        assert_eq!(run("e"), vec!["e"]);
        let two_pi = run("2 * pi");
        assert!(two_pi[0].starts_with("6.28"), "{:?}", two_pi);
    }

    #[test]
    fn test_operator_type_error_message() {
        let err = run_err("1 + \"a\"");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(
            err.message.contains("operator '+'"),
            "{}",
            err.message
        );
    }

    #[test]
    fn test_multiply_two_strings_message() {
        let err = run_err("\"a\" * \"b\"");
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Cannot multiply two strings");
    }

    #[test]
    fn test_validator_message() {
        let err = run_err("\"ab\" * 1.5");
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Can't multiply by non-integer");
    }

    #[test]
    fn test_string_and_format() {
        assert_eq!(run("String(42)"), vec!["42"]);
        assert_eq!(run("String(true)"), vec!["true"]);
        assert_eq!(run("format(\"{} + {}\", \"1\", \"2\")"), vec!["1 + 2"]);
        let err = run_err("format(\"{} {}\", \"only\")");
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(err.message, "Incorrect number of placeholders");
    }

    #[test]
    fn test_filter_and_range() {
        assert_eq!(
            run("range(0, 10) |> filter({x -> x % 2 == 0}) |> sum"),
            vec!["20"]
        );
        assert_eq!(run("length(range(3, 3))"), vec!["0"]);
    }

    #[test]
    fn test_set_builtin() {
        assert_eq!(run("set([1, 2, 3], 1, 9)[1]"), vec!["9"]);
        let err = run_err("set([1, 2], 5, 0)");
        assert_eq!(err.kind, ErrorKind::Index);
    }

    #[test]
    fn test_math_group_import() {
        assert_eq!(run("import math\nmath.sqrt(9)"), vec!["3"]);
        assert_eq!(run("from math import sqrt\nsqrt(16)"), vec!["4"]);
    }

    #[test]
    fn test_std_module() {
        assert_eq!(
            run("from std import fold\nfold([1, 2, 3], 0, {acc, x -> acc + x})"),
            vec!["6"]
        );
        assert_eq!(
            run("from std import compose\ncompose({x -> x + 1}, {x -> x * 2})(5)"),
            vec!["12"]
        );
    }

    #[test]
    fn test_closure_rendering() {
        let out = run("{x -> x + 1}");
        assert_eq!(out, vec!["{x -> x + 1}"]);
    }

    #[test]
    fn test_partial_closure_rendering() {
        let out = run("let add = {a, b -> a + b} in add(1, _)");
        assert_eq!(out, vec!["{b -> 1 + b}"]);
    }

    #[test]
    fn test_placeholder_invariance() {
        // Filling placeholders in order equals direct application.
        let direct = run("{a, b, c -> a * 100 + b * 10 + c}(1, 2, 3)");
        let partial = run("{a, b, c -> a * 100 + b * 10 + c}(_, 2, _)(1, 3)");
        assert_eq!(direct, partial);
    }

    #[test]
    fn test_xor_and_not() {
        assert_eq!(run("xor(true, false)"), vec!["true"]);
        assert_eq!(run("xor(true, true)"), vec!["false"]);
        assert_eq!(run("!true"), vec!["false"]);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(run("max(1, 5, 3)"), vec!["5"]);
        assert_eq!(run("min([4, 2, 8])"), vec!["2"]);
        assert_eq!(run("max([1, 2, 3])"), vec!["3"]);
    }

    #[test]
    fn test_sort_and_reverse() {
        assert_eq!(run("sort([3, 1, 2])"), vec!["[1, 2, 3]"]);
        assert_eq!(run("reverse([1, 2, 3])"), vec!["[3, 2, 1]"]);
        assert_eq!(run("reverse(\"abc\")"), vec!["cba"]);
    }

    #[test]
    fn test_string_rendering_in_lists() {
        assert_eq!(run("[\"a\", 1]"), vec!["[\"a\", 1]"]);
        assert_eq!(run("\"plain\""), vec!["plain"]);
    }

    #[test]
    fn test_number_conversion() {
        assert_eq!(run("Number(\"--3\")"), vec!["3"]);
        assert_eq!(run("Number(\"-0\")"), vec!["0"]);
        assert_eq!(run("Number(true)"), vec!["1"]);
        let err = run_err("Number(\"abc\")");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("abc"), "{}", err.message);
    }

    #[test]
    fn test_division_conventions() {
        assert_eq!(run("1 / 0"), vec!["inf"]);
        assert_eq!(run("-1 / 0"), vec!["-inf"]);
        assert_eq!(run("0 / 0"), vec!["nan"]);
    }

    #[test]
    fn test_repl_style_accumulation() {
        let mut interp = Interpreter::with_capture(15, 10000, None);
        interp.run_source("let a = 10", "REPL", false).expect("line 1");
        let out = interp.run_source("a * 2", "REPL", false).expect("line 2");
        assert_eq!(out, vec!["20"]);
    }

    #[test]
    fn test_arity_error_message() {
        let err = run_err("from math import sqrt\nsqrt(1, 2)");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("expected 1 argument"), "{}", err.message);
    }
}
