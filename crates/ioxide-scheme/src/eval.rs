use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace};

use crate::builtins;
use crate::context::ExtensionContext;
use crate::env::Env;
use crate::error::{Result, SchemeError};
use crate::reader::Reader;
use crate::value::{Builtin, BuiltinFn, Lambda, Pair, Value};

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Nesting limit for non-tail evaluation, read data and printed structure
pub(crate) const MAX_DEPTH: usize = 400;

/// Result of evaluating one step of an expression
enum Step {
    Return(Value),
    TailCall(Value, Env),
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// One independent interpreter instance.
///
/// Always lives in an `Rc` so native callbacks can hold a weak reference to
/// it. Its [`ExtensionContext`] is private to this instance.
pub struct Interpreter {
    me: Weak<Interpreter>,
    serial: u32,
    global: Env,
    context: ExtensionContext,
    output: RefCell<Box<dyn Write>>,
    depth: Cell<usize>,
    shut_down: Cell<bool>,
}

fn syntax(form: &str, message: &str) -> SchemeError {
    SchemeError::Syntax(format!("{form}: {message}"))
}

fn form_args(form: &str, rest: &Value) -> Result<Vec<Value>> {
    rest.list_to_vec()
        .ok_or_else(|| syntax(form, "improper form"))
}

fn symbol_of(form: &str, value: &Value) -> Result<Rc<str>> {
    match value {
        Value::Symbol(name) => Ok(name.clone()),
        other => Err(syntax(form, &format!("expected a symbol, got {other}"))),
    }
}

/// Parse a lambda list: `(a b)`, `(a . rest)` or `args`
fn parse_params(form: &str, formals: &Value) -> Result<(Vec<Rc<str>>, Option<Rc<str>>)> {
    let mut params = Vec::new();
    let mut cursor = formals;
    loop {
        match cursor {
            Value::Nil => return Ok((params, None)),
            Value::Symbol(rest) => return Ok((params, Some(rest.clone()))),
            Value::Pair(pair) => {
                params.push(symbol_of(form, &pair.car)?);
                cursor = &pair.cdr;
            }
            other => return Err(syntax(form, &format!("bad parameter list {other}"))),
        }
    }
}

impl Lambda {
    fn bind(&self, args: Vec<Value>) -> Result<Env> {
        let arity_ok = match self.rest {
            Some(_) => args.len() >= self.params.len(),
            None => args.len() == self.params.len(),
        };
        if !arity_ok {
            return Err(SchemeError::Arity {
                procedure: self
                    .name
                    .as_deref()
                    .unwrap_or("#<closure>")
                    .to_string(),
                expected: match self.rest {
                    Some(_) => format!("at least {}", self.params.len()),
                    None => self.params.len().to_string(),
                },
                got: args.len(),
            });
        }

        let env = self.env.extend();
        let mut args = args.into_iter();
        for param in &self.params {
            if let Some(arg) = args.next() {
                env.define(param.clone(), arg);
            }
        }
        if let Some(rest) = &self.rest {
            env.define(rest.clone(), Value::list(args.collect::<Vec<_>>()));
        }
        Ok(env)
    }
}

impl Interpreter {
    /// Create an interpreter with the core builtins bound
    pub fn new() -> Rc<Self> {
        let interp = Rc::new_cyclic(|me| Interpreter {
            me: me.clone(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            global: Env::new(),
            context: ExtensionContext::new(),
            output: RefCell::new(Box::new(io::stdout())),
            depth: Cell::new(0),
            shut_down: Cell::new(false),
        });
        builtins::install(&interp);
        debug!(target: "scheme", "Created interpreter {}", interp.serial);
        interp
    }

    /// Create an interpreter with the core builtins and every extension
    /// function (`iox-*`, `tcp-*`, `lfn-*` and the miscellaneous ones) bound
    pub fn with_extensions() -> Rc<Self> {
        let interp = Self::new();
        crate::funcs::install(&interp);
        interp
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub(crate) fn weak(&self) -> Weak<Interpreter> {
        self.me.clone()
    }

    pub fn context(&self) -> &ExtensionContext {
        &self.context
    }

    pub fn global(&self) -> &Env {
        &self.global
    }

    pub fn define(&self, name: &str, value: Value) {
        self.global.define(Rc::from(name), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.global.get(name)
    }

    /// Bind a native function in the global environment
    pub fn define_builtin(
        &self,
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        func: BuiltinFn,
    ) {
        let builtin = Builtin {
            name,
            min_args,
            max_args,
            func,
        };
        self.define(name, Value::Builtin(Rc::new(builtin)));
    }

    /// Replace the port that `display`, `write` and `newline` print to
    pub fn set_output(&self, output: Box<dyn Write>) {
        *self.output.borrow_mut() = output;
    }

    /// Flush and detach the output port; later output is discarded
    pub fn close_output(&self) {
        let mut output = self.output.borrow_mut();
        let _ = output.flush();
        *output = Box::new(io::sink());
    }

    pub fn write_output(&self, text: &str) -> Result<()> {
        let mut output = self.output.borrow_mut();
        output.write_all(text.as_bytes())?;
        output.flush()?;
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    /// Evaluate every expression in `source` at top level, returning the
    /// value of the last one
    pub fn eval_str(&self, source: &str) -> Result<Value> {
        if self.is_shut_down() {
            return Err(SchemeError::ShutDown);
        }
        let mut reader = Reader::new(source);
        let mut last = Value::Unspecified;
        while let Some(expr) = reader.next_datum()? {
            last = self.eval(&expr, &self.global)?;
        }
        Ok(last)
    }

    pub fn load_file(&self, path: &Path) -> Result<Value> {
        let source = std::fs::read_to_string(path).map_err(|source| SchemeError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(target: "scheme", "Loading {}", path.display());
        self.eval_str(&source)
    }

    fn enter(&self) -> Result<DepthGuard<'_>> {
        let depth = self.depth.get();
        if depth >= MAX_DEPTH {
            return Err(SchemeError::RecursionLimit);
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard(&self.depth))
    }

    /// Call a procedure value with already evaluated arguments
    pub fn apply(&self, func: &Value, args: Vec<Value>) -> Result<Value> {
        match func {
            Value::Builtin(builtin) => builtin.call(self, &args),
            Value::Lambda(lambda) => {
                let env = lambda.bind(args)?;
                match self.eval_body(&lambda.body, env)? {
                    Step::Return(value) => Ok(value),
                    Step::TailCall(expr, env) => self.eval(&expr, &env),
                }
            }
            other => Err(SchemeError::NotProcedure(other.to_string())),
        }
    }

    pub fn eval(&self, expr: &Value, env: &Env) -> Result<Value> {
        let _guard = self.enter()?;
        let mut expr = expr.clone();
        let mut env = env.clone();
        loop {
            let pair = match &expr {
                Value::Symbol(name) => return env.lookup(name),
                Value::Pair(pair) => pair.clone(),
                _ => return Ok(expr),
            };

            let step = match self.special_form(&pair, &env)? {
                Some(step) => step,
                None => self.application(&pair, &env)?,
            };
            match step {
                Step::Return(value) => return Ok(value),
                Step::TailCall(next, next_env) => {
                    expr = next;
                    env = next_env;
                }
            }
        }
    }

    fn eval_body(&self, body: &[Value], env: Env) -> Result<Step> {
        let Some((last, init)) = body.split_last() else {
            return Ok(Step::Return(Value::Unspecified));
        };
        for expr in init {
            self.eval(expr, &env)?;
        }
        Ok(Step::TailCall(last.clone(), env))
    }

    fn application(&self, pair: &Pair, env: &Env) -> Result<Step> {
        let func = self.eval(&pair.car, env)?;
        let arg_exprs = form_args("application", &pair.cdr)?;
        let args = arg_exprs
            .iter()
            .map(|arg| self.eval(arg, env))
            .collect::<Result<Vec<_>>>()?;

        match &func {
            Value::Lambda(lambda) => {
                trace!(target: "scheme", "Calling {}", func);
                let env = lambda.bind(args)?;
                self.eval_body(&lambda.body, env)
            }
            Value::Builtin(builtin) => builtin.call(self, &args).map(Step::Return),
            other => Err(SchemeError::NotProcedure(other.to_string())),
        }
    }

    fn make_lambda(
        &self,
        name: Option<Rc<str>>,
        formals: &Value,
        body: &[Value],
        env: &Env,
    ) -> Result<Value> {
        let (params, rest) = parse_params("lambda", formals)?;
        if body.is_empty() {
            return Err(syntax("lambda", "empty body"));
        }
        Ok(Value::Lambda(Rc::new(Lambda {
            name,
            params,
            rest,
            body: Rc::from(body),
            env: env.clone(),
        })))
    }

    fn special_form(&self, pair: &Pair, env: &Env) -> Result<Option<Step>> {
        let Some(head) = pair.car.as_symbol() else {
            return Ok(None);
        };

        let step = match head {
            "quote" => {
                let args = form_args(head, &pair.cdr)?;
                let [datum] = args.as_slice() else {
                    return Err(syntax(head, "expected one datum"));
                };
                Step::Return(datum.clone())
            }
            "quasiquote" => {
                let args = form_args(head, &pair.cdr)?;
                let [template] = args.as_slice() else {
                    return Err(syntax(head, "expected one template"));
                };
                Step::Return(self.quasiquote(template, env)?)
            }
            "if" => {
                let args = form_args(head, &pair.cdr)?;
                let (test, consequent, alternative) = match args.as_slice() {
                    [test, consequent] => (test, consequent, None),
                    [test, consequent, alternative] => (test, consequent, Some(alternative)),
                    _ => return Err(syntax(head, "expected (if test then [else])")),
                };
                if self.eval(test, env)?.is_true() {
                    Step::TailCall(consequent.clone(), env.clone())
                } else {
                    match alternative {
                        Some(alternative) => Step::TailCall(alternative.clone(), env.clone()),
                        None => Step::Return(Value::Unspecified),
                    }
                }
            }
            "define" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((target, rest)) = args.split_first() else {
                    return Err(syntax(head, "missing name"));
                };
                match target {
                    Value::Symbol(name) => {
                        let value = match rest {
                            [] => Value::Unspecified,
                            [expr] => self.eval(expr, env)?,
                            _ => return Err(syntax(head, "too many expressions")),
                        };
                        let value = match value {
                            Value::Lambda(lambda) if lambda.name.is_none() => {
                                Value::Lambda(Rc::new(Lambda {
                                    name: Some(name.clone()),
                                    params: lambda.params.clone(),
                                    rest: lambda.rest.clone(),
                                    body: lambda.body.clone(),
                                    env: lambda.env.clone(),
                                }))
                            }
                            other => other,
                        };
                        env.define(name.clone(), value);
                        Step::Return(Value::Symbol(name.clone()))
                    }
                    Value::Pair(signature) => {
                        let name = symbol_of(head, &signature.car)?;
                        let lambda = self.make_lambda(Some(name.clone()), &signature.cdr, rest, env)?;
                        env.define(name.clone(), lambda);
                        Step::Return(Value::Symbol(name))
                    }
                    other => return Err(syntax(head, &format!("cannot define {other}"))),
                }
            }
            "set!" => {
                let args = form_args(head, &pair.cdr)?;
                let [target, expr] = args.as_slice() else {
                    return Err(syntax(head, "expected (set! name value)"));
                };
                let name = symbol_of(head, target)?;
                let value = self.eval(expr, env)?;
                env.set(&name, value)?;
                Step::Return(Value::Unspecified)
            }
            "lambda" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((formals, body)) = args.split_first() else {
                    return Err(syntax(head, "missing parameter list"));
                };
                Step::Return(self.make_lambda(None, formals, body, env)?)
            }
            "begin" => {
                let body = form_args(head, &pair.cdr)?;
                self.eval_body(&body, env.clone())?
            }
            "let" => self.eval_let(pair, env)?,
            "let*" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((bindings, body)) = args.split_first() else {
                    return Err(syntax(head, "missing bindings"));
                };
                let mut scope = env.clone();
                for (name, expr) in self.bindings(head, bindings)? {
                    let value = self.eval(&expr, &scope)?;
                    scope = scope.extend();
                    scope.define(name, value);
                }
                self.eval_body(body, scope)?
            }
            "letrec" | "letrec*" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((bindings, body)) = args.split_first() else {
                    return Err(syntax(head, "missing bindings"));
                };
                let scope = env.extend();
                let bindings = self.bindings(head, bindings)?;
                for (name, _) in &bindings {
                    scope.define(name.clone(), Value::Unspecified);
                }
                for (name, expr) in bindings {
                    let value = self.eval(&expr, &scope)?;
                    scope.define(name, value);
                }
                self.eval_body(body, scope)?
            }
            "cond" => {
                let clauses = form_args(head, &pair.cdr)?;
                let mut chosen = Step::Return(Value::Unspecified);
                for clause in clauses {
                    let parts = form_args(head, &clause)?;
                    let Some((test, body)) = parts.split_first() else {
                        return Err(syntax(head, "empty clause"));
                    };
                    let result = match test.as_symbol() {
                        Some("else") => Value::Bool(true),
                        _ => self.eval(test, env)?,
                    };
                    if result.is_true() {
                        chosen = if body.is_empty() {
                            Step::Return(result)
                        } else {
                            self.eval_body(body, env.clone())?
                        };
                        break;
                    }
                }
                chosen
            }
            "case" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((key, clauses)) = args.split_first() else {
                    return Err(syntax(head, "missing key"));
                };
                let key = self.eval(key, env)?;
                let mut chosen = Step::Return(Value::Unspecified);
                for clause in clauses {
                    let parts = form_args(head, clause)?;
                    let Some((data, body)) = parts.split_first() else {
                        return Err(syntax(head, "empty clause"));
                    };
                    let matched = match data {
                        Value::Symbol(name) if name.as_ref() == "else" => true,
                        data => form_args(head, data)?.iter().any(|datum| datum.eqv(&key)),
                    };
                    if matched {
                        chosen = self.eval_body(body, env.clone())?;
                        break;
                    }
                }
                chosen
            }
            "and" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((last, init)) = args.split_last() else {
                    return Ok(Some(Step::Return(Value::Bool(true))));
                };
                for expr in init {
                    let value = self.eval(expr, env)?;
                    if !value.is_true() {
                        return Ok(Some(Step::Return(value)));
                    }
                }
                Step::TailCall(last.clone(), env.clone())
            }
            "or" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((last, init)) = args.split_last() else {
                    return Ok(Some(Step::Return(Value::Bool(false))));
                };
                for expr in init {
                    let value = self.eval(expr, env)?;
                    if value.is_true() {
                        return Ok(Some(Step::Return(value)));
                    }
                }
                Step::TailCall(last.clone(), env.clone())
            }
            "when" | "unless" => {
                let args = form_args(head, &pair.cdr)?;
                let Some((test, body)) = args.split_first() else {
                    return Err(syntax(head, "missing test"));
                };
                let passed = self.eval(test, env)?.is_true();
                if passed == (head == "when") {
                    self.eval_body(body, env.clone())?
                } else {
                    Step::Return(Value::Unspecified)
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(step))
    }

    fn bindings(&self, form: &str, formals: &Value) -> Result<Vec<(Rc<str>, Value)>> {
        form_args(form, formals)?
            .iter()
            .map(|binding| match form_args(form, binding)?.as_slice() {
                [name, expr] => Ok((symbol_of(form, name)?, expr.clone())),
                _ => Err(syntax(form, "bad binding")),
            })
            .collect()
    }

    fn eval_let(&self, pair: &Pair, env: &Env) -> Result<Step> {
        let args = form_args("let", &pair.cdr)?;
        match args.as_slice() {
            // Named let: (let loop ((var init) ...) body ...)
            [Value::Symbol(name), bindings, body @ ..] => {
                let bindings = self.bindings("let", bindings)?;
                let scope = env.extend();
                let formals = Value::list(
                    bindings
                        .iter()
                        .map(|(var, _)| Value::Symbol(var.clone()))
                        .collect::<Vec<_>>(),
                );
                let lambda = self.make_lambda(Some(name.clone()), &formals, body, &scope)?;
                scope.define(name.clone(), lambda.clone());
                let values = bindings
                    .iter()
                    .map(|(_, expr)| self.eval(expr, env))
                    .collect::<Result<Vec<_>>>()?;
                let Value::Lambda(lambda) = lambda else {
                    return Err(syntax("let", "bad loop"));
                };
                let call_env = lambda.bind(values)?;
                self.eval_body(&lambda.body, call_env)
            }
            [bindings, body @ ..] => {
                let bindings = self.bindings("let", bindings)?;
                let scope = env.extend();
                for (name, expr) in bindings {
                    let value = self.eval(&expr, env)?;
                    scope.define(name, value);
                }
                self.eval_body(body, scope)
            }
            [] => Err(syntax("let", "missing bindings")),
        }
    }

    fn quasiquote(&self, template: &Value, env: &Env) -> Result<Value> {
        let Value::Pair(pair) = template else {
            return Ok(template.clone());
        };
        if pair.car.as_symbol() == Some("unquote") {
            let args = form_args("unquote", &pair.cdr)?;
            let [expr] = args.as_slice() else {
                return Err(syntax("unquote", "expected one expression"));
            };
            return self.eval(expr, env);
        }

        let _guard = self.enter()?;
        let mut items = Vec::new();
        let mut cursor = template;
        let tail = loop {
            let Value::Pair(pair) = cursor else {
                break cursor.clone();
            };
            // `(a . ,b)` reads as `(a unquote b)`
            if pair.car.as_symbol() == Some("unquote") {
                break self.quasiquote(cursor, env)?;
            }
            match &pair.car {
                Value::Pair(inner) if inner.car.as_symbol() == Some("unquote-splicing") => {
                    let args = form_args("unquote-splicing", &inner.cdr)?;
                    let [expr] = args.as_slice() else {
                        return Err(syntax("unquote-splicing", "expected one expression"));
                    };
                    let spliced = self.eval(expr, env)?;
                    let spliced = spliced
                        .list_to_vec()
                        .ok_or_else(|| syntax("unquote-splicing", "value is not a list"))?;
                    items.extend(spliced);
                }
                car => items.push(self.quasiquote(car, env)?),
            }
            cursor = &pair.cdr;
        };
        Ok(items
            .into_iter()
            .rev()
            .fold(tail, |rest, item| Value::cons(item, rest)))
    }

    /// Cancel every watch this interpreter registered, then release its
    /// handles, protected values and global bindings. Safe to call twice.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }

        let watches = self.context.handles().live_watches();
        debug!(
            target: "scheme",
            "Shutting down interpreter {} ({} watch(es) to cancel)",
            self.serial,
            watches.len()
        );
        for (dispatcher, id) in watches {
            if let Err(err) = dispatcher.cancel(id) {
                debug!(target: "scheme", "Could not cancel watch {}: {}", id, err);
            }
        }

        self.context.clear();
        self.close_output();
        self.global.clear();
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("serial", &self.serial)
            .field("globals", &self.global.len())
            .field("protected", &self.context.protected_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Value {
        let interp = Interpreter::new();
        interp.eval_str(source).unwrap()
    }

    fn eval_string(source: &str) -> String {
        eval(source).to_string()
    }

    #[test]
    fn test_arithmetic_and_define() {
        assert_eq!(eval_string("(define x 6) (* x 7)"), "42");
        assert_eq!(eval_string("(define (square n) (* n n)) (square 9)"), "81");
        assert_eq!(eval_string("(define x 1)"), "x");
    }

    #[test]
    fn test_closures_capture_environment() {
        let source = "
            (define (make-counter)
              (let ((count 0))
                (lambda () (set! count (+ count 1)) count)))
            (define c (make-counter))
            (c) (c) (c)";
        assert_eq!(eval_string(source), "3");
    }

    #[test]
    fn test_tail_calls_do_not_grow_the_stack() {
        let source = "
            (define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1))))
            (loop 100000 0)";
        assert_eq!(eval_string(source), "100000");
    }

    #[test]
    fn test_named_let_and_cond() {
        let source = "
            (let loop ((i 0) (acc '()))
              (cond ((= i 3) acc)
                    (else (loop (+ i 1) (cons i acc)))))";
        assert_eq!(eval_string(source), "(2 1 0)");
    }

    #[test]
    fn test_let_forms() {
        assert_eq!(eval_string("(let ((a 1) (b 2)) (+ a b))"), "3");
        assert_eq!(eval_string("(let* ((a 1) (b (+ a 1))) b)"), "2");
        assert_eq!(
            eval_string("(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1))))) (odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))) (even? 10))"),
            "#t"
        );
    }

    #[test]
    fn test_logic_forms() {
        assert_eq!(eval_string("(and 1 2 3)"), "3");
        assert_eq!(eval_string("(and 1 #f 3)"), "#f");
        assert_eq!(eval_string("(or #f 2)"), "2");
        assert_eq!(eval_string("(or)"), "#f");
        assert_eq!(eval_string("(when #t 1 2)"), "2");
        assert_eq!(eval_string("(unless #t 1)"), "#<unspecified>");
        assert_eq!(eval_string("(case 2 ((1) 'one) ((2 3) 'few) (else 'many))"), "few");
    }

    #[test]
    fn test_quasiquote() {
        assert_eq!(eval_string("(define b 2) (define c '(3 4)) `(a ,b ,@c)"), "(a 2 3 4)");
        assert_eq!(eval_string("`(1 . ,(+ 1 1))"), "(1 . 2)");
    }

    #[test]
    fn test_variadic_lambdas() {
        assert_eq!(eval_string("((lambda args args) 1 2)"), "(1 2)");
        assert_eq!(eval_string("((lambda (a . rest) rest) 1 2 3)"), "(2 3)");
    }

    #[test]
    fn test_errors() {
        let interp = Interpreter::new();
        assert!(matches!(interp.eval_str("undefined-name"), Err(SchemeError::Unbound(_))));
        assert!(matches!(interp.eval_str("(1 2)"), Err(SchemeError::NotProcedure(_))));
        assert!(matches!(
            interp.eval_str("((lambda (a) a))"),
            Err(SchemeError::Arity { .. })
        ));
        assert!(matches!(interp.eval_str("(if)"), Err(SchemeError::Syntax(_))));
        assert!(matches!(
            interp.eval_str("(define (deep n) (+ 1 (deep n))) (deep 1)"),
            Err(SchemeError::RecursionLimit)
        ));
        // Still usable after errors
        assert_eq!(interp.eval_str("(+ 1 1)").unwrap().to_string(), "2");
    }

    #[test]
    fn test_apply_from_native_code() {
        let interp = Interpreter::new();
        let func = interp.eval_str("(lambda (a b) (list b a))").unwrap();
        let result = interp.apply(&func, vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(result.to_string(), "(2 1)");
    }

    #[test]
    fn test_interpreters_are_isolated() {
        let a = Interpreter::new();
        let b = Interpreter::new();
        a.eval_str("(define shared 1)").unwrap();
        assert!(b.eval_str("shared").is_err());
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_shutdown_clears_globals() {
        let interp = Interpreter::new();
        interp.eval_str("(define (f) f)").unwrap();
        interp.shutdown();
        assert!(interp.global().is_empty());
        assert!(matches!(interp.eval_str("1"), Err(SchemeError::ShutDown)));
    }
}
