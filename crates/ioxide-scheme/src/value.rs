use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::context::Token;
use crate::env::Env;
use crate::error::{Result, SchemeError};
use crate::eval::{Interpreter, MAX_DEPTH};

pub type BuiltinFn = fn(&Interpreter, &[Value]) -> Result<Value>;

/// A Scheme value
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Rc<str>),
    Symbol(Rc<str>),
    Pair(Rc<Pair>),
    Lambda(Rc<Lambda>),
    Builtin(Rc<Builtin>),
    /// Typed handle on a native object held by the interpreter's context
    Handle(Token),
    Unspecified,
}

pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

/// Unlinks owned pairs one at a time so long or deeply nested lists do not
/// drop recursively
impl Drop for Pair {
    fn drop(&mut self) {
        if !matches!(self.car, Value::Pair(_)) && !matches!(self.cdr, Value::Pair(_)) {
            return;
        }
        let mut pending = vec![
            mem::replace(&mut self.car, Value::Nil),
            mem::replace(&mut self.cdr, Value::Nil),
        ];
        while let Some(value) = pending.pop() {
            if let Value::Pair(pair) = value {
                if let Ok(mut pair) = Rc::try_unwrap(pair) {
                    pending.push(mem::replace(&mut pair.car, Value::Nil));
                    pending.push(mem::replace(&mut pair.cdr, Value::Nil));
                }
            }
        }
    }
}

pub struct Lambda {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
    pub body: Rc<[Value]>,
    pub env: Env,
}

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub func: BuiltinFn,
}

impl Builtin {
    pub fn call(&self, interp: &Interpreter, args: &[Value]) -> Result<Value> {
        let too_few = args.len() < self.min_args;
        let too_many = self.max_args.is_some_and(|max| args.len() > max);
        if too_few || too_many {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => max.to_string(),
                Some(max) => format!("{}..{}", self.min_args, max),
                None => format!("at least {}", self.min_args),
            };
            return Err(SchemeError::Arity {
                procedure: self.name.to_string(),
                expected,
                got: args.len(),
            });
        }
        (self.func)(interp, args)
    }
}

impl Value {
    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Rc::from(name))
    }

    pub fn string(text: &str) -> Self {
        Value::Str(Rc::from(text))
    }

    pub fn cons(car: Value, cdr: Value) -> Self {
        Value::Pair(Rc::new(Pair { car, cdr }))
    }

    /// Build a proper list
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, item| Value::cons(item, tail))
    }

    /// Collect a proper list into a vector
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Value::Nil => return Some(items),
                Value::Pair(pair) => {
                    items.push(pair.car.clone());
                    cursor = &pair.cdr;
                }
                _ => return None,
            }
        }
    }

    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::Lambda(_) | Value::Builtin(_))
    }

    pub fn is_list(&self) -> bool {
        self.list_to_vec().is_some()
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Real(x) if x.fract() == 0.0 && x.is_finite() => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<Token> {
        match self {
            Value::Handle(token) => Some(*token),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "empty list",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Lambda(_) | Value::Builtin(_) => "procedure",
            Value::Handle(_) => "handle",
            Value::Unspecified => "unspecified",
        }
    }

    /// Identity comparison (`eqv?`)
    pub fn eqv(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Unspecified, Value::Unspecified) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }

    /// Structural comparison (`equal?`)
    pub fn equal(&self, other: &Value) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            match (a, b) {
                (Value::Str(x), Value::Str(y)) if x != y => return false,
                (Value::Str(_), Value::Str(_)) => {}
                (Value::Pair(x), Value::Pair(y)) => {
                    if !Rc::ptr_eq(x, y) {
                        pending.push((&x.cdr, &y.cdr));
                        pending.push((&x.car, &y.car));
                    }
                }
                _ if !a.eqv(b) => return false,
                _ => {}
            }
        }
        true
    }

    /// Text as `display` prints it: strings without quotes
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(text) => text.to_string(),
            other => other.to_string(),
        }
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in text.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

/// Write `value`, eliding pairs nested more than `MAX_DEPTH` levels down
fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
    let Value::Pair(pair) = value else {
        return write_atom(f, value);
    };
    if depth >= MAX_DEPTH {
        return f.write_str("(...)");
    }
    f.write_str("(")?;
    write_value(f, &pair.car, depth + 1)?;
    let mut cursor = &pair.cdr;
    loop {
        match cursor {
            Value::Nil => break,
            Value::Pair(next) => {
                f.write_str(" ")?;
                write_value(f, &next.car, depth + 1)?;
                cursor = &next.cdr;
            }
            tail => {
                f.write_str(" . ")?;
                write_value(f, tail, depth + 1)?;
                break;
            }
        }
    }
    f.write_str(")")
}

fn write_atom(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Nil => f.write_str("()"),
        Value::Bool(true) => f.write_str("#t"),
        Value::Bool(false) => f.write_str("#f"),
        Value::Int(n) => write!(f, "{n}"),
        Value::Real(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
        Value::Real(x) => write!(f, "{x}"),
        Value::Str(text) => write_string(f, text),
        Value::Symbol(name) => f.write_str(name),
        Value::Pair(_) => write_value(f, value, 0),
        Value::Lambda(lambda) => match &lambda.name {
            Some(name) => write!(f, "#<closure {name}>"),
            None => f.write_str("#<closure>"),
        },
        Value::Builtin(builtin) => write!(f, "#<primitive {}>", builtin.name),
        Value::Handle(token) => write!(f, "{token}"),
        Value::Unspecified => f.write_str("#<unspecified>"),
    }
}

/// Written representation, as `write` and the REPL print it
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::string(text)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Str(Rc::from(text))
    }
}
