//! Core procedures bound in every interpreter.

use std::cmp::Ordering;
use std::path::Path;
use std::rc::Rc;

use crate::error::{Result, SchemeError};
use crate::eval::Interpreter;
use crate::value::Value;

pub(crate) fn install(interp: &Interpreter) {
    // Numbers
    interp.define_builtin("+", 0, None, add);
    interp.define_builtin("-", 1, None, subtract);
    interp.define_builtin("*", 0, None, multiply);
    interp.define_builtin("/", 1, None, divide);
    interp.define_builtin("quotient", 2, Some(2), quotient);
    interp.define_builtin("remainder", 2, Some(2), remainder);
    interp.define_builtin("modulo", 2, Some(2), modulo);
    interp.define_builtin("=", 1, None, num_eq);
    interp.define_builtin("<", 1, None, num_lt);
    interp.define_builtin(">", 1, None, num_gt);
    interp.define_builtin("<=", 1, None, num_le);
    interp.define_builtin(">=", 1, None, num_ge);
    interp.define_builtin("abs", 1, Some(1), abs);
    interp.define_builtin("min", 1, None, min);
    interp.define_builtin("max", 1, None, max);
    interp.define_builtin("zero?", 1, Some(1), is_zero);
    interp.define_builtin("positive?", 1, Some(1), is_positive);
    interp.define_builtin("negative?", 1, Some(1), is_negative);
    interp.define_builtin("even?", 1, Some(1), is_even);
    interp.define_builtin("odd?", 1, Some(1), is_odd);
    interp.define_builtin("number?", 1, Some(1), is_number);
    interp.define_builtin("integer?", 1, Some(1), is_integer);
    interp.define_builtin("real?", 1, Some(1), is_number);
    interp.define_builtin("exact->inexact", 1, Some(1), exact_to_inexact);
    interp.define_builtin("inexact->exact", 1, Some(1), inexact_to_exact);
    interp.define_builtin("floor", 1, Some(1), floor);
    interp.define_builtin("ceiling", 1, Some(1), ceiling);
    interp.define_builtin("round", 1, Some(1), round);
    interp.define_builtin("truncate", 1, Some(1), truncate);
    interp.define_builtin("sqrt", 1, Some(1), sqrt);
    interp.define_builtin("expt", 2, Some(2), expt);
    interp.define_builtin("number->string", 1, Some(1), number_to_string);
    interp.define_builtin("string->number", 1, Some(1), string_to_number);

    // Equivalence and booleans
    interp.define_builtin("not", 1, Some(1), not);
    interp.define_builtin("boolean?", 1, Some(1), is_boolean);
    interp.define_builtin("eq?", 2, Some(2), eqv);
    interp.define_builtin("eqv?", 2, Some(2), eqv);
    interp.define_builtin("equal?", 2, Some(2), equal);

    // Pairs and lists
    interp.define_builtin("cons", 2, Some(2), cons);
    interp.define_builtin("car", 1, Some(1), car);
    interp.define_builtin("cdr", 1, Some(1), cdr);
    interp.define_builtin("cadr", 1, Some(1), cadr);
    interp.define_builtin("cddr", 1, Some(1), cddr);
    interp.define_builtin("caar", 1, Some(1), caar);
    interp.define_builtin("cdar", 1, Some(1), cdar);
    interp.define_builtin("list", 0, None, list);
    interp.define_builtin("length", 1, Some(1), length);
    interp.define_builtin("append", 0, None, append);
    interp.define_builtin("reverse", 1, Some(1), reverse);
    interp.define_builtin("list-ref", 2, Some(2), list_ref);
    interp.define_builtin("list-tail", 2, Some(2), list_tail);
    interp.define_builtin("null?", 1, Some(1), is_null);
    interp.define_builtin("pair?", 1, Some(1), is_pair);
    interp.define_builtin("list?", 1, Some(1), is_list);
    interp.define_builtin("memq", 2, Some(2), memv);
    interp.define_builtin("memv", 2, Some(2), memv);
    interp.define_builtin("member", 2, Some(2), member);
    interp.define_builtin("assq", 2, Some(2), assv);
    interp.define_builtin("assv", 2, Some(2), assv);
    interp.define_builtin("assoc", 2, Some(2), assoc);

    // Symbols and strings
    interp.define_builtin("symbol?", 1, Some(1), is_symbol);
    interp.define_builtin("string?", 1, Some(1), is_string);
    interp.define_builtin("symbol->string", 1, Some(1), symbol_to_string);
    interp.define_builtin("string->symbol", 1, Some(1), string_to_symbol);
    interp.define_builtin("string-append", 0, None, string_append);
    interp.define_builtin("string-length", 1, Some(1), string_length);
    interp.define_builtin("substring", 2, Some(3), substring);
    interp.define_builtin("string=?", 2, None, string_eq);
    interp.define_builtin("string<?", 2, None, string_lt);
    interp.define_builtin("string-upcase", 1, Some(1), string_upcase);
    interp.define_builtin("string-downcase", 1, Some(1), string_downcase);

    // Control
    interp.define_builtin("procedure?", 1, Some(1), is_procedure);
    interp.define_builtin("apply", 2, None, apply);
    interp.define_builtin("map", 2, None, map);
    interp.define_builtin("for-each", 2, None, for_each);
    interp.define_builtin("eval", 1, Some(1), eval);
    interp.define_builtin("load", 1, Some(1), load);
    interp.define_builtin("error", 1, None, error);

    // Output
    interp.define_builtin("display", 1, Some(1), display);
    interp.define_builtin("write", 1, Some(1), write);
    interp.define_builtin("newline", 0, Some(0), newline);
}

fn invalid(procedure: &str, expected: &str, got: &Value) -> SchemeError {
    SchemeError::invalid_argument(procedure, format!("expected {expected}, got {got}"))
}

pub(crate) fn number(procedure: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| invalid(procedure, "a number", value))
}

pub(crate) fn integer(procedure: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(invalid(procedure, "an integer", other)),
    }
}

pub(crate) fn string<'a>(procedure: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| invalid(procedure, "a string", value))
}

fn index(procedure: &str, value: &Value) -> Result<usize> {
    let n = integer(procedure, value)?;
    usize::try_from(n).map_err(|_| invalid(procedure, "a non-negative index", value))
}

fn list_items(procedure: &str, value: &Value) -> Result<Vec<Value>> {
    value
        .list_to_vec()
        .ok_or_else(|| invalid(procedure, "a list", value))
}

// ===== Numbers =====

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Real(f64),
}

fn num(procedure: &str, value: &Value) -> Result<Num> {
    match value {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::Real(x) => Ok(Num::Real(*x)),
        other => Err(invalid(procedure, "a number", other)),
    }
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Real(x) => x,
        }
    }
}

impl From<Num> for Value {
    fn from(n: Num) -> Self {
        match n {
            Num::Int(n) => Value::Int(n),
            Num::Real(x) => Value::Real(x),
        }
    }
}

/// Apply an integer operation, falling back to reals on overflow or when
/// either side is already real
fn combine(a: Num, b: Num, int_op: fn(i64, i64) -> Option<i64>, real_op: fn(f64, f64) -> f64) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(n) => Num::Int(n),
            None => Num::Real(real_op(x as f64, y as f64)),
        },
        _ => Num::Real(real_op(a.as_f64(), b.as_f64())),
    }
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    identity: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    real_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let mut total = identity;
    for arg in args {
        total = combine(total, num(name, arg)?, int_op, real_op);
    }
    Ok(total.into())
}

fn add(_: &Interpreter, args: &[Value]) -> Result<Value> {
    fold_numbers("+", args, Num::Int(0), i64::checked_add, |a, b| a + b)
}

fn multiply(_: &Interpreter, args: &[Value]) -> Result<Value> {
    fold_numbers("*", args, Num::Int(1), i64::checked_mul, |a, b| a * b)
}

fn subtract(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let first = num("-", &args[0])?;
    if args.len() == 1 {
        return Ok(combine(Num::Int(0), first, i64::checked_sub, |a, b| a - b).into());
    }
    let mut total = first;
    for arg in &args[1..] {
        total = combine(total, num("-", arg)?, i64::checked_sub, |a, b| a - b);
    }
    Ok(total.into())
}

fn divide(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (mut total, rest) = if args.len() == 1 {
        (Num::Int(1), args)
    } else {
        (num("/", &args[0])?, &args[1..])
    };
    for arg in rest {
        let divisor = num("/", arg)?;
        total = match (total, divisor) {
            (_, Num::Int(0)) => return Err(SchemeError::DivisionByZero),
            (Num::Int(a), Num::Int(b)) if a % b == 0 => Num::Int(a / b),
            (a, b) => Num::Real(a.as_f64() / b.as_f64()),
        };
    }
    Ok(total.into())
}

fn integer_pair(name: &str, args: &[Value]) -> Result<(i64, i64)> {
    let a = integer(name, &args[0])?;
    let b = integer(name, &args[1])?;
    if b == 0 {
        return Err(SchemeError::DivisionByZero);
    }
    Ok((a, b))
}

fn quotient(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (a, b) = integer_pair("quotient", args)?;
    Ok(Value::Int(a.wrapping_div(b)))
}

fn remainder(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (a, b) = integer_pair("remainder", args)?;
    Ok(Value::Int(a.wrapping_rem(b)))
}

fn modulo(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (a, b) = integer_pair("modulo", args)?;
    let r = a.wrapping_rem(b);
    Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
}

fn compare_chain(name: &str, args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value> {
    let values = args
        .iter()
        .map(|arg| number(name, arg))
        .collect::<Result<Vec<_>>>()?;
    let holds = values.windows(2).all(|pair| {
        pair[0]
            .partial_cmp(&pair[1])
            .is_some_and(accept)
    });
    Ok(Value::Bool(holds))
}

fn num_eq(_: &Interpreter, args: &[Value]) -> Result<Value> {
    compare_chain("=", args, Ordering::is_eq)
}

fn num_lt(_: &Interpreter, args: &[Value]) -> Result<Value> {
    compare_chain("<", args, Ordering::is_lt)
}

fn num_gt(_: &Interpreter, args: &[Value]) -> Result<Value> {
    compare_chain(">", args, Ordering::is_gt)
}

fn num_le(_: &Interpreter, args: &[Value]) -> Result<Value> {
    compare_chain("<=", args, Ordering::is_le)
}

fn num_ge(_: &Interpreter, args: &[Value]) -> Result<Value> {
    compare_chain(">=", args, Ordering::is_ge)
}

fn abs(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(match num("abs", &args[0])? {
        Num::Int(n) => n.checked_abs().map_or(Value::Real((n as f64).abs()), Value::Int),
        Num::Real(x) => Value::Real(x.abs()),
    })
}

fn extreme(name: &str, args: &[Value], pick_new: fn(f64, f64) -> bool) -> Result<Value> {
    let mut best = num(name, &args[0])?;
    let mut inexact = matches!(best, Num::Real(_));
    for arg in &args[1..] {
        let candidate = num(name, arg)?;
        inexact |= matches!(candidate, Num::Real(_));
        if pick_new(candidate.as_f64(), best.as_f64()) {
            best = candidate;
        }
    }
    Ok(if inexact {
        Value::Real(best.as_f64())
    } else {
        best.into()
    })
}

fn min(_: &Interpreter, args: &[Value]) -> Result<Value> {
    extreme("min", args, |new, best| new < best)
}

fn max(_: &Interpreter, args: &[Value]) -> Result<Value> {
    extreme("max", args, |new, best| new > best)
}

fn is_zero(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(number("zero?", &args[0])? == 0.0))
}

fn is_positive(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(number("positive?", &args[0])? > 0.0))
}

fn is_negative(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(number("negative?", &args[0])? < 0.0))
}

fn is_even(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(integer("even?", &args[0])? % 2 == 0))
}

fn is_odd(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(integer("odd?", &args[0])? % 2 != 0))
}

fn is_number(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Int(_) | Value::Real(_))))
}

fn is_integer(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(match args[0] {
        Value::Int(_) => true,
        Value::Real(x) => x.is_finite() && x.fract() == 0.0,
        _ => false,
    }))
}

fn exact_to_inexact(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Real(number("exact->inexact", &args[0])?))
}

fn inexact_to_exact(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let x = number("inexact->exact", &args[0])?;
    if !x.is_finite() {
        return Err(invalid("inexact->exact", "a finite number", &args[0]));
    }
    Ok(Value::Int(x.round() as i64))
}

fn rounding(name: &str, args: &[Value], op: fn(f64) -> f64) -> Result<Value> {
    Ok(match num(name, &args[0])? {
        Num::Int(n) => Value::Int(n),
        Num::Real(x) => Value::Real(op(x)),
    })
}

fn floor(_: &Interpreter, args: &[Value]) -> Result<Value> {
    rounding("floor", args, f64::floor)
}

fn ceiling(_: &Interpreter, args: &[Value]) -> Result<Value> {
    rounding("ceiling", args, f64::ceil)
}

fn round(_: &Interpreter, args: &[Value]) -> Result<Value> {
    rounding("round", args, f64::round_ties_even)
}

fn truncate(_: &Interpreter, args: &[Value]) -> Result<Value> {
    rounding("truncate", args, f64::trunc)
}

fn sqrt(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let x = number("sqrt", &args[0])?;
    let root = x.sqrt();
    if let Value::Int(n) = args[0] {
        let exact = root.round() as i64;
        if exact.checked_mul(exact) == Some(n) {
            return Ok(Value::Int(exact));
        }
    }
    Ok(Value::Real(root))
}

fn expt(_: &Interpreter, args: &[Value]) -> Result<Value> {
    match (num("expt", &args[0])?, num("expt", &args[1])?) {
        (Num::Int(base), Num::Int(power)) if power >= 0 => {
            let exact = u32::try_from(power)
                .ok()
                .and_then(|power| base.checked_pow(power));
            Ok(exact.map_or_else(
                || Value::Real((base as f64).powf(power as f64)),
                Value::Int,
            ))
        }
        (base, power) => Ok(Value::Real(base.as_f64().powf(power.as_f64()))),
    }
}

fn number_to_string(_: &Interpreter, args: &[Value]) -> Result<Value> {
    num("number->string", &args[0])?;
    Ok(Value::from(args[0].to_string()))
}

fn string_to_number(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let text = string("string->number", &args[0])?.trim();
    Ok(text
        .parse::<i64>()
        .map(Value::Int)
        .or_else(|_| text.parse::<f64>().map(Value::Real))
        .unwrap_or(Value::Bool(false)))
}

// ===== Equivalence =====

fn not(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!args[0].is_true()))
}

fn is_boolean(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn eqv(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0].eqv(&args[1])))
}

fn equal(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0].equal(&args[1])))
}

// ===== Lists =====

fn cons(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn pair_parts<'a>(name: &str, value: &'a Value) -> Result<(&'a Value, &'a Value)> {
    match value {
        Value::Pair(pair) => Ok((&pair.car, &pair.cdr)),
        other => Err(invalid(name, "a pair", other)),
    }
}

fn car(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(pair_parts("car", &args[0])?.0.clone())
}

fn cdr(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(pair_parts("cdr", &args[0])?.1.clone())
}

fn cadr(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (_, rest) = pair_parts("cadr", &args[0])?;
    Ok(pair_parts("cadr", rest)?.0.clone())
}

fn cddr(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (_, rest) = pair_parts("cddr", &args[0])?;
    Ok(pair_parts("cddr", rest)?.1.clone())
}

fn caar(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (first, _) = pair_parts("caar", &args[0])?;
    Ok(pair_parts("caar", first)?.0.clone())
}

fn cdar(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let (first, _) = pair_parts("cdar", &args[0])?;
    Ok(pair_parts("cdar", first)?.1.clone())
}

fn list(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::list(args.to_vec()))
}

fn length(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Int(list_items("length", &args[0])?.len() as i64))
}

fn append(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::Nil);
    };
    let mut items = Vec::new();
    for arg in init {
        items.extend(list_items("append", arg)?);
    }
    Ok(items
        .into_iter()
        .rev()
        .fold(last.clone(), |tail, item| Value::cons(item, tail)))
}

fn reverse(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let items = list_items("reverse", &args[0])?;
    Ok(items
        .into_iter()
        .fold(Value::Nil, |tail, item| Value::cons(item, tail)))
}

fn list_tail(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let mut cursor = args[0].clone();
    for _ in 0..index("list-tail", &args[1])? {
        cursor = pair_parts("list-tail", &cursor)?.1.clone();
    }
    Ok(cursor)
}

fn list_ref(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let tail = list_tail(interp, args)?;
    Ok(pair_parts("list-ref", &tail)?.0.clone())
}

fn is_null(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Nil)))
}

fn is_pair(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
}

fn is_list(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0].is_list()))
}

fn find_tail(list: &Value, matches: impl Fn(&Value) -> bool) -> Value {
    let mut cursor = list;
    while let Value::Pair(pair) = cursor {
        if matches(&pair.car) {
            return cursor.clone();
        }
        cursor = &pair.cdr;
    }
    Value::Bool(false)
}

fn memv(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(find_tail(&args[1], |item| item.eqv(&args[0])))
}

fn member(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(find_tail(&args[1], |item| item.equal(&args[0])))
}

fn find_entry(name: &str, list: &Value, matches: impl Fn(&Value) -> bool) -> Result<Value> {
    for entry in list_items(name, list)? {
        let (key, _) = pair_parts(name, &entry)?;
        if matches(key) {
            return Ok(entry.clone());
        }
    }
    Ok(Value::Bool(false))
}

fn assv(_: &Interpreter, args: &[Value]) -> Result<Value> {
    find_entry("assv", &args[1], |key| key.eqv(&args[0]))
}

fn assoc(_: &Interpreter, args: &[Value]) -> Result<Value> {
    find_entry("assoc", &args[1], |key| key.equal(&args[0]))
}

// ===== Strings =====

fn is_symbol(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
}

fn is_string(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

fn symbol_to_string(_: &Interpreter, args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Symbol(name) => Ok(Value::Str(name.clone())),
        other => Err(invalid("symbol->string", "a symbol", other)),
    }
}

fn string_to_symbol(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Symbol(Rc::from(string("string->symbol", &args[0])?)))
}

fn string_append(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let mut text = String::new();
    for arg in args {
        text.push_str(string("string-append", arg)?);
    }
    Ok(Value::from(text))
}

fn string_length(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Int(string("string-length", &args[0])?.chars().count() as i64))
}

fn substring(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let text = string("substring", &args[0])?;
    let chars: Vec<char> = text.chars().collect();
    let start = index("substring", &args[1])?;
    let end = match args.get(2) {
        Some(end) => index("substring", end)?,
        None => chars.len(),
    };
    if start > end || end > chars.len() {
        return Err(SchemeError::invalid_argument(
            "substring",
            format!("range {start}..{end} out of bounds for length {}", chars.len()),
        ));
    }
    Ok(Value::from(chars[start..end].iter().collect::<String>()))
}

fn string_chain(name: &str, args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value> {
    let texts = args
        .iter()
        .map(|arg| string(name, arg))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Bool(texts.windows(2).all(|pair| accept(pair[0].cmp(pair[1])))))
}

fn string_eq(_: &Interpreter, args: &[Value]) -> Result<Value> {
    string_chain("string=?", args, Ordering::is_eq)
}

fn string_lt(_: &Interpreter, args: &[Value]) -> Result<Value> {
    string_chain("string<?", args, Ordering::is_lt)
}

fn string_upcase(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::from(string("string-upcase", &args[0])?.to_uppercase()))
}

fn string_downcase(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::from(string("string-downcase", &args[0])?.to_lowercase()))
}

// ===== Control =====

fn is_procedure(_: &Interpreter, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0].is_procedure()))
}

fn apply(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let (func, rest) = (&args[0], &args[1..]);
    let Some((spread, fixed)) = rest.split_last() else {
        return Err(SchemeError::invalid_argument("apply", "missing argument list"));
    };
    let mut call_args = fixed.to_vec();
    call_args.extend(list_items("apply", spread)?);
    interp.apply(func, call_args)
}

/// Argument lists for each step of `map`/`for-each`, stopping at the
/// shortest list
fn zip_lists(name: &str, lists: &[Value]) -> Result<Vec<Vec<Value>>> {
    let columns = lists
        .iter()
        .map(|list| list_items(name, list))
        .collect::<Result<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok((0..rows)
        .map(|row| columns.iter().map(|column| column[row].clone()).collect())
        .collect())
}

fn map(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let results = zip_lists("map", &args[1..])?
        .into_iter()
        .map(|call_args| interp.apply(&args[0], call_args))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::list(results))
}

fn for_each(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    for call_args in zip_lists("for-each", &args[1..])? {
        interp.apply(&args[0], call_args)?;
    }
    Ok(Value::Unspecified)
}

fn eval(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    interp.eval(&args[0], interp.global())
}

fn load(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    interp.load_file(Path::new(string("load", &args[0])?))
}

fn error(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let mut message = args[0].to_display();
    for irritant in &args[1..] {
        message.push(' ');
        message.push_str(&irritant.to_string());
    }
    Err(SchemeError::User(message))
}

// ===== Output =====

fn display(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    interp.write_output(&args[0].to_display())?;
    Ok(Value::Unspecified)
}

fn write(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    interp.write_output(&args[0].to_string())?;
    Ok(Value::Unspecified)
}

fn newline(interp: &Interpreter, _: &[Value]) -> Result<Value> {
    interp.write_output("\n")?;
    Ok(Value::Unspecified)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use crate::eval::Interpreter;

    fn eval(source: &str) -> String {
        let interp = Interpreter::new();
        interp.eval_str(source).unwrap().to_string()
    }

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_numeric_tower() {
        assert_eq!(eval("(+ 1 2 3)"), "6");
        assert_eq!(eval("(+ 1 0.5)"), "1.5");
        assert_eq!(eval("(- 5)"), "-5");
        assert_eq!(eval("(- 10 1 2)"), "7");
        assert_eq!(eval("(/ 6 3)"), "2");
        assert_eq!(eval("(/ 1 4)"), "0.25");
        assert_eq!(eval("(modulo -7 3)"), "2");
        assert_eq!(eval("(remainder -7 3)"), "-1");
        assert_eq!(eval("(< 1 2 3)"), "#t");
        assert_eq!(eval("(< 1 3 2)"), "#f");
        assert_eq!(eval("(max 1 2.0)"), "2.0");
        assert_eq!(eval("(sqrt 16)"), "4");
        assert_eq!(eval("(expt 2 10)"), "1024");
        assert_eq!(eval("(string->number \"12\")"), "12");
        assert_eq!(eval("(string->number \"x\")"), "#f");
        assert_eq!(eval("(+ 9223372036854775807 1)"), "9223372036854775808.0");
    }

    #[test]
    fn test_division_by_zero() {
        let interp = Interpreter::new();
        assert!(interp.eval_str("(/ 1 0)").is_err());
        assert!(interp.eval_str("(quotient 1 0)").is_err());
    }

    #[test]
    fn test_list_procedures() {
        assert_eq!(eval("(append '(1 2) '(3) '())"), "(1 2 3)");
        assert_eq!(eval("(reverse '(1 2 3))"), "(3 2 1)");
        assert_eq!(eval("(length '(1 2 3))"), "3");
        assert_eq!(eval("(list-ref '(a b c) 1)"), "b");
        assert_eq!(eval("(memv 2 '(1 2 3))"), "(2 3)");
        assert_eq!(eval("(assoc \"b\" '((\"a\" . 1) (\"b\" . 2)))"), "(\"b\" . 2)");
        assert_eq!(eval("(map + '(1 2 3) '(10 20 30))"), "(11 22 33)");
        assert_eq!(eval("(apply + 1 '(2 3))"), "6");
        assert_eq!(eval("(cadr '(1 2 3))"), "2");
    }

    #[test]
    fn test_string_procedures() {
        assert_eq!(eval("(string-append \"a\" \"b\")"), "\"ab\"");
        assert_eq!(eval("(substring \"hello\" 1 3)"), "\"el\"");
        assert_eq!(eval("(string-length \"héllo\")"), "5");
        assert_eq!(eval("(symbol->string 'abc)"), "\"abc\"");
        assert_eq!(eval("(string=? \"a\" \"a\")"), "#t");
        assert_eq!(eval("(number->string 42)"), "\"42\"");
    }

    #[test]
    fn test_type_errors_name_the_procedure() {
        let interp = Interpreter::new();
        let err = interp.eval_str("(car 1)").unwrap_err();
        assert!(err.to_string().starts_with("car:"), "{err}");
        let err = interp.eval_str("(error \"boom\" 1 'x)").unwrap_err();
        assert_eq!(err.to_string(), "boom 1 x");
        let err = interp.eval_str("(cons 1)").unwrap_err();
        assert!(err.to_string().contains("expected 2"), "{err}");
    }

    #[test]
    fn test_output_port() {
        let interp = Interpreter::new();
        let capture = Capture::default();
        interp.set_output(Box::new(capture.clone()));
        interp
            .eval_str("(display \"hi\") (write \"hi\") (newline) (for-each display '(1 2))")
            .unwrap();
        assert_eq!(String::from_utf8(capture.0.borrow().clone()).unwrap(), "hi\"hi\"\n12");

        interp.close_output();
        interp.eval_str("(display \"dropped\")").unwrap();
        assert_eq!(capture.0.borrow().len(), 7 + 2);
    }
}
