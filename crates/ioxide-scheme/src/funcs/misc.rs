//! Miscellaneous host functions.

use chrono::Utc;

use crate::builtins;
use crate::error::Result;
use crate::eval::Interpreter;
use crate::value::Value;

pub(crate) fn install(interp: &Interpreter) {
    interp.define_builtin("getenv", 1, Some(1), getenv);
    interp.define_builtin("tv-tod", 0, Some(0), tv_tod);
}

/// `(getenv name)`: the variable's value, or `#f` if it is not set
fn getenv(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let name = builtins::string("getenv", &args[0])?;
    Ok(std::env::var(name).map_or(Value::Bool(false), Value::from))
}

/// `(tv-tod)`: time of day as `(seconds . microseconds)` since the epoch
fn tv_tod(_: &Interpreter, _: &[Value]) -> Result<Value> {
    let now = Utc::now();
    Ok(Value::cons(
        Value::Int(now.timestamp()),
        Value::Int(now.timestamp_subsec_micros() as i64),
    ))
}
