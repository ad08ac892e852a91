//! `lfn-*`: LF-terminated line streams layered over TCP endpoints.

use ioxide_net::{LineStream, LineStreamOptions};

use crate::builtins;
use crate::context::{HandleKind, Token};
use crate::error::{Result, SchemeError};
use crate::eval::Interpreter;
use crate::funcs::{failed, handle, length, timeout};
use crate::value::Value;

pub(crate) fn install(interp: &Interpreter) {
    interp.define_builtin("lfn-create", 1, Some(2), lfn_create);
    interp.define_builtin("lfn-getline", 1, Some(2), lfn_getline);
    interp.define_builtin("lfn-putline", 2, Some(4), lfn_putline);
    interp.define_builtin("lfn-read", 2, Some(3), lfn_read);
    interp.define_builtin("lfn-write", 2, Some(3), lfn_write);
    interp.define_builtin("lfn-readable?", 1, Some(1), lfn_readable);
    interp.define_builtin("lfn-writeable?", 1, Some(1), lfn_writeable);
    interp.define_builtin("lfn-up?", 1, Some(1), lfn_up);
    interp.define_builtin("lfn-fd", 1, Some(1), lfn_fd);
    interp.define_builtin("lfn-name", 1, Some(1), lfn_name);
    interp.define_builtin("lfn-destroy", 1, Some(1), lfn_destroy);
}

fn stale(procedure: &str, token: Token) -> Value {
    failed(procedure, format!("{token} is not a live stream"))
}

fn with_stream(
    interp: &Interpreter,
    procedure: &str,
    token: Token,
    op: impl FnOnce(&mut LineStream) -> Value,
) -> Value {
    match interp.context().handles_mut().stream_mut(token) {
        Some(stream) => op(stream),
        None => stale(procedure, token),
    }
}

/// `(lfn-create endpoint [options])`: the stream takes the endpoint over, so
/// the endpoint handle is no longer valid afterwards
fn lfn_create(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-create", &args[0], HandleKind::Endpoint)?;
    let options = match args.get(1) {
        Some(value) => LineStreamOptions::parse(builtins::string("lfn-create", value)?)
            .map_err(|err| SchemeError::invalid_argument("lfn-create", err.to_string()))?,
        None => LineStreamOptions::default(),
    };

    let context = interp.context();
    let listener = match context.handles().endpoint(token) {
        Some(endpoint) => endpoint.is_listener(),
        None => return Ok(failed("lfn-create", format!("{token} is not a live endpoint"))),
    };
    if listener {
        return Ok(failed("lfn-create", format!("{token} is a listening endpoint")));
    }

    let Some(endpoint) = context.handles_mut().remove_endpoint(token) else {
        return Ok(failed("lfn-create", format!("{token} is not a live endpoint")));
    };
    Ok(match LineStream::wrap(endpoint, options) {
        Ok(stream) => Value::Handle(context.handles_mut().add_stream(stream)),
        Err(err) => failed("lfn-create", err),
    })
}

fn lfn_getline(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-getline", &args[0], HandleKind::Stream)?;
    let limit = timeout("lfn-getline", args.get(1))?;
    Ok(with_stream(interp, "lfn-getline", token, |stream| {
        match stream.get_line(limit) {
            Ok(line) => Value::from(line),
            Err(err) => failed("lfn-getline", err),
        }
    }))
}

/// `(lfn-putline stream text [crlf? [timeout]])`
fn lfn_putline(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-putline", &args[0], HandleKind::Stream)?;
    let text = builtins::string("lfn-putline", &args[1])?;
    let crlf = args.get(2).is_some_and(Value::is_true);
    let limit = timeout("lfn-putline", args.get(3))?;
    Ok(with_stream(interp, "lfn-putline", token, |stream| {
        match stream.put_line(text, crlf, limit) {
            Ok(()) => Value::Bool(true),
            Err(err) => failed("lfn-putline", err),
        }
    }))
}

fn lfn_read(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-read", &args[0], HandleKind::Stream)?;
    let count = length("lfn-read", &args[1])?;
    let limit = timeout("lfn-read", args.get(2))?;
    Ok(with_stream(interp, "lfn-read", token, |stream| {
        match stream.read(count, limit) {
            Ok(data) => Value::from(String::from_utf8_lossy(&data).into_owned()),
            Err(err) => failed("lfn-read", err),
        }
    }))
}

fn lfn_write(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-write", &args[0], HandleKind::Stream)?;
    let data = builtins::string("lfn-write", &args[1])?;
    let limit = timeout("lfn-write", args.get(2))?;
    Ok(with_stream(interp, "lfn-write", token, |stream| {
        match stream.write(data.as_bytes(), limit) {
            Ok(written) => Value::Int(written as i64),
            Err(err) => failed("lfn-write", err),
        }
    }))
}

fn lfn_readable(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-readable?", &args[0], HandleKind::Stream)?;
    Ok(with_stream(interp, "lfn-readable?", token, |stream| {
        Value::Bool(stream.is_readable())
    }))
}

fn lfn_writeable(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-writeable?", &args[0], HandleKind::Stream)?;
    Ok(with_stream(interp, "lfn-writeable?", token, |stream| {
        Value::Bool(stream.is_writeable())
    }))
}

fn lfn_up(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-up?", &args[0], HandleKind::Stream)?;
    Ok(with_stream(interp, "lfn-up?", token, |stream| {
        Value::Bool(stream.is_up())
    }))
}

fn lfn_fd(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-fd", &args[0], HandleKind::Stream)?;
    let value = match interp.context().handles().stream(token) {
        Some(stream) => Value::Int(stream.fd() as i64),
        None => stale("lfn-fd", token),
    };
    Ok(value)
}

fn lfn_name(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-name", &args[0], HandleKind::Stream)?;
    let value = match interp.context().handles().stream(token) {
        Some(stream) => Value::string(stream.name()),
        None => stale("lfn-name", token),
    };
    Ok(value)
}

fn lfn_destroy(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("lfn-destroy", &args[0], HandleKind::Stream)?;
    let removed = interp.context().handles_mut().remove_stream(token);
    Ok(match removed {
        Some(stream) => {
            stream.destroy();
            Value::Bool(true)
        }
        None => stale("lfn-destroy", token),
    })
}
