//! `tcp-*`: listening sockets and data connections.

use ioxide_net::Endpoint;

use crate::builtins;
use crate::context::{HandleKind, Token};
use crate::error::{Result, SchemeError};
use crate::eval::Interpreter;
use crate::funcs::{failed, handle, length, timeout};
use crate::value::Value;

const DEFAULT_BACKLOG: u32 = 5;

pub(crate) fn install(interp: &Interpreter) {
    interp.define_builtin("tcp-listen", 1, Some(2), tcp_listen);
    interp.define_builtin("tcp-answer", 1, Some(2), tcp_answer);
    interp.define_builtin("tcp-call", 1, Some(2), tcp_call);
    interp.define_builtin("tcp-complete", 1, Some(3), tcp_complete);
    interp.define_builtin("tcp-pending?", 1, Some(1), tcp_pending);
    interp.define_builtin("tcp-read", 2, Some(3), tcp_read);
    interp.define_builtin("tcp-write", 2, Some(3), tcp_write);
    interp.define_builtin("tcp-fd", 1, Some(1), tcp_fd);
    interp.define_builtin("tcp-name", 1, Some(1), tcp_name);
    interp.define_builtin("tcp-readable?", 1, Some(1), tcp_readable);
    interp.define_builtin("tcp-writeable?", 1, Some(1), tcp_writeable);
    interp.define_builtin("tcp-up?", 1, Some(1), tcp_up);
    interp.define_builtin("tcp-destroy", 1, Some(1), tcp_destroy);
}

/// A service given as a port number or a `"port[@host]"` string
fn service(procedure: &str, value: &Value) -> Result<String> {
    match value {
        Value::Int(port) => Ok(port.to_string()),
        Value::Str(text) => Ok(text.to_string()),
        other => Err(SchemeError::invalid_argument(
            procedure,
            format!("expected a service name or port, got {other}"),
        )),
    }
}

/// Run `op` on a live endpoint, or report the stale handle as `#f`
fn with_endpoint(
    interp: &Interpreter,
    procedure: &str,
    token: Token,
    op: impl FnOnce(&Endpoint) -> Value,
) -> Value {
    match interp.context().handles().endpoint(token) {
        Some(endpoint) => op(endpoint),
        None => failed(procedure, format!("{token} is not a live endpoint")),
    }
}

fn tcp_listen(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let service = service("tcp-listen", &args[0])?;
    let backlog = match args.get(1) {
        Some(value) => u32::try_from(builtins::integer("tcp-listen", value)?).map_err(|_| {
            SchemeError::invalid_argument("tcp-listen", format!("invalid backlog {value}"))
        })?,
        None => DEFAULT_BACKLOG,
    };
    Ok(match Endpoint::listen(&service, backlog) {
        Ok(endpoint) => Value::Handle(interp.context().handles_mut().add_endpoint(endpoint)),
        Err(err) => failed("tcp-listen", err),
    })
}

fn tcp_answer(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-answer", &args[0], HandleKind::Endpoint)?;
    let limit = timeout("tcp-answer", args.get(1))?;
    let answered = match interp.context().handles().endpoint(token) {
        Some(listener) => listener.answer(limit),
        None => return Ok(failed("tcp-answer", format!("{token} is not a live endpoint"))),
    };
    Ok(match answered {
        Ok(endpoint) => Value::Handle(interp.context().handles_mut().add_endpoint(endpoint)),
        Err(err) => failed("tcp-answer", err),
    })
}

/// `(tcp-call service [no-wait?])`: with a true flag the connection is only
/// started, and `tcp-complete` finishes it
fn tcp_call(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let service = service("tcp-call", &args[0])?;
    let no_wait = args.get(1).is_some_and(Value::is_true);
    Ok(match Endpoint::call(&service, no_wait) {
        Ok(endpoint) => Value::Handle(interp.context().handles_mut().add_endpoint(endpoint)),
        Err(err) => failed("tcp-call", err),
    })
}

/// `(tcp-complete endpoint [timeout [destroy?]])`. A failed or timed out
/// attempt destroys the endpoint unless `destroy?` is `#f`.
fn tcp_complete(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-complete", &args[0], HandleKind::Endpoint)?;
    let limit = timeout("tcp-complete", args.get(1))?;
    let destroy_on_error = !matches!(args.get(2), Some(Value::Bool(false)));

    let completed = match interp.context().handles().endpoint(token) {
        Some(endpoint) => endpoint.complete(limit),
        None => return Ok(failed("tcp-complete", format!("{token} is not a live endpoint"))),
    };
    Ok(match completed {
        Ok(()) => Value::Bool(true),
        Err(err) => {
            if destroy_on_error {
                if let Some(endpoint) = interp.context().handles_mut().remove_endpoint(token) {
                    endpoint.shutdown();
                }
            }
            failed("tcp-complete", err)
        }
    })
}

/// True if a listening endpoint has a connection request waiting
fn tcp_pending(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-pending?", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-pending?", token, |endpoint| {
        Value::Bool(endpoint.has_pending_connection())
    }))
}

fn tcp_read(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-read", &args[0], HandleKind::Endpoint)?;
    let count = length("tcp-read", &args[1])?;
    let limit = timeout("tcp-read", args.get(2))?;
    Ok(with_endpoint(interp, "tcp-read", token, |endpoint| {
        match endpoint.read(count, limit) {
            Ok(data) => Value::from(String::from_utf8_lossy(&data).into_owned()),
            Err(err) => failed("tcp-read", err),
        }
    }))
}

/// Returns the number of bytes written, which is less than the length of the
/// string (possibly zero) when the timeout ran out first
fn tcp_write(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-write", &args[0], HandleKind::Endpoint)?;
    let data = builtins::string("tcp-write", &args[1])?;
    let limit = timeout("tcp-write", args.get(2))?;
    Ok(with_endpoint(interp, "tcp-write", token, |endpoint| {
        match endpoint.write(data.as_bytes(), limit) {
            Ok(written) => Value::Int(written as i64),
            Err(err) => failed("tcp-write", err),
        }
    }))
}

fn tcp_fd(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-fd", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-fd", token, |endpoint| {
        Value::Int(endpoint.fd() as i64)
    }))
}

fn tcp_name(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-name", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-name", token, |endpoint| {
        Value::string(endpoint.name())
    }))
}

fn tcp_readable(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-readable?", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-readable?", token, |endpoint| {
        Value::Bool(endpoint.is_readable())
    }))
}

fn tcp_writeable(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-writeable?", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-writeable?", token, |endpoint| {
        Value::Bool(endpoint.is_writeable())
    }))
}

fn tcp_up(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-up?", &args[0], HandleKind::Endpoint)?;
    Ok(with_endpoint(interp, "tcp-up?", token, |endpoint| {
        Value::Bool(endpoint.is_up())
    }))
}

fn tcp_destroy(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("tcp-destroy", &args[0], HandleKind::Endpoint)?;
    let removed = interp.context().handles_mut().remove_endpoint(token);
    Ok(match removed {
        Some(endpoint) => {
            endpoint.shutdown();
            Value::Bool(true)
        }
        None => failed("tcp-destroy", format!("{token} is not a live endpoint")),
    })
}
