//! `iox-*`: dispatchers and watches.

use ioxide_reactor::{Dispatcher, Interest, Reason};
use tracing::debug;

use crate::bridge::{self, WatchRequest};
use crate::context::{HandleKind, Token};
use crate::error::{Result, SchemeError};
use crate::eval::Interpreter;
use crate::funcs::{descriptor, failed, handle, procedure, seconds, timeout};
use crate::value::Value;

pub(crate) fn install(interp: &Interpreter) {
    interp.define_builtin("iox-create", 0, Some(0), iox_create);
    interp.define_builtin("iox-after", 4, Some(4), iox_after);
    interp.define_builtin("iox-every", 5, Some(5), iox_every);
    interp.define_builtin("iox-onio", 5, Some(5), iox_onio);
    interp.define_builtin("iox-whenidle", 3, Some(3), iox_whenidle);
    interp.define_builtin("iox-cancel", 1, Some(1), iox_cancel);
    interp.define_builtin("iox-dispatcher", 1, Some(1), iox_dispatcher);
    interp.define_builtin("iox-monitor", 1, Some(2), iox_monitor);
    interp.define_builtin("iox-destroy", 1, Some(1), iox_destroy);

    for (name, code) in [
        ("IOX_READ", Interest::READ.as_u32() as i64),
        ("IOX_WRITE", Interest::WRITE.as_u32() as i64),
        ("IOX_EXCEPT", Interest::EXCEPT.as_u32() as i64),
        ("IOX_IO", Interest::IO.as_u32() as i64),
        ("IOX_FIRE", Reason::Fire.code()),
        ("IOX_IDLE", Reason::Idle.code()),
        ("IOX_CANCEL", Reason::Cancel.code()),
    ] {
        interp.define(name, Value::Int(code));
    }
}

/// Make a native dispatcher reachable from scripts as the global `name`.
/// Scripts can register watches on it but `iox-destroy` refuses it.
pub fn bind_dispatcher(interp: &Interpreter, name: &str, dispatcher: &Dispatcher) -> Token {
    let token = {
        let mut handles = interp.context().handles_mut();
        let token = handles.add_dispatcher(dispatcher.clone());
        handles.mark_shared(token);
        token
    };
    interp.define(name, Value::Handle(token));
    token
}

fn register(
    interp: &Interpreter,
    name: &str,
    args: &[Value],
    request: WatchRequest,
) -> Result<Value> {
    let dispatcher = handle(name, &args[0], HandleKind::Dispatcher)?;
    let function = procedure(name, &args[1])?;
    let user = args[2].clone();
    Ok(match bridge::register(interp, dispatcher, function, user, request) {
        Ok(watch) => Value::Handle(watch),
        Err(err) => failed(name, err),
    })
}

fn iox_create(interp: &Interpreter, _: &[Value]) -> Result<Value> {
    let token = interp.context().handles_mut().add_dispatcher(Dispatcher::new());
    Ok(Value::Handle(token))
}

fn iox_after(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let delay = seconds("iox-after", &args[3])?;
    register(interp, "iox-after", args, WatchRequest::After(delay))
}

fn iox_every(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let delay = seconds("iox-every", &args[3])?;
    let interval = seconds("iox-every", &args[4])?;
    if interval.is_zero() {
        return Err(SchemeError::invalid_argument(
            "iox-every",
            "interval must be greater than zero",
        ));
    }
    register(interp, "iox-every", args, WatchRequest::Every { delay, interval })
}

fn iox_onio(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let mask = args[3]
        .as_int()
        .and_then(|mask| u32::try_from(mask).ok())
        .and_then(Interest::from_bits)
        .filter(|interest| !interest.is_empty())
        .ok_or_else(|| {
            SchemeError::invalid_argument("iox-onio", format!("invalid event mask {}", args[3]))
        })?;
    let fd = descriptor("iox-onio", &args[4])?;
    register(interp, "iox-onio", args, WatchRequest::Io { fd, interest: mask })
}

fn iox_whenidle(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    register(interp, "iox-whenidle", args, WatchRequest::Idle)
}

fn iox_cancel(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let watch = handle("iox-cancel", &args[0], HandleKind::Watch)?;
    Ok(match bridge::cancel(interp, watch) {
        Ok(()) => Value::Bool(true),
        Err(err) => failed("iox-cancel", err),
    })
}

fn iox_dispatcher(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let watch = handle("iox-dispatcher", &args[0], HandleKind::Watch)?;
    Ok(match bridge::dispatcher_of(interp, watch) {
        Some(dispatcher) => Value::Handle(dispatcher),
        None => failed("iox-dispatcher", format!("{watch} is not a live watch")),
    })
}

fn live_dispatcher(interp: &Interpreter, token: Token) -> Option<Dispatcher> {
    interp.context().handles().dispatcher(token)
}

fn iox_monitor(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("iox-monitor", &args[0], HandleKind::Dispatcher)?;
    let limit = timeout("iox-monitor", args.get(1))?;
    let Some(dispatcher) = live_dispatcher(interp, token) else {
        return Ok(failed("iox-monitor", format!("{token} is not a live dispatcher")));
    };

    debug!(target: "scheme", "Monitoring {} ({:?})", token, limit);
    Ok(match dispatcher.monitor(limit) {
        Ok(()) => Value::Bool(true),
        Err(err) => failed("iox-monitor", err),
    })
}

fn iox_destroy(interp: &Interpreter, args: &[Value]) -> Result<Value> {
    let token = handle("iox-destroy", &args[0], HandleKind::Dispatcher)?;
    let Some(dispatcher) = live_dispatcher(interp, token) else {
        return Ok(failed("iox-destroy", format!("{token} is not a live dispatcher")));
    };
    if interp.context().handles().is_shared(token) {
        return Ok(failed("iox-destroy", format!("{token} belongs to the host")));
    }

    let result = dispatcher.destroy();
    interp.context().handles_mut().remove_dispatcher(token);
    Ok(match result {
        Ok(()) => Value::Bool(true),
        Err(err) => failed("iox-destroy", err),
    })
}
