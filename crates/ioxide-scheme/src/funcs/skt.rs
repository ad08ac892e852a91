//! `skt-*`: queries on raw socket descriptors, such as those from `tcp-fd`.

use ioxide_net::socket;

use crate::builtins;
use crate::error::Result;
use crate::eval::Interpreter;
use crate::funcs::{descriptor, failed};
use crate::value::Value;

pub(crate) fn install(interp: &Interpreter) {
    interp.define_builtin("skt-peer", 1, Some(1), skt_peer);
    interp.define_builtin("skt-port", 1, Some(1), skt_port);
    interp.define_builtin("skt-readable?", 1, Some(1), skt_readable);
    interp.define_builtin("skt-writeable?", 1, Some(1), skt_writeable);
    interp.define_builtin("skt-up?", 1, Some(1), skt_up);
    interp.define_builtin("skt-setbuf", 3, Some(3), skt_setbuf);
}

/// `(skt-peer fd)`: address of the connected peer as a string
fn skt_peer(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-peer", &args[0])?;
    Ok(match socket::peer(fd) {
        Ok(ip) => Value::from(ip.to_string()),
        Err(err) => failed("skt-peer", err),
    })
}

fn skt_port(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-port", &args[0])?;
    Ok(match socket::port(fd) {
        Ok(port) => Value::Int(port.into()),
        Err(err) => failed("skt-port", err),
    })
}

fn skt_readable(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-readable?", &args[0])?;
    Ok(Value::Bool(socket::is_readable(fd)))
}

fn skt_writeable(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-writeable?", &args[0])?;
    Ok(Value::Bool(socket::is_writeable(fd)))
}

fn skt_up(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-up?", &args[0])?;
    Ok(Value::Bool(socket::is_up(fd)))
}

/// `(skt-setbuf fd receive send)`: a negative size keeps that buffer as is
fn skt_setbuf(_: &Interpreter, args: &[Value]) -> Result<Value> {
    let fd = descriptor("skt-setbuf", &args[0])?;
    let receive = usize::try_from(builtins::integer("skt-setbuf", &args[1])?).ok();
    let send = usize::try_from(builtins::integer("skt-setbuf", &args[2])?).ok();
    Ok(match socket::set_buffers(fd, receive, send) {
        Ok(()) => Value::Bool(true),
        Err(err) => failed("skt-setbuf", err),
    })
}
