//! Extension functions exposed to scripts.
//!
//! The first argument is always the handle the function works on. Arguments
//! of the wrong type raise an invalid-argument error before anything changes;
//! operational failures such as a stale handle or a timeout return `#f`
//! and are logged.

use std::fmt::Display;
use std::os::unix::io::RawFd;
use std::time::Duration;

use ioxide_reactor::duration_from_secs;
use tracing::debug;

use crate::builtins;
use crate::context::{HandleKind, Token};
use crate::error::{Result, SchemeError};
use crate::eval::Interpreter;
use crate::value::Value;

pub mod iox;
pub mod lfn;
pub mod misc;
pub mod skt;
pub mod tcp;

pub(crate) fn install(interp: &Interpreter) {
    iox::install(interp);
    tcp::install(interp);
    lfn::install(interp);
    skt::install(interp);
    misc::install(interp);
}

pub(crate) fn handle(procedure: &str, value: &Value, kind: HandleKind) -> Result<Token> {
    match value {
        Value::Handle(token) if token.kind() == kind => Ok(*token),
        other => Err(SchemeError::invalid_argument(
            procedure,
            format!("expected a {kind}, got {other}"),
        )),
    }
}

pub(crate) fn procedure(name: &str, value: &Value) -> Result<Value> {
    if value.is_procedure() {
        Ok(value.clone())
    } else {
        Err(SchemeError::invalid_argument(
            name,
            format!("expected a procedure, got {value}"),
        ))
    }
}

/// A non-negative number of seconds
pub(crate) fn seconds(procedure: &str, value: &Value) -> Result<Duration> {
    let seconds = builtins::number(procedure, value)?;
    duration_from_secs(seconds).map_err(|err| SchemeError::invalid_argument(procedure, err.to_string()))
}

/// An optional timeout; absent or negative waits indefinitely
pub(crate) fn timeout(procedure: &str, value: Option<&Value>) -> Result<Option<Duration>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let seconds = builtins::number(procedure, value)?;
    if seconds < 0.0 {
        return Ok(None);
    }
    duration_from_secs(seconds)
        .map(Some)
        .map_err(|err| SchemeError::invalid_argument(procedure, err.to_string()))
}

pub(crate) fn descriptor(procedure: &str, value: &Value) -> Result<RawFd> {
    value
        .as_int()
        .and_then(|fd| RawFd::try_from(fd).ok())
        .filter(|fd| *fd >= 0)
        .ok_or_else(|| SchemeError::invalid_argument(procedure, format!("invalid descriptor {value}")))
}

pub(crate) fn length(procedure: &str, value: &Value) -> Result<usize> {
    let n = builtins::integer(procedure, value)?;
    usize::try_from(n).map_err(|_| {
        SchemeError::invalid_argument(procedure, format!("expected a non-negative length, got {n}"))
    })
}

/// Log an operational failure and produce the `#f` scripts see
pub(crate) fn failed(procedure: &str, err: impl Display) -> Value {
    debug!(target: "scheme", "({}) failed: {}", procedure, err);
    Value::Bool(false)
}
