//! Connects dispatcher watches to interpreted procedures.
//!
//! Every watch registered from Scheme gets its own trampoline. The procedure
//! and user data it will call live in the interpreter's protection table
//! until the watch is canceled, and the trampoline only keeps a weak
//! reference to the interpreter itself.

use std::os::unix::io::RawFd;
use std::rc::Weak;
use std::time::Duration;

use anyhow::{anyhow, Context};
use ioxide_reactor::{Dispatcher, Interest, Reason, WatchId};
use tracing::{debug, trace, warn};

use crate::context::{Token, WatchEntry};
use crate::eval::Interpreter;
use crate::value::Value;

/// Which kind of watch to register
#[derive(Debug, Clone, Copy)]
pub enum WatchRequest {
    After(Duration),
    Every { delay: Duration, interval: Duration },
    Io { fd: RawFd, interest: Interest },
    Idle,
}

struct Trampoline {
    interp: Weak<Interpreter>,
    token: Token,
    function: u64,
    user: u64,
}

impl Trampoline {
    fn invoke(&self, watch: WatchId, reason: Reason) -> anyhow::Result<()> {
        let Some(interp) = self.interp.upgrade() else {
            // Whatever the trampoline kept alive went away with the interpreter
            if reason == Reason::Cancel {
                return Ok(());
            }
            return Err(anyhow!("interpreter for watch {watch} no longer exists"));
        };

        if reason == Reason::Cancel {
            self.release(&interp);
            return Ok(());
        }

        let context = interp.context();
        let function = context
            .retrieve(self.function)
            .with_context(|| format!("callback of {}", self.token))?;
        let user = context
            .retrieve(self.user)
            .with_context(|| format!("user data of {}", self.token))?;

        trace!(target: "scheme", "{} fired ({})", self.token, reason);
        let args = vec![Value::Handle(self.token), user, Value::Int(reason.code())];
        if let Err(err) = interp.apply(&function, args) {
            warn!(target: "scheme", "Callback for {} ({}) failed: {}", self.token, reason, err);
            return Err(err.into());
        }
        Ok(())
    }

    fn release(&self, interp: &Interpreter) {
        let context = interp.context();
        for id in [self.function, self.user] {
            if let Err(err) = context.unprotect(id) {
                warn!(target: "scheme", "Releasing {}: {}", self.token, err);
            }
        }
        context.handles_mut().remove_watch(self.token);
        debug!(target: "scheme", "Released {}", self.token);
    }
}

/// Register a watch on the dispatcher behind `dispatcher` that calls
/// `(function watch user reason)` whenever it fires.
///
/// On failure nothing stays registered or protected.
pub fn register(
    interp: &Interpreter,
    dispatcher: Token,
    function: Value,
    user: Value,
    request: WatchRequest,
) -> anyhow::Result<Token> {
    let context = interp.context();
    let handle = context
        .handles()
        .dispatcher(dispatcher)
        .ok_or_else(|| anyhow!("{dispatcher} is not a live dispatcher"))?;

    let function_id = context.protect(function);
    let user_id = context.protect(user);
    let token = context.handles_mut().add_watch(WatchEntry {
        dispatcher,
        handle: handle.clone(),
        id: None,
    });

    let trampoline = Trampoline {
        interp: interp.weak(),
        token,
        function: function_id,
        user: user_id,
    };
    let callback =
        move |_: &Dispatcher, watch: WatchId, reason: Reason| trampoline.invoke(watch, reason);

    let registered = match request {
        WatchRequest::After(delay) => handle.after(delay, callback),
        WatchRequest::Every { delay, interval } => handle.every(delay, interval, callback),
        WatchRequest::Io { fd, interest } => handle.on_io(fd, interest, callback),
        WatchRequest::Idle => handle.when_idle(callback),
    };

    match registered {
        Ok(id) => {
            if let Some(entry) = context.handles_mut().watch_mut(token) {
                entry.id = Some(id);
            }
            debug!(target: "scheme", "{} is watch {} ({:?})", token, id, request);
            Ok(token)
        }
        Err(err) => {
            context.handles_mut().remove_watch(token);
            let _ = context.unprotect(function_id);
            let _ = context.unprotect(user_id);
            Err(err.into())
        }
    }
}

/// Cancel a watch registered through [`register`]
pub fn cancel(interp: &Interpreter, watch: Token) -> anyhow::Result<()> {
    let (dispatcher, id) = {
        let handles = interp.context().handles();
        let entry = handles
            .watch(watch)
            .ok_or_else(|| anyhow!("{watch} is not a live watch"))?;
        let id = entry
            .id
            .ok_or_else(|| anyhow!("{watch} is still being registered"))?;
        (entry.handle.clone(), id)
    };
    dispatcher.cancel(id)?;
    Ok(())
}

/// The dispatcher token a watch was registered on
pub fn dispatcher_of(interp: &Interpreter, watch: Token) -> Option<Token> {
    interp
        .context()
        .handles()
        .watch(watch)
        .map(|entry| entry.dispatcher)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn setup() -> (Rc<Interpreter>, Dispatcher, Token) {
        let interp = Interpreter::new();
        let dispatcher = Dispatcher::new();
        let token = interp.context().handles_mut().add_dispatcher(dispatcher.clone());
        (interp, dispatcher, token)
    }

    #[test]
    fn test_fire_passes_watch_user_and_reason() {
        let (interp, dispatcher, dp) = setup();
        interp.eval_str("(define seen '())").unwrap();
        let function = interp
            .eval_str("(lambda (watch user reason) (set! seen (cons (list user reason) seen)))")
            .unwrap();

        let token = register(
            &interp,
            dp,
            function,
            Value::string("data"),
            WatchRequest::After(Duration::ZERO),
        )
        .unwrap();
        assert_eq!(interp.context().protected_count(), 2);

        dispatcher.monitor(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(interp.lookup("seen").unwrap().to_string(), "((\"data\" 8))");

        // The single-shot expiry released everything
        assert_eq!(interp.context().protected_count(), 0);
        assert!(interp.context().handles().watch(token).is_none());
        dispatcher.destroy().unwrap();
    }

    #[test]
    fn test_cancel_releases_both_entries() {
        let (interp, dispatcher, dp) = setup();
        let function = interp.eval_str("(lambda args #t)").unwrap();
        let token = register(&interp, dp, function, Value::Nil, WatchRequest::Idle).unwrap();
        assert_eq!(interp.context().protected_count(), 2);
        assert_eq!(dispatcher_of(&interp, token), Some(dp));

        cancel(&interp, token).unwrap();
        assert_eq!(interp.context().protected_count(), 0);
        assert_eq!(dispatcher.watch_count(), 0);
        assert!(cancel(&interp, token).is_err());
        assert!(dispatcher_of(&interp, token).is_none());
    }

    #[test]
    fn test_destroy_releases_entries() {
        let (interp, dispatcher, dp) = setup();
        let function = interp.eval_str("(lambda args #t)").unwrap();
        for _ in 0..3 {
            register(&interp, dp, function.clone(), Value::Nil, WatchRequest::Idle).unwrap();
        }
        assert_eq!(interp.context().protected_count(), 6);

        dispatcher.destroy().unwrap();
        assert_eq!(interp.context().protected_count(), 0);
        assert_eq!(interp.context().handles().watch_count(), 0);
    }

    #[test]
    fn test_failed_registration_leaves_nothing_behind() {
        let (interp, dispatcher, dp) = setup();
        dispatcher.destroy().unwrap();
        let function = interp.eval_str("(lambda args #t)").unwrap();
        assert!(register(&interp, dp, function, Value::Nil, WatchRequest::Idle).is_err());
        assert_eq!(interp.context().protected_count(), 0);
        assert_eq!(interp.context().handles().watch_count(), 0);
    }

    #[test]
    fn test_shutdown_cancels_owned_watches() {
        let (interp, dispatcher, dp) = setup();
        let function = interp.eval_str("(lambda args #t)").unwrap();
        register(&interp, dp, function, Value::Nil, WatchRequest::Idle).unwrap();

        let other = Interpreter::new();
        let other_dp = other.context().handles_mut().add_dispatcher(dispatcher.clone());
        let function = other.eval_str("(lambda args #t)").unwrap();
        register(&other, other_dp, function, Value::Nil, WatchRequest::Idle).unwrap();
        assert_eq!(dispatcher.watch_count(), 2);

        interp.shutdown();
        assert_eq!(dispatcher.watch_count(), 1);
        assert_eq!(other.context().protected_count(), 2);
        dispatcher.destroy().unwrap();
    }

    #[test]
    fn test_dropped_interpreter_reports_error_on_fire() {
        let interp = Interpreter::new();
        let dispatcher = Dispatcher::new();
        let dp = interp.context().handles_mut().add_dispatcher(dispatcher.clone());
        let function = interp.eval_str("(lambda args #t)").unwrap();
        register(&interp, dp, function, Value::Nil, WatchRequest::Idle).unwrap();

        // Dropping cancels the watch, so nothing is left to fire
        drop(interp);
        assert_eq!(dispatcher.watch_count(), 0);

        let trampoline = Trampoline {
            interp: Weak::new(),
            token: dp,
            function: 1,
            user: 2,
        };
        let id = dispatcher.when_idle(|_, _, _| Ok(())).unwrap();
        assert!(trampoline.invoke(id, Reason::Idle).is_err());
        assert!(trampoline.invoke(id, Reason::Cancel).is_ok());
        dispatcher.destroy().unwrap();
    }
}
