//! Session multiplexer: one listening watch on a shared dispatcher, and per
//! accepted connection one interpreter driven by a read watch.
//!
//! A session goes `Accepted → Active → Closed`. It is torn down when its
//! connection drops or its watch is canceled, which leaves the listening
//! watch and other sessions alone.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use ioxide_net::{Endpoint, LineStream, LineStreamOptions};
use ioxide_reactor::{Dispatcher, Interest, Reason, WatchId};
use ioxide_scheme::{bind_dispatcher, Interpreter, Value};
use tracing::{debug, info, warn};

use crate::config::ServerSettings;
use crate::error::{Result, ServerError};

/// Global name of the shared dispatcher in every session
pub const DISPATCHER_GLOBAL: &str = "G-DISPATCHER";

/// Wait for the first byte of a line; readiness was already reported
const LINE_TIMEOUT: Duration = Duration::ZERO;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Accepted,
    Active,
    Closed,
}

struct Session {
    id: u64,
    name: String,
    interp: Rc<Interpreter>,
    stream: RefCell<Option<LineStream>>,
    watch: Cell<Option<WatchId>>,
    state: Cell<SessionState>,
}

impl Session {
    fn write(&self, text: &str) {
        if let Err(err) = self.interp.write_output(text) {
            debug!(target: "session", "Session {} write failed: {}", self.id, err);
        }
    }

    /// Evaluate one line and echo its value, or the error, back to the client
    fn eval_line(&self, line: &str, prompt: &str) {
        if !line.trim().is_empty() {
            match self.interp.eval_str(line) {
                Ok(Value::Unspecified) => {}
                Ok(value) => self.write(&format!("{value}\n")),
                Err(err) => self.write(&format!("error: {err}\n")),
            }
        }
        self.write(prompt);
    }

    /// The next buffered or pending line, if any
    fn next_line(&self) -> Option<String> {
        let mut stream = self.stream.borrow_mut();
        let stream = stream.as_mut()?;
        if !stream.is_readable() {
            return None;
        }
        match stream.get_line(Some(LINE_TIMEOUT)) {
            Ok(line) => Some(line),
            Err(err) => {
                debug!(target: "session", "Session {} stopped reading: {}", self.id, err);
                None
            }
        }
    }

    fn is_up(&self) -> bool {
        self.stream
            .borrow()
            .as_ref()
            .is_some_and(|stream| stream.is_up())
    }
}

struct Inner {
    me: Weak<Inner>,
    dispatcher: Dispatcher,
    listener: Endpoint,
    prompt: String,
    init_file: Option<PathBuf>,
    listening: Cell<Option<WatchId>>,
    sessions: RefCell<BTreeMap<u64, Rc<Session>>>,
    next_session: Cell<u64>,
}

/// Accepts connections and runs a REPL session for each on a shared
/// dispatcher. Driving the dispatcher is up to the caller.
pub struct SessionServer {
    inner: Rc<Inner>,
}

impl SessionServer {
    /// Listen according to `settings` and register the listening watch
    pub fn start(dispatcher: &Dispatcher, settings: &ServerSettings) -> Result<Self> {
        let listener = Endpoint::listen(&settings.listen, settings.backlog)?;
        let fd = listener.fd();
        let inner = Rc::new_cyclic(|me| Inner {
            me: me.clone(),
            dispatcher: dispatcher.clone(),
            listener,
            prompt: settings.prompt.clone(),
            init_file: settings.init_file.clone(),
            listening: Cell::new(None),
            sessions: RefCell::new(BTreeMap::new()),
            next_session: Cell::new(1),
        });

        let weak = Rc::downgrade(&inner);
        let id = dispatcher.on_io(fd, Interest::READ, move |_, id, reason| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            match reason {
                Reason::Cancel => {
                    inner.listening.set(None);
                    info!(target: "session", "Stopped listening on {}", inner.listener.name());
                }
                _ => inner.accept(id),
            }
            Ok(())
        })?;
        inner.listening.set(Some(id));

        info!(target: "session", "Accepting sessions on {}", inner.listener.name());
        Ok(Self { inner })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// `port@address` of the listening socket
    pub fn name(&self) -> &str {
        self.inner.listener.name()
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.inner.listener.port()?)
    }

    pub fn listening_watch(&self) -> Option<WatchId> {
        self.inner.listening.get()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.borrow().len()
    }

    /// Stop accepting and close every session
    pub fn stop(&self) {
        if let Some(id) = self.inner.listening.take() {
            if let Err(err) = self.inner.dispatcher.cancel(id) {
                debug!(target: "session", "Canceling listening watch: {}", err);
            }
        }
        let sessions: Vec<Rc<Session>> = self.inner.sessions.borrow().values().cloned().collect();
        for session in sessions {
            self.inner.close(&session);
        }
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn accept(&self, listening: WatchId) {
        let endpoint = match self.listener.answer(Some(Duration::ZERO)) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                debug!(target: "session", "Nothing to accept on {}: {}", listening, err);
                return;
            }
        };
        let name = endpoint.name().to_string();
        if let Err(err) = self.open(endpoint) {
            warn!(target: "session", "Could not start session for {}: {}", name, err);
        }
    }

    /// Set up a session for a freshly accepted connection. On failure the
    /// connection and interpreter are dropped and nothing stays registered.
    fn open(&self, endpoint: Endpoint) -> Result<()> {
        let stream = LineStream::wrap(endpoint, LineStreamOptions::default())?;
        let writer = stream.writer()?;
        let fd = stream.fd();
        let name = stream.name().to_string();

        let interp = Interpreter::with_extensions();
        interp.set_output(Box::new(writer));
        if let Some(path) = &self.init_file {
            interp.load_file(path)?;
        }
        bind_dispatcher(&interp, DISPATCHER_GLOBAL, &self.dispatcher);

        let id = self.next_session.get();
        self.next_session.set(id + 1);
        let session = Rc::new(Session {
            id,
            name,
            interp,
            stream: RefCell::new(Some(stream)),
            watch: Cell::new(None),
            state: Cell::new(SessionState::Accepted),
        });

        session.write(&self.prompt);
        let me = self.me.clone();
        let target = Rc::downgrade(&session);
        let watch = self.dispatcher.on_io(fd, Interest::READ, move |_, _, reason| {
            let (Some(inner), Some(session)) = (me.upgrade(), target.upgrade()) else {
                return Ok(());
            };
            inner.on_read(&session, reason)?;
            Ok(())
        });
        let watch = match watch {
            Ok(watch) => watch,
            Err(err) => {
                session.interp.shutdown();
                return Err(ServerError::Setup(err.to_string()));
            }
        };

        session.watch.set(Some(watch));
        session.state.set(SessionState::Active);
        info!(
            target: "session",
            "Session {} opened for {} (watch {})",
            session.id,
            session.name,
            watch
        );
        self.sessions.borrow_mut().insert(session.id, session);
        Ok(())
    }

    /// Read handler for one session's connection
    fn on_read(&self, session: &Rc<Session>, reason: Reason) -> Result<()> {
        if reason == Reason::Cancel {
            session.watch.set(None);
            self.close(session);
            return Ok(());
        }
        if session.state.get() != SessionState::Active {
            return Ok(());
        }

        // Drain everything already buffered so the next poll does not report
        // the same data again
        while let Some(line) = session.next_line() {
            debug!(target: "session", "Session {} < {}", session.id, line);
            session.eval_line(&line, &self.prompt);
            if session.state.get() != SessionState::Active {
                return Ok(());
            }
        }

        if session.is_up() {
            return Ok(());
        }
        self.close(session);
        Err(ServerError::ConnectionBroken(session.name.clone()))
    }

    /// Tear a session down: close its output, cancel its watch, destroy the
    /// stream and shut the interpreter down. Safe to call more than once.
    fn close(&self, session: &Rc<Session>) {
        if session.state.replace(SessionState::Closed) == SessionState::Closed {
            return;
        }

        session.interp.close_output();
        if let Some(watch) = session.watch.take() {
            if let Err(err) = self.dispatcher.cancel(watch) {
                debug!(target: "session", "Canceling watch of session {}: {}", session.id, err);
            }
        }
        if let Some(stream) = session.stream.borrow_mut().take() {
            stream.destroy();
        }
        session.interp.shutdown();

        self.sessions.borrow_mut().remove(&session.id);
        info!(target: "session", "Session {} for {} closed", session.id, session.name);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;

    use ioxide_reactor::sys;

    use super::*;

    fn settings() -> ServerSettings {
        ServerSettings {
            listen: "0@127.0.0.1".to_string(),
            ..ServerSettings::default()
        }
    }

    #[test]
    fn test_start_registers_listening_watch() {
        let dispatcher = Dispatcher::new();
        let server = SessionServer::start(&dispatcher, &settings()).unwrap();
        let watch = server.listening_watch().unwrap();
        assert!(dispatcher.contains(watch));
        assert!(server.local_port().unwrap() > 0);
        assert_eq!(server.session_count(), 0);

        server.stop();
        assert!(server.listening_watch().is_none());
        assert!(!dispatcher.contains(watch));
    }

    #[test]
    fn test_destroy_clears_listening_watch() {
        let dispatcher = Dispatcher::new();
        let server = SessionServer::start(&dispatcher, &settings()).unwrap();
        dispatcher.destroy().unwrap();
        assert!(server.listening_watch().is_none());
    }

    #[test]
    fn test_listen_failure_is_reported() {
        let dispatcher = Dispatcher::new();
        let bad = ServerSettings {
            listen: "not a service".to_string(),
            ..ServerSettings::default()
        };
        assert!(matches!(
            SessionServer::start(&dispatcher, &bad),
            Err(ServerError::Net(_))
        ));
        assert_eq!(dispatcher.watch_count(), 0);
    }

    #[test]
    fn test_read_handler_reports_broken_connection() {
        let dispatcher = Dispatcher::new();
        let server = SessionServer::start(&dispatcher, &settings()).unwrap();
        let client = TcpStream::connect(("127.0.0.1", server.local_port().unwrap())).unwrap();
        dispatcher.monitor(Some(Duration::from_millis(50))).unwrap();

        let session = server.inner.sessions.borrow().values().next().cloned().unwrap();
        assert_eq!(session.state.get(), SessionState::Active);
        let watch = session.watch.get().unwrap();
        let fd = session.stream.borrow().as_ref().unwrap().fd();

        drop(client);
        assert!(sys::poll_one(fd, Interest::READ, Some(Duration::from_secs(2))).unwrap());

        let result = server.inner.on_read(&session, Reason::Read);
        assert!(matches!(result, Err(ServerError::ConnectionBroken(_))), "{result:?}");
        assert_eq!(session.state.get(), SessionState::Closed);
        assert!(session.watch.get().is_none());
        assert!(!dispatcher.contains(watch));
        assert_eq!(server.session_count(), 0);

        // Torn down sessions ignore further events
        assert!(server.inner.on_read(&session, Reason::Read).is_ok());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Accepted.to_string(), "Accepted");
        assert_eq!(SessionState::Closed.to_string(), "Closed");
    }
}
