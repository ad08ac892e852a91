use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use ioxide_reactor::Dispatcher;
use ioxide_server::{ServerSettings, SessionServer};

const PROMPT: &str = "> ";

fn settings() -> ServerSettings {
    ServerSettings {
        listen: "0@127.0.0.1".to_string(),
        ..ServerSettings::default()
    }
}

fn pump(dispatcher: &Dispatcher) {
    dispatcher.monitor(Some(Duration::from_millis(50))).unwrap();
}

struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(server: &SessionServer) -> Self {
        let port = server.local_port().unwrap();
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut client = Client { stream };
        pump(server.dispatcher());
        assert_eq!(client.read_reply(server), "");
        client
    }

    fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
    }

    /// Pump the dispatcher until the next prompt arrives and return what came
    /// before it
    fn read_reply(&mut self, server: &SessionServer) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        while !received.ends_with(PROMPT.as_bytes()) {
            assert!(Instant::now() < deadline, "no prompt in {:?}", received);
            match self.stream.read(&mut chunk) {
                Ok(0) => panic!("session closed the connection"),
                Ok(count) => received.extend_from_slice(&chunk[..count]),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    pump(server.dispatcher())
                }
                Err(err) => panic!("read failed: {err}"),
            }
        }
        received.truncate(received.len() - PROMPT.len());
        String::from_utf8(received).unwrap()
    }

    fn eval(&mut self, server: &SessionServer, line: &str) -> String {
        self.send(line);
        pump(server.dispatcher());
        self.read_reply(server)
    }
}

#[test]
fn test_sessions_are_isolated() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();

    let mut a = Client::connect(&server);
    let mut b = Client::connect(&server);
    assert_eq!(server.session_count(), 2);

    assert_eq!(a.eval(&server, "(define x 'from-a)"), "x\n");
    assert_eq!(a.eval(&server, "x"), "from-a\n");
    assert_eq!(b.eval(&server, "x"), "error: unbound variable: x\n");

    assert_eq!(b.eval(&server, "(define x 'from-b)"), "x\n");
    assert_eq!(a.eval(&server, "x"), "from-a\n");
    assert_eq!(b.eval(&server, "x"), "from-b\n");
}

#[test]
fn test_dropped_connection_leaves_others_running() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();
    let listening = server.listening_watch().unwrap();

    let a = Client::connect(&server);
    let mut b = Client::connect(&server);
    assert_eq!(server.session_count(), 2);
    // Listening watch plus one read watch per session
    assert_eq!(dispatcher.watch_count(), 3);

    drop(a);
    pump(&dispatcher);

    assert_eq!(server.session_count(), 1);
    assert_eq!(dispatcher.watch_count(), 2);
    assert_eq!(server.listening_watch(), Some(listening));
    assert!(dispatcher.contains(listening));
    assert_eq!(b.eval(&server, "(+ 1 2)"), "3\n");

    let mut c = Client::connect(&server);
    assert_eq!(server.session_count(), 2);
    assert_eq!(c.eval(&server, "(string-append \"still\" \" here\")"), "\"still here\"\n");
}

#[test]
fn test_session_watches_end_with_the_session() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();

    let mut a = Client::connect(&server);
    assert_eq!(
        a.eval(&server, "(define w (iox-every G-DISPATCHER (lambda args #t) #f 60 60))"),
        "w\n"
    );
    assert_eq!(dispatcher.watch_count(), 3);

    drop(a);
    pump(&dispatcher);
    assert_eq!(server.session_count(), 0);
    assert_eq!(dispatcher.watch_count(), 1);
}

#[test]
fn test_timer_output_reaches_its_session() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();

    let mut a = Client::connect(&server);
    a.send("(iox-after G-DISPATCHER (lambda (w u r) (display u) (newline)) \"tick\" 0.2)");
    pump(&dispatcher);
    // The watch handle is echoed with a prompt; the timer writes later
    let reply = a.read_reply(&server);
    assert!(reply.starts_with("#<watch"), "{reply}");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    let mut chunk = [0u8; 64];
    while !received.ends_with(b"tick\n") {
        assert!(Instant::now() < deadline, "no timer output in {:?}", received);
        match a.stream.read(&mut chunk) {
            Ok(count) => received.extend_from_slice(&chunk[..count]),
            Err(_) => pump(&dispatcher),
        }
    }
}

#[test]
fn test_init_file_runs_for_each_session() {
    let mut init = tempfile::NamedTempFile::new().unwrap();
    writeln!(init, "(define greeting \"hello\")").unwrap();

    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(
        &dispatcher,
        &ServerSettings {
            init_file: Some(init.path().to_path_buf()),
            ..settings()
        },
    )
    .unwrap();

    let mut a = Client::connect(&server);
    let mut b = Client::connect(&server);
    assert_eq!(a.eval(&server, "greeting"), "\"hello\"\n");
    assert_eq!(a.eval(&server, "(set! greeting \"changed\")"), "");
    assert_eq!(b.eval(&server, "greeting"), "\"hello\"\n");
}

#[test]
fn test_broken_init_file_rejects_only_that_session() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(
        &dispatcher,
        &ServerSettings {
            init_file: Some(dir.path().join("missing.scm")),
            ..settings()
        },
    )
    .unwrap();

    let port = server.local_port().unwrap();
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    pump(&dispatcher);

    assert_eq!(server.session_count(), 0);
    assert!(server.listening_watch().is_some());
    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_destroying_dispatcher_closes_sessions() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();
    let _a = Client::connect(&server);
    let _b = Client::connect(&server);

    dispatcher.destroy().unwrap();
    assert_eq!(server.session_count(), 0);
    assert!(server.listening_watch().is_none());
}

#[test]
fn test_session_cannot_destroy_shared_dispatcher() {
    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &settings()).unwrap();
    let mut a = Client::connect(&server);
    let mut b = Client::connect(&server);

    assert_eq!(a.eval(&server, "(iox-destroy G-DISPATCHER)"), "#f\n");
    assert!(!dispatcher.is_destroyed());
    assert_eq!(server.session_count(), 2);
    assert_eq!(b.eval(&server, "(+ 2 2)"), "4\n");
}
