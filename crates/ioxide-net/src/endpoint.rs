use std::cell::Cell;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use ioxide_reactor::{sys, Interest};
use tracing::debug;

use crate::error::{NetError, Result};
use crate::socket;

/// Largest single read; asking for more returns a short read
pub const MAX_READ_SIZE: usize = 64 * 1024;

enum Socket {
    Listener(TcpListener),
    Data(TcpStream),
}

/// A TCP listening socket or data connection
pub struct Endpoint {
    socket: Socket,
    name: String,
    connecting: Cell<bool>,
}

/// Format an address the way endpoint names are shown: `port@host`
fn endpoint_name(addr: &SocketAddr) -> String {
    format!("{}@{}", addr.port(), addr.ip())
}

/// Resolve `"<port>"`, `"<port>@<host>"` or `"<host>:<port>"`.
fn resolve(service: &str, default_host: &str) -> Result<Vec<SocketAddr>> {
    let service = service.trim();
    if service.is_empty() {
        return Err(NetError::InvalidService(service.to_string()));
    }

    let target = if let Some((port, host)) = service.split_once('@') {
        let port: u16 = port
            .parse()
            .map_err(|_| NetError::InvalidService(service.to_string()))?;
        format!("{host}:{port}")
    } else if let Ok(port) = service.parse::<u16>() {
        format!("{default_host}:{port}")
    } else {
        service.to_string()
    };

    let addrs: Vec<SocketAddr> = target
        .to_socket_addrs()
        .map_err(|_| NetError::Resolve(service.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(NetError::Resolve(service.to_string()));
    }
    Ok(addrs)
}

impl Endpoint {
    /// Create a listening endpoint for `service` (a port, `port@host` or
    /// `host:port`) with room for `backlog` pending connections.
    pub fn listen(service: &str, backlog: u32) -> Result<Self> {
        let addrs = resolve(service, "0.0.0.0")?;
        let listener = TcpListener::bind(&addrs[..])?;

        // std picks its own backlog; listening again only resizes the queue.
        // SAFETY: the descriptor belongs to `listener`, which is alive here.
        let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog.max(1) as libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let name = endpoint_name(&listener.local_addr()?);
        debug!(target: "net", "Listening at {} (backlog {})", name, backlog);
        Ok(Self {
            socket: Socket::Listener(listener),
            name,
            connecting: Cell::new(false),
        })
    }

    /// Connect to a server. With `no_wait` the connection attempt is only
    /// started and [`Endpoint::complete`] finishes it.
    pub fn call(service: &str, no_wait: bool) -> Result<Self> {
        let addrs = resolve(service, "127.0.0.1")?;
        let mut last_error = None;
        for addr in addrs {
            let attempt = if no_wait {
                socket::start_connect(&addr)
            } else {
                TcpStream::connect(addr)
            };
            match attempt {
                Ok(stream) => {
                    let name = endpoint_name(&addr);
                    if no_wait {
                        debug!(target: "net", "Connecting to {}", name);
                    } else {
                        debug!(target: "net", "Connected to {}", name);
                    }
                    return Ok(Self {
                        socket: Socket::Data(stream),
                        name,
                        connecting: Cell::new(no_wait),
                    });
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error
            .map(NetError::from)
            .unwrap_or_else(|| NetError::Resolve(service.to_string())))
    }

    /// Wait at most `timeout` for a connection started by a no-wait
    /// [`Endpoint::call`] to be established. Already connected endpoints
    /// return at once.
    pub fn complete(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.connecting.get() {
            return Ok(());
        }
        let stream = self.data()?;
        if !sys::poll_one(stream.as_raw_fd(), Interest::WRITE, timeout)? {
            return Err(NetError::Timeout(self.name.clone()));
        }
        if let Some(err) = stream.take_error()? {
            return Err(err.into());
        }
        stream.set_nonblocking(false)?;
        self.connecting.set(false);
        debug!(target: "net", "Connected to {}", self.name);
        Ok(())
    }

    /// True while a no-wait connection attempt has not been completed
    pub fn is_connecting(&self) -> bool {
        self.connecting.get()
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let name = endpoint_name(&stream.peer_addr()?);
        Ok(Self {
            socket: Socket::Data(stream),
            name,
            connecting: Cell::new(false),
        })
    }

    /// Accept a pending connection on a listening endpoint, waiting at most
    /// `timeout` (`None` waits indefinitely).
    pub fn answer(&self, timeout: Option<Duration>) -> Result<Endpoint> {
        let Socket::Listener(listener) = &self.socket else {
            return Err(NetError::InvalidService(format!(
                "{} is not a listening endpoint",
                self.name
            )));
        };

        if !sys::poll_one(listener.as_raw_fd(), Interest::READ, timeout)? {
            return Err(NetError::Timeout(self.name.clone()));
        }

        let (stream, peer) = listener.accept()?;
        let name = endpoint_name(&peer);
        debug!(target: "net", "Accepted connection from {} on {}", name, self.name);
        Ok(Endpoint {
            socket: Socket::Data(stream),
            name,
            connecting: Cell::new(false),
        })
    }

    fn data(&self) -> Result<&TcpStream> {
        match &self.socket {
            Socket::Data(stream) => Ok(stream),
            Socket::Listener(_) => Err(NetError::NotConnected(self.name.clone())),
        }
    }

    /// Read up to `length` bytes (at most [`MAX_READ_SIZE`]), waiting at most
    /// `timeout` for the first byte
    pub fn read(&self, length: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let mut stream = self.data()?;
        if !sys::poll_one(stream.as_raw_fd(), Interest::READ, timeout)? {
            return Err(NetError::Timeout(self.name.clone()));
        }

        let mut buffer = vec![0u8; length.min(MAX_READ_SIZE)];
        let count = loop {
            match stream.read(&mut buffer) {
                Ok(0) if length > 0 => return Err(NetError::Closed(self.name.clone())),
                Ok(count) => break count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };
        buffer.truncate(count);
        Ok(buffer)
    }

    /// Write `data`, waiting at most `timeout` for the connection to accept it.
    ///
    /// Running out of time is not an error: the number of bytes written so
    /// far is returned, which may be zero with a zero timeout. `None` writes
    /// everything.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let mut stream = self.data()?;
        let Some(timeout) = timeout else {
            stream.write_all(data)?;
            return Ok(data.len());
        };

        let deadline = Instant::now() + timeout;
        stream.set_nonblocking(true)?;
        let mut written = 0;
        let result = loop {
            if written == data.len() {
                break Ok(written);
            }
            match stream.write(&data[written..]) {
                Ok(0) => break Err(NetError::Closed(self.name.clone())),
                Ok(count) => written += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break Ok(written);
                    }
                    match sys::poll_one(stream.as_raw_fd(), Interest::WRITE, Some(remaining)) {
                        Ok(true) => continue,
                        Ok(false) => break Ok(written),
                        Err(err) => break Err(err.into()),
                    }
                }
                Err(err) => break Err(err.into()),
            }
        };
        stream.set_nonblocking(false)?;

        if let Ok(count) = &result {
            if *count < data.len() {
                debug!(
                    target: "net",
                    "Partial write to {}: {} of {} bytes",
                    self.name,
                    count,
                    data.len()
                );
            }
        }
        result
    }

    /// True if input (or a pending connection) is waiting
    pub fn is_readable(&self) -> bool {
        socket::is_readable(self.fd())
    }

    pub fn is_writeable(&self) -> bool {
        socket::is_writeable(self.fd())
    }

    /// True if a listening endpoint has a connection request to answer
    pub fn has_pending_connection(&self) -> bool {
        self.is_listener() && self.is_readable()
    }

    /// True unless the peer has closed the connection or it has failed
    pub fn is_up(&self) -> bool {
        match &self.socket {
            Socket::Listener(_) => true,
            Socket::Data(_) if self.connecting.get() => true,
            Socket::Data(stream) => socket::is_up(stream.as_raw_fd()),
        }
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.socket, Socket::Listener(_))
    }

    pub fn fd(&self) -> RawFd {
        match &self.socket {
            Socket::Listener(listener) => listener.as_raw_fd(),
            Socket::Data(stream) => stream.as_raw_fd(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local port of the socket
    pub fn port(&self) -> Result<u16> {
        let addr = match &self.socket {
            Socket::Listener(listener) => listener.local_addr()?,
            Socket::Data(stream) => stream.local_addr()?,
        };
        Ok(addr.port())
    }

    /// A second handle on the data connection, for use as an output sink
    pub fn try_clone_stream(&self) -> Result<TcpStream> {
        Ok(self.data()?.try_clone()?)
    }

    /// Shut down a data connection in both directions
    pub fn shutdown(&self) {
        if let Socket::Data(stream) = &self.socket {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("listener", &self.is_listener())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Endpoint, Endpoint, Endpoint) {
        let server = Endpoint::listen("0@127.0.0.1", 4).unwrap();
        let port = server.port().unwrap();
        let client = Endpoint::call(&port.to_string(), false).unwrap();
        let accepted = server.answer(Some(Duration::from_secs(2))).unwrap();
        (server, client, accepted)
    }

    #[test]
    fn test_resolve_forms() {
        let addrs = resolve("8080", "127.0.0.1").unwrap();
        assert_eq!(addrs[0].port(), 8080);
        let addrs = resolve("8081@127.0.0.1", "0.0.0.0").unwrap();
        assert_eq!(addrs[0], "127.0.0.1:8081".parse().unwrap());
        let addrs = resolve("127.0.0.1:8082", "0.0.0.0").unwrap();
        assert_eq!(addrs[0].port(), 8082);
        assert!(matches!(resolve("", "0.0.0.0"), Err(NetError::InvalidService(_))));
        assert!(matches!(resolve("abc@127.0.0.1", "0.0.0.0"), Err(NetError::InvalidService(_))));
    }

    #[test]
    fn test_listen_answer_and_transfer() {
        let (server, client, accepted) = pair();
        assert!(server.is_listener());
        assert!(!accepted.is_listener());
        assert!(!accepted.is_readable());

        assert_eq!(client.write(b"hello", None).unwrap(), 5);
        let data = accepted.read(16, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(data, b"hello");
        assert!(accepted.is_up());
        assert!(accepted.is_writeable());
    }

    #[test]
    fn test_oversized_read_is_short() {
        let (_server, client, accepted) = pair();
        client.write(b"abc", None).unwrap();
        let data = accepted.read(usize::MAX, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(data, b"abc");
    }

    #[test]
    fn test_no_wait_call_completes() {
        let server = Endpoint::listen("0@127.0.0.1", 4).unwrap();
        let port = server.port().unwrap();
        assert!(!server.has_pending_connection());

        let client = Endpoint::call(&format!("{port}@127.0.0.1"), true).unwrap();
        assert!(client.is_connecting());
        assert!(client.is_up());
        client.complete(Some(Duration::from_secs(2))).unwrap();
        assert!(!client.is_connecting());
        // Completing twice is harmless
        client.complete(Some(Duration::ZERO)).unwrap();

        assert!(sys::poll_one(server.fd(), Interest::READ, Some(Duration::from_secs(2))).unwrap());
        assert!(server.has_pending_connection());
        let accepted = server.answer(Some(Duration::ZERO)).unwrap();
        assert!(!accepted.has_pending_connection());

        assert_eq!(client.write(b"done", None).unwrap(), 4);
        let data = accepted.read(4, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(data, b"done");
    }

    #[test]
    fn test_no_wait_call_to_closed_port_fails() {
        let port = {
            let server = Endpoint::listen("0@127.0.0.1", 1).unwrap();
            server.port().unwrap()
        };
        match Endpoint::call(&format!("{port}@127.0.0.1"), true) {
            Ok(client) => assert!(client.complete(Some(Duration::from_secs(2))).is_err()),
            Err(err) => assert!(matches!(err, NetError::Io(_)), "{err}"),
        }
    }

    #[test]
    fn test_answer_times_out_without_client() {
        let server = Endpoint::listen("0@127.0.0.1", 1).unwrap();
        assert!(matches!(
            server.answer(Some(Duration::from_millis(10))),
            Err(NetError::Timeout(_))
        ));
    }

    #[test]
    fn test_peer_close_is_detected() {
        let (_server, client, accepted) = pair();
        client.shutdown();
        drop(client);

        assert!(sys::poll_one(accepted.fd(), Interest::READ, Some(Duration::from_secs(2))).unwrap());
        assert!(!accepted.is_up());
        assert!(matches!(
            accepted.read(8, Some(Duration::ZERO)),
            Err(NetError::Closed(_))
        ));
    }

    #[test]
    fn test_listener_cannot_transfer() {
        let server = Endpoint::listen("0@127.0.0.1", 1).unwrap();
        assert!(matches!(server.write(b"x", None), Err(NetError::NotConnected(_))));
    }

    #[test]
    fn test_zero_timeout_write_returns_count() {
        let (_server, client, _accepted) = pair();
        let written = client.write(b"ping", Some(Duration::ZERO)).unwrap();
        assert!(written <= 4);
    }
}
