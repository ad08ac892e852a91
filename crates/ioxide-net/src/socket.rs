//! Queries and settings on raw socket descriptors, for scripts that watch a
//! descriptor with `iox-onio` without going through an endpoint.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::Duration;

use ioxide_reactor::{sys, Interest};

use crate::error::Result;

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Decode a `sockaddr_storage` filled in by the kernel
fn from_storage(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            // SAFETY: the family says the storage holds a sockaddr_in, and
            // sockaddr_storage is large and aligned enough for it.
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(addr.sin_port)))
        }
        libc::AF_INET6 => {
            // SAFETY: as above, for sockaddr_in6.
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::new(IpAddr::V6(ip), u16::from_be(addr.sin6_port)))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not an internet socket",
        )),
    }
}

type AddrQuery = unsafe extern "C" fn(
    libc::c_int,
    *mut libc::sockaddr,
    *mut libc::socklen_t,
) -> libc::c_int;

fn query_addr(fd: RawFd, query: AddrQuery) -> io::Result<SocketAddr> {
    // SAFETY: an all-zero sockaddr_storage is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: `storage` and `len` describe a writable buffer of the right size.
    check(unsafe { query(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) })?;
    from_storage(&storage)
}

/// Address of the host at the other end of a connected socket
pub fn peer(fd: RawFd) -> Result<IpAddr> {
    Ok(query_addr(fd, libc::getpeername)?.ip())
}

/// Port a listening or data socket is bound to
pub fn port(fd: RawFd) -> Result<u16> {
    Ok(query_addr(fd, libc::getsockname)?.port())
}

pub fn is_readable(fd: RawFd) -> bool {
    sys::poll_one(fd, Interest::READ, Some(Duration::ZERO)).unwrap_or(false)
}

pub fn is_writeable(fd: RawFd) -> bool {
    sys::poll_one(fd, Interest::WRITE, Some(Duration::ZERO)).unwrap_or(false)
}

/// False once the peer has closed the connection or the socket has failed.
/// Pending input is left in place.
pub fn is_up(fd: RawFd) -> bool {
    let mut peek = [0u8; 1];
    // SAFETY: `peek` is a writable one-byte buffer.
    let rc = unsafe {
        libc::recv(
            fd,
            peek.as_mut_ptr() as *mut libc::c_void,
            peek.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match rc {
        0 => false,
        n if n > 0 => true,
        _ => matches!(
            io::Error::last_os_error().kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    }
}

fn set_buffer(fd: RawFd, option: libc::c_int, size: usize) -> io::Result<()> {
    let size = libc::c_int::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer size too large"))?;
    // SAFETY: the option value points at a live c_int of the stated length.
    check(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &size as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
}

/// Resize the kernel receive and send buffers; `None` leaves one unchanged
pub fn set_buffers(fd: RawFd, receive: Option<usize>, send: Option<usize>) -> Result<()> {
    if let Some(size) = receive {
        set_buffer(fd, libc::SO_RCVBUF, size)?;
    }
    if let Some(size) = send {
        set_buffer(fd, libc::SO_SNDBUF, size)?;
    }
    Ok(())
}

fn connect_raw(fd: RawFd, addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: an all-zero sockaddr_in is a valid value.
            let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
            raw.sin_family = libc::AF_INET as libc::sa_family_t;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr = libc::in_addr {
                s_addr: u32::from(*v4.ip()).to_be(),
            };
            // SAFETY: `raw` is a complete sockaddr_in of the stated length.
            unsafe {
                libc::connect(
                    fd,
                    &raw as *const _ as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            // SAFETY: an all-zero sockaddr_in6 is a valid value.
            let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            raw.sin6_port = v6.port().to_be();
            raw.sin6_addr.s6_addr = v6.ip().octets();
            raw.sin6_flowinfo = v6.flowinfo();
            raw.sin6_scope_id = v6.scope_id();
            // SAFETY: `raw` is a complete sockaddr_in6 of the stated length.
            unsafe {
                libc::connect(
                    fd,
                    &raw as *const _ as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    }
}

/// Start connecting to `addr` without waiting. The stream comes back in
/// non-blocking mode with the connection possibly still in progress.
pub(crate) fn start_connect(addr: &SocketAddr) -> io::Result<TcpStream> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    // SAFETY: plain socket creation; the result is checked below.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    check(fd)?;
    // SAFETY: `fd` is a freshly created socket that nothing else owns.
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    // SAFETY: `fd` stays open for as long as `stream` lives.
    check(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    stream.set_nonblocking(true)?;

    if connect_raw(fd, addr) < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            return Err(err);
        }
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    use super::*;

    #[test]
    fn test_peer_and_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bound = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", bound)).unwrap();

        assert_eq!(port(listener.as_raw_fd()).unwrap(), bound);
        assert_eq!(peer(client.as_raw_fd()).unwrap(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(peer(listener.as_raw_fd()).is_err());
    }

    #[test]
    fn test_up_and_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        assert!(is_up(accepted.as_raw_fd()));
        assert!(!is_readable(accepted.as_raw_fd()));
        assert!(is_writeable(accepted.as_raw_fd()));

        drop(client);
        assert!(sys::poll_one(accepted.as_raw_fd(), Interest::READ, Some(Duration::from_secs(2))).unwrap());
        assert!(is_readable(accepted.as_raw_fd()));
        assert!(!is_up(accepted.as_raw_fd()));
    }

    #[test]
    fn test_set_buffers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();
        set_buffers(fd, Some(16 * 1024), None).unwrap();
        set_buffers(fd, None, Some(16 * 1024)).unwrap();
        assert!(set_buffers(-1, Some(1024), None).is_err());
    }

    #[test]
    fn test_start_connect_finishes_later() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = start_connect(&listener.local_addr().unwrap()).unwrap();
        assert!(sys::poll_one(stream.as_raw_fd(), Interest::WRITE, Some(Duration::from_secs(2))).unwrap());
        assert!(stream.take_error().unwrap().is_none());
        assert!(listener.accept().is_ok());
    }
}
