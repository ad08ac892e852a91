//! Thin wrapper over `poll(2)`, the dispatcher's only blocking call.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::reason::Interest;

/// One descriptor to wait on, and what it reported
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub fd: RawFd,
    pub interest: Interest,
    pub ready: Interest,
}

impl PollFd {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            ready: Interest::empty(),
        }
    }
}

fn to_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.contains(Interest::READ) {
        events |= libc::POLLIN;
    }
    if interest.contains(Interest::WRITE) {
        events |= libc::POLLOUT;
    }
    if interest.contains(Interest::EXCEPT) {
        events |= libc::POLLPRI;
    }
    events
}

/// Hang-ups and errors are reported as every condition the caller asked for,
/// so the handler gets a chance to notice the broken descriptor.
fn from_revents(revents: libc::c_short, interest: Interest) -> Interest {
    let mut ready = Interest::empty();
    if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
        ready |= Interest::READ;
    }
    if revents & (libc::POLLOUT | libc::POLLERR | libc::POLLNVAL) != 0 {
        ready |= Interest::WRITE;
    }
    if revents & (libc::POLLPRI | libc::POLLNVAL) != 0 {
        ready |= Interest::EXCEPT;
    }
    ready & interest
}

/// Round up so a wait never returns just short of a timer deadline.
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(timeout) => {
            let mut millis = timeout.as_millis();
            if Duration::from_millis(millis as u64) < timeout {
                millis += 1;
            }
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Wait until one of `fds` is ready or `timeout` elapses (`None` waits forever).
///
/// Returns the number of descriptors with a non-empty `ready` set. An
/// interrupted wait reports zero ready descriptors rather than an error.
pub fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = fds
        .iter()
        .map(|entry| libc::pollfd {
            fd: entry.fd,
            events: to_events(entry.interest),
            revents: 0,
        })
        .collect();

    // SAFETY: `raw` is a live, correctly sized buffer of pollfd structs for
    // the duration of the call.
    let rc = unsafe {
        libc::poll(
            raw.as_mut_ptr(),
            raw.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    let mut count = 0;
    for (entry, raw) in fds.iter_mut().zip(raw.iter()) {
        entry.ready = from_revents(raw.revents, entry.interest);
        if !entry.ready.is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Wait on a single descriptor; true if any requested condition is ready.
pub fn poll_one(fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
    let mut fds = [PollFd::new(fd, interest)];
    Ok(poll(&mut fds, timeout)? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1500))), 2);
        assert_eq!(timeout_millis(Some(Duration::from_millis(3))), 3);
    }

    #[test]
    fn test_poll_reports_readable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!poll_one(b.as_raw_fd(), Interest::READ, Some(Duration::ZERO)).unwrap());

        a.write_all(b"x").unwrap();
        assert!(poll_one(b.as_raw_fd(), Interest::READ, Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn test_poll_reports_writable() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut fds = [PollFd::new(a.as_raw_fd(), Interest::READ | Interest::WRITE)];
        assert_eq!(poll(&mut fds, Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(fds[0].ready, Interest::WRITE);
    }
}
