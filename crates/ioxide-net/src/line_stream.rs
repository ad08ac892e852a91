use std::net::TcpStream;
use std::os::unix::io::RawFd;
use std::time::Duration;

use ioxide_reactor::{sys, Interest};
use tracing::{debug, trace};

use crate::endpoint::{Endpoint, MAX_READ_SIZE};
use crate::error::{NetError, Result};

pub const DEFAULT_INPUT_SIZE: usize = 2048;
pub const DEFAULT_MAX_OUTPUT: usize = 2047;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStreamOptions {
    /// Bytes pulled from the socket per read; not a limit on line length
    pub input_size: usize,
    /// Longest line `put_line` accepts, terminator excluded
    pub max_output: usize,
}

impl Default for LineStreamOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl LineStreamOptions {
    /// Parse a command-line style option string such as
    /// `"-input 4096 -output 1023"`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut options = Self::default();
        let mut words = text.split_whitespace();
        while let Some(word) = words.next() {
            let slot = match word {
                "-input" => &mut options.input_size,
                "-output" => &mut options.max_output,
                other => return Err(NetError::InvalidOption(other.to_string())),
            };
            let value = words
                .next()
                .ok_or_else(|| NetError::InvalidOption(format!("{word} needs a value")))?;
            let limit = if word == "-input" { MAX_READ_SIZE } else { usize::MAX };
            *slot = value
                .parse::<usize>()
                .ok()
                .filter(|size| (1..=limit).contains(size))
                .ok_or_else(|| NetError::InvalidOption(format!("{word} {value}")))?;
        }
        Ok(options)
    }
}

/// LF-terminated line framing on top of a data [`Endpoint`]
pub struct LineStream {
    endpoint: Endpoint,
    options: LineStreamOptions,
    buffer: Vec<u8>,
    eof: bool,
}

impl LineStream {
    /// Layer a stream over `endpoint`, taking ownership of it
    pub fn wrap(endpoint: Endpoint, options: LineStreamOptions) -> Result<Self> {
        if endpoint.is_listener() {
            return Err(NetError::NotConnected(endpoint.name().to_string()));
        }
        debug!(target: "net", "Wrapped {} in a line stream ({:?})", endpoint.name(), options);
        Ok(Self {
            endpoint,
            options,
            buffer: Vec::with_capacity(options.input_size),
            eof: false,
        })
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Pull whatever the socket has into the buffer, blocking for at most
    /// `timeout`. Returns false on timeout.
    fn fill(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !sys::poll_one(self.endpoint.fd(), Interest::READ, timeout)? {
            return Ok(false);
        }
        match self.endpoint.read(self.options.input_size, Some(Duration::ZERO)) {
            Ok(data) => {
                trace!(target: "net", "{}: buffered {} bytes", self.endpoint.name(), data.len());
                self.buffer.extend_from_slice(&data);
            }
            Err(NetError::Closed(_)) => {
                debug!(target: "net", "{}: end of input", self.endpoint.name());
                self.eof = true;
            }
            Err(NetError::Timeout(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(true)
    }

    /// Read the next line with CR/LF removed.
    ///
    /// `timeout` bounds the wait for the first piece of data only; once input
    /// has started the call waits as long as the rest of the line takes. A
    /// final unterminated line is returned when the peer closes.
    pub fn get_line(&mut self, timeout: Option<Duration>) -> Result<String> {
        let mut wait = timeout;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if self.eof {
                if self.buffer.is_empty() {
                    return Err(NetError::Closed(self.endpoint.name().to_string()));
                }
                let rest = std::mem::take(&mut self.buffer);
                return Ok(String::from_utf8_lossy(&rest).into_owned());
            }
            if !self.buffer.is_empty() {
                wait = None;
            }
            if !self.fill(wait)? {
                return Err(NetError::Timeout(self.endpoint.name().to_string()));
            }
        }
    }

    /// Write `text` followed by LF, or CR/LF when `crlf` is set
    pub fn put_line(&mut self, text: &str, crlf: bool, timeout: Option<Duration>) -> Result<()> {
        if text.len() > self.options.max_output {
            return Err(NetError::LineTooLong {
                length: text.len(),
                limit: self.options.max_output,
            });
        }
        let mut data = Vec::with_capacity(text.len() + 2);
        data.extend_from_slice(text.as_bytes());
        if crlf {
            data.push(b'\r');
        }
        data.push(b'\n');

        let written = self.endpoint.write(&data, timeout)?;
        if written < data.len() {
            return Err(NetError::Timeout(self.endpoint.name().to_string()));
        }
        Ok(())
    }

    /// Read up to `length` raw bytes, buffered input first
    pub fn read(&mut self, length: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        if !self.buffer.is_empty() {
            let count = length.min(self.buffer.len());
            return Ok(self.buffer.drain(..count).collect());
        }
        if self.eof {
            return Err(NetError::Closed(self.endpoint.name().to_string()));
        }
        match self.endpoint.read(length, timeout) {
            Err(NetError::Closed(name)) => {
                self.eof = true;
                Err(NetError::Closed(name))
            }
            other => other,
        }
    }

    pub fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.endpoint.write(data, timeout)
    }

    /// True if a line (or part of one) is buffered or the socket has input
    pub fn is_readable(&self) -> bool {
        !self.buffer.is_empty() || self.endpoint.is_readable()
    }

    pub fn is_writeable(&self) -> bool {
        self.endpoint.is_writeable()
    }

    /// False once the peer has closed the connection
    pub fn is_up(&self) -> bool {
        !self.eof && self.endpoint.is_up()
    }

    pub fn fd(&self) -> RawFd {
        self.endpoint.fd()
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn options(&self) -> LineStreamOptions {
        self.options
    }

    /// A second handle on the connection for writing interpreter output
    pub fn writer(&self) -> Result<TcpStream> {
        self.endpoint.try_clone_stream()
    }

    /// Close the stream and its endpoint. Writers obtained from
    /// [`LineStream::writer`] see the connection shut down as well.
    pub fn destroy(self) {
        debug!(target: "net", "Destroying line stream {}", self.endpoint.name());
        self.endpoint.shutdown();
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("endpoint", &self.endpoint)
            .field("buffered", &self.buffer.len())
            .field("eof", &self.eof)
            .finish()
    }
}
