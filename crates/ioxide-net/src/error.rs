use std::io;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid service specification \"{0}\"")]
    InvalidService(String),

    #[error("could not resolve \"{0}\"")]
    Resolve(String),

    #[error("timed out waiting on {0}")]
    Timeout(String),

    #[error("connection to {0} is closed")]
    Closed(String),

    #[error("{0} is a listening endpoint and cannot transfer data")]
    NotConnected(String),

    #[error("line of {length} bytes exceeds the {limit}-byte output limit")]
    LineTooLong { length: usize, limit: usize },

    #[error("invalid stream option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NetError {
    /// True for errors that mean the peer is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::Closed(_) => true,
            NetError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
