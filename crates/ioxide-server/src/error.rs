use ioxide_net::NetError;
use ioxide_reactor::ReactorError;
use ioxide_scheme::SchemeError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("connection to {0} is broken")]
    ConnectionBroken(String),

    #[error("session setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error(transparent)]
    Scheme(#[from] SchemeError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
