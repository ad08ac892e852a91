use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unbound variable: {0}")]
    Unbound(String),

    #[error("{procedure}: {message}")]
    InvalidArgument {
        procedure: String,
        message: String,
    },

    #[error("{procedure}: expected {expected} argument(s), got {got}")]
    Arity {
        procedure: String,
        expected: String,
        got: usize,
    },

    #[error("attempt to apply non-procedure {0}")]
    NotProcedure(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("recursion depth exceeded")]
    RecursionLimit,

    #[error("interpreter has been shut down")]
    ShutDown,

    #[error("{0}")]
    User(String),

    #[error("cannot load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SchemeError {
    pub fn invalid_argument(procedure: &str, message: impl Into<String>) -> Self {
        SchemeError::InvalidArgument {
            procedure: procedure.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchemeError>;
