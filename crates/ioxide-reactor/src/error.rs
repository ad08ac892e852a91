use std::io;

use crate::watch::WatchId;

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("watch {0} is not registered with this dispatcher")]
    InvalidWatch(WatchId),

    #[error("dispatcher has been destroyed")]
    Destroyed,

    #[error("no watches registered; nothing to monitor")]
    Exhausted,

    #[error("dispatcher is already being monitored")]
    Reentrant,

    #[error("cancel callback for watch {watch} failed: {source}")]
    CancelFailed {
        watch: WatchId,
        #[source]
        source: anyhow::Error,
    },

    #[error("readiness wait failed: {0}")]
    Wait(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
