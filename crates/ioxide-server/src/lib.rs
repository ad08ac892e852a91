//! Session server for the ioxide Scheme environment.
//!
//! [`SessionServer`] listens on a TCP port and gives every connection its own
//! interpreter, all sharing one [`ioxide_reactor::Dispatcher`] that scripts
//! reach as `G-DISPATCHER`.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use config::{ConfigLoadError, ConfigSource, LoggingSettings, ServerConfig, ServerSettings};
pub use error::{Result, ServerError};
pub use logging::init_logging;
pub use session::{SessionServer, SessionState, DISPATCHER_GLOBAL};
