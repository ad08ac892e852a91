//! TCP endpoints and LF-terminated line streams.
//!
//! Everything here is blocking with optional timeouts; readiness is checked
//! with the same `poll(2)` wrapper the reactor uses, so the descriptors can be
//! handed to [`ioxide_reactor::Dispatcher::on_io`] directly.

pub mod endpoint;
pub mod error;
pub mod line_stream;
pub mod socket;

pub use endpoint::{Endpoint, MAX_READ_SIZE};
pub use error::{NetError, Result};
pub use line_stream::{LineStream, LineStreamOptions};
