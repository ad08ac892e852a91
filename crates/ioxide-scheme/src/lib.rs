//! A small embedded Scheme with bindings to the ioxide reactor and network
//! layers.
//!
//! Each [`Interpreter`] owns an [`ExtensionContext`]: the protection table
//! that keeps procedures alive while a dispatcher watch refers to them, and
//! the handle table behind the typed handles scripts see for dispatchers,
//! watches, endpoints and streams. Nothing is shared between interpreters.
//!
//! ```no_run
//! use ioxide_scheme::Interpreter;
//!
//! let interp = Interpreter::with_extensions();
//! interp
//!     .eval_str(
//!         r#"(define dp (iox-create))
//!            (iox-after dp (lambda (watch user reason) (display user)) "tick" 0.5)
//!            (iox-monitor dp 1.0)"#,
//!     )
//!     .unwrap();
//! ```

pub mod bridge;
mod builtins;
pub mod context;
pub mod env;
pub mod error;
pub mod eval;
pub mod funcs;
pub mod protect;
pub mod reader;
pub mod value;

pub use context::{ExtensionContext, HandleKind, HandleTable, Token};
pub use env::Env;
pub use error::{Result, SchemeError};
pub use eval::Interpreter;
pub use funcs::iox::bind_dispatcher;
pub use protect::{ProtectError, ProtectionTable};
pub use value::Value;
