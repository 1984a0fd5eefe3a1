//! Centralized error handling for Evocode.
//!
//! Every failure is represented as a [`EvocodeError`] value and propagated through
//! [`Result`]. The library never panics on malformed input; crate-level clippy lints
//! reject `unwrap()` and `panic!()` in library code.
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`EvocodeError::Io`]): schema storage could not be read or written.
//! - **Schema Errors** ([`EvocodeError::Schema`]): a type has no discoverable schema, a
//!   registration is invalid, or two observations of one contents ID diverge in shape.
//! - **Deserialization Errors** ([`EvocodeError::Deserialization`]): the payload is malformed
//!   or foreign (bad format tag, truncated input, block missing even after a reload, ...).
//! - **Storage Errors** ([`EvocodeError::Storage`]): schema storage initialization exhausted
//!   its retry budget.
//! - **Corrupt Log Errors** ([`EvocodeError::CorruptLog`]): the persisted block log is
//!   malformed. The log is an engine-owned artifact, so this is never recoverable.
//! - **Internal Errors** ([`EvocodeError::Internal`]): invariant violations inside the engine.
//!
//! Schema evolution is not an error: absent, extra, and retyped members are handled as
//! first-class conversions by the engine.
//!
//! ## Usage
//!
//! ```rust
//! use evocode::{Evocode, EvocodeError};
//!
//! let codec = Evocode::builder().build()?;
//! match codec.deserialize::<u32>(&[0x07]) {
//!     Err(EvocodeError::Deserialization(msg)) => println!("rejected: {msg}"),
//!     other => println!("{other:?}"),
//! }
//! # Ok::<(), EvocodeError>(())
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Evocode operations.
pub type Result<T> = std::result::Result<T, EvocodeError>;

/// The master error enum covering all failure domains in Evocode.
///
/// The type is `Clone` so a failed build can be shared between threads racing on the same
/// cache key. I/O errors are wrapped in `Arc` to make cloning cheap.
#[derive(Debug, Clone)]
pub enum EvocodeError {
    /// Low-level I/O failure while talking to schema storage.
    Io(Arc<io::Error>),

    /// A type has no schema, a registration is inconsistent, or two shapes claim the same
    /// contents ID.
    ///
    /// Never recoverable: it indicates a programming error or a storage log written by an
    /// incompatible process.
    Schema(String),

    /// The input is not a valid Evocode payload.
    ///
    /// The message names the offending value (tag, block ID, contents ID, discriminator...).
    Deserialization(String),

    /// Schema storage initialization failed after exhausting its retry budget.
    Storage(String),

    /// The persisted block log is malformed (bad marker, unsupported version, dangling
    /// contents reference).
    CorruptLog(String),

    /// Logic error inside the engine (poisoned lock, reader used before construction).
    ///
    /// If you encounter this error, please report it with a minimal reproduction.
    Internal(String),
}

impl EvocodeError {
    /// Shorthand for a [`EvocodeError::Deserialization`] error.
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Shorthand for a [`EvocodeError::Schema`] error.
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Shorthand for a [`EvocodeError::CorruptLog`] error.
    pub(crate) fn corrupt_log(msg: impl Into<String>) -> Self {
        Self::CorruptLog(msg.into())
    }

    /// Error raised when a `Mutex` guarding engine state is poisoned.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} mutex poisoned"))
    }
}

impl fmt::Display for EvocodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Schema(s) => write!(f, "Schema Error: {s}"),
            Self::Deserialization(s) => write!(f, "Deserialization Failed: {s}"),
            Self::Storage(s) => write!(f, "Schema Storage Error: {s}"),
            Self::CorruptLog(s) => write!(f, "Corrupt Schema Log: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for EvocodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EvocodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
