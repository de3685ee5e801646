//! Error types for the hopperkv library.
//!
//! ## Key Components
//!
//! - [`MrcError`]: Returned when a miss-ratio curve is malformed or a strict
//!   query falls outside the curve's range.
//! - [`CkptError`]: Returned when a ghost-cache checkpoint cannot be read or
//!   was produced by an incompatible build.
//! - [`FormatError`]: Returned when a mock key-value format is ill-formed.
//!
//! All user-visible command failures are rendered as protocol `ERR` strings
//! by the command layer; these types cover the structural failures that
//! abort initialization instead.

use std::fmt;
use std::io;

// ---------------------------------------------------------------------------
// MrcError
// ---------------------------------------------------------------------------

/// Error produced by [`MissRatioCurve`](crate::alloc::mrc::MissRatioCurve)
/// validation and strict queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MrcError {
    /// A strict query asked for a cache size beyond the last anchor.
    OutOfRange {
        /// Largest cache size the curve covers.
        max_tick: u64,
        /// The queried cache size.
        requested: u64,
    },
    /// The curve failed its sanity check; the message names the violation.
    MalformedCurve(String),
}

impl fmt::Display for MrcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrcError::OutOfRange {
                max_tick,
                requested,
            } => write!(
                f,
                "cache size {requested} is beyond the last curve anchor {max_tick}"
            ),
            MrcError::MalformedCurve(msg) => write!(f, "malformed miss-ratio curve: {msg}"),
        }
    }
}

impl std::error::Error for MrcError {}

// ---------------------------------------------------------------------------
// CkptError
// ---------------------------------------------------------------------------

/// Error produced when saving or loading a ghost-cache checkpoint.
#[derive(Debug)]
pub enum CkptError {
    /// The checkpoint file could not be opened, read, or written.
    Io(io::Error),
    /// The file's magic or hasher-compatibility word does not match this
    /// build. Likely produced by another platform or corrupted.
    Incompatible,
}

impl fmt::Display for CkptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CkptError::Io(e) => write!(f, "checkpoint I/O failure: {e}"),
            CkptError::Incompatible => f.write_str("incompatible ghost cache checkpoint"),
        }
    }
}

impl std::error::Error for CkptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CkptError::Io(e) => Some(e),
            CkptError::Incompatible => None,
        }
    }
}

impl From<io::Error> for CkptError {
    fn from(e: io::Error) -> Self {
        CkptError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// FormatError
// ---------------------------------------------------------------------------

/// Error returned when a mock key-value format is ill-formed.
///
/// Carries a human-readable description of which constraint failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError(String);

impl FormatError {
    /// Creates a new `FormatError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FormatError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mrc_out_of_range_display_names_bounds() {
        let err = MrcError::OutOfRange {
            max_tick: 80,
            requested: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("80"));
    }

    #[test]
    fn mrc_malformed_display_shows_message() {
        let err = MrcError::MalformedCurve("ticks is empty".into());
        assert!(err.to_string().contains("ticks is empty"));
    }

    #[test]
    fn ckpt_incompatible_display() {
        let err = CkptError::Incompatible;
        assert!(err.to_string().contains("incompatible"));
    }

    #[test]
    fn ckpt_wraps_io_error() {
        let err = CkptError::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err, CkptError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn format_error_message_accessor() {
        let err = FormatError::new("k_pad_len < 0");
        assert_eq!(err.message(), "k_pad_len < 0");
    }

    #[test]
    fn errors_implement_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<MrcError>();
        assert_error::<CkptError>();
        assert_error::<FormatError>();
    }
}
