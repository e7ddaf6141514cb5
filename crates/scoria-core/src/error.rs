//! # Scoria Error Handling
//!
//! Unified error types for the execution engine.
//!
//! Error handling follows these principles:
//! - Errors are typed and categorized
//! - No panics in production code paths
//! - Recording-path failures are absorbed into the recorder's status field
//!   and surfaced through `flush()` (see `scoria-cmd`)

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Scoria Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Scoria unified error type
///
/// This enum covers all error conditions across the engine. Errors are
/// categorized by subsystem for easier debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Object is in a state that does not permit the operation
    InvalidState,
    /// Resource not found
    NotFound,

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Out of memory (command list or descriptor backing store).
    ///
    /// Recoverable: reported once through `flush()` and then cleared.
    OutOfMemory,

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// The device was removed or hung.
    ///
    /// Unrecoverable: once observed, every subsequent flush reports it.
    DeviceRemoved,
    /// Command submission failed
    SubmissionFailed,
}

impl Error {
    /// Check whether this error is permanent for the owning queue.
    ///
    /// Permanent errors are never cleared from the recorder's status.
    #[inline]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::NotFound => write!(f, "resource not found"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::DeviceRemoved => write!(f, "device removed"),
            Self::SubmissionFailed => write!(f, "submission failed"),
        }
    }
}

impl std::error::Error for Error {}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let s = format!("{}", Error::OutOfMemory);
        assert!(s.contains("out of memory"));
    }

    #[test]
    fn test_permanence() {
        assert!(Error::DeviceRemoved.is_permanent());
        assert!(!Error::OutOfMemory.is_permanent());
        assert!(!Error::InvalidParameter.is_permanent());
    }
}
