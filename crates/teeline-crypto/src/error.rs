//! Backend result codes.

use thiserror::Error;

/// Errors returned by a [`Backend`](crate::Backend) invocation.
///
/// These are the result codes a secure backend reports for a command. The
/// orchestration layer maps them onto its own error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Malformed or mismatched-size input
    #[error("bad parameters: {0}")]
    BadParameters(String),

    /// Command invoked out of the required order
    #[error("bad state: {0}")]
    BadState(String),

    /// Output buffer smaller than required
    #[error("short buffer: {required} bytes required")]
    ShortBuffer {
        /// True size of the output
        required: usize,
    },

    /// Backend ran out of memory
    #[error("out of memory")]
    OutOfMemory,

    /// Unknown session handle
    #[error("unknown session handle: {0}")]
    UnknownSession(u32),

    /// Opaque backend-side failure
    #[error("backend failure: {0}")]
    Failure(String),
}

impl BackendError {
    /// Shorthand for [`BackendError::BadParameters`].
    pub fn bad_parameters(msg: impl Into<String>) -> Self {
        Self::BadParameters(msg.into())
    }

    /// Shorthand for [`BackendError::BadState`].
    pub fn bad_state(msg: impl Into<String>) -> Self {
        Self::BadState(msg.into())
    }

    /// Required size reported by a `ShortBuffer` result.
    #[must_use]
    pub fn required_size(&self) -> Option<usize> {
        match self {
            Self::ShortBuffer { required } => Some(*required),
            _ => None,
        }
    }
}

/// Result type for backend invocations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_size() {
        assert_eq!(
            BackendError::ShortBuffer { required: 128 }.required_size(),
            Some(128)
        );
        assert_eq!(BackendError::OutOfMemory.required_size(), None);
    }

    #[test]
    fn test_display() {
        let err = BackendError::bad_parameters("wrong key size 15");
        assert_eq!(err.to_string(), "bad parameters: wrong key size 15");

        let err = BackendError::ShortBuffer { required: 3 };
        assert!(err.to_string().contains("3 bytes required"));
    }
}
