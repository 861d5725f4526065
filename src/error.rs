//! Error types for the storage core
//!
//! This module defines the error taxonomy shared by the segment index,
//! the piece layout builder and every storage backend.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The caller asked for an extent, offset or piece outside the valid range
    #[error("Precondition violation: {message}")]
    PreconditionViolation {
        message: String,
    },

    /// Reading source content failed while building piece hashes
    #[error("Content read error: file '{file}' at position {position}: {source}")]
    ContentRead {
        file: String,
        position: u64,
        #[source]
        source: io::Error,
    },

    /// Read or write failure inside a backend
    #[error("Backend I/O error: {message} ({transferred} bytes transferred)")]
    BackendIo {
        message: String,
        path: Option<String>,
        transferred: usize,
        #[source]
        source: Option<io::Error>,
    },

    /// The backend does not implement this capability
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        operation: &'static str,
    },

    /// Backing storage cannot hold the torrent
    #[error("Insufficient space: need {needed} bytes, have {available}")]
    InsufficientSpace {
        needed: u64,
        available: u64,
    },

    /// The content descriptor is malformed
    #[error("Invalid layout: {message}")]
    InvalidLayout {
        message: String,
    },
}

impl StorageError {
    /// Create a new PreconditionViolation
    pub fn precondition(message: impl Into<String>) -> Self {
        StorageError::PreconditionViolation {
            message: message.into(),
        }
    }

    /// Create a new ContentRead error
    pub fn content_read(file: impl Into<String>, position: u64, source: io::Error) -> Self {
        StorageError::ContentRead {
            file: file.into(),
            position,
            source,
        }
    }

    /// Create a new BackendIo error without an underlying cause
    pub fn backend_io(message: impl Into<String>, transferred: usize) -> Self {
        StorageError::BackendIo {
            message: message.into(),
            path: None,
            transferred,
            source: None,
        }
    }

    /// Create a new BackendIo error with path and source
    pub fn backend_io_full(
        message: impl Into<String>,
        path: impl Into<String>,
        transferred: usize,
        source: io::Error,
    ) -> Self {
        StorageError::BackendIo {
            message: message.into(),
            path: Some(path.into()),
            transferred,
            source: Some(source),
        }
    }

    /// Create a new Unsupported error
    pub fn unsupported(operation: &'static str) -> Self {
        StorageError::Unsupported { operation }
    }

    /// Create a new InvalidLayout error
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        StorageError::InvalidLayout {
            message: message.into(),
        }
    }

    /// Replace the transferred byte count of a BackendIo error.
    ///
    /// Backends that fail partway through a multi-file transfer use this to
    /// report the bytes moved across all files, not just the failing one.
    pub fn with_transferred(mut self, count: usize) -> Self {
        if let StorageError::BackendIo { transferred, .. } = &mut self {
            *transferred = count;
        }
        self
    }

    /// Bytes transferred before the fault, for BackendIo errors
    pub fn transferred(&self) -> Option<usize> {
        match self {
            StorageError::BackendIo { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }

    /// Check whether this is an Unsupported error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::Unsupported { .. })
    }

    /// Check whether this is a PreconditionViolation
    pub fn is_precondition(&self) -> bool {
        matches!(self, StorageError::PreconditionViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_display() {
        let err = StorageError::precondition("extent [10, 20) exceeds total 15");
        assert_eq!(
            err.to_string(),
            "Precondition violation: extent [10, 20) exceeds total 15"
        );
        assert!(err.is_precondition());
    }

    #[test]
    fn test_content_read_carries_file_and_position() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err = StorageError::content_read("dir/a.bin", 42, io_err);
        let text = err.to_string();
        assert!(text.contains("dir/a.bin"));
        assert!(text.contains("42"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_backend_io_transferred() {
        let err = StorageError::backend_io("torrent closed", 3).with_transferred(7);
        assert_eq!(err.transferred(), Some(7));
        assert!(err.to_string().contains("7 bytes transferred"));
    }

    #[test]
    fn test_backend_io_full_has_source() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::backend_io_full("Failed to open file", "/tmp/x", 0, io_err);
        assert!(matches!(err, StorageError::BackendIo { path: Some(_), .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unsupported_is_distinguishable() {
        let err = StorageError::unsupported("write_at");
        assert!(err.is_unsupported());
        assert_eq!(err.transferred(), None);
        assert!(!StorageError::backend_io("x", 0).is_unsupported());
    }

    #[test]
    fn test_insufficient_space_display() {
        let err = StorageError::InsufficientSpace {
            needed: 100,
            available: 10,
        };
        assert_eq!(err.to_string(), "Insufficient space: need 100 bytes, have 10");
    }
}
