//! Error types for the spooled cache stores

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache stores
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store could not be brought to the active state
    #[error("Could not create store {store}: {reason}")]
    Construction { store: String, reason: String },

    /// Operation on a store that has been disposed
    #[error("Store {0} is not active")]
    NotActive(String),

    /// Operation the store deliberately does not support
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Element record could not be encoded
    #[error("Failed to encode element: {0}")]
    Encode(String),

    /// Element record could not be decoded
    #[error("Failed to decode element: {0}")]
    Decode(String),

    /// Element changed while it was being serialized
    #[error("Element {key} was modified during serialization")]
    ConcurrentModification { key: String },

    /// Index snapshot is unusable
    #[error("Corrupt index file: {0}")]
    CorruptIndex(String),

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// Disk worker is not running
    #[error("Disk worker for store {0} is not running")]
    WorkerUnavailable(String),

    /// Disk worker did not answer in time
    #[error("Disk worker for store {store} did not respond within {millis}ms")]
    WorkerTimeout { store: String, millis: u64 },
}

impl Error {
    /// Errors worth a second serialization attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConcurrentModification { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_transient_classification() {
        let race = Error::ConcurrentModification {
            key: "k".to_string(),
        };
        assert!(race.is_transient());
        assert!(!Error::Unsupported("x".to_string()).is_transient());
        assert!(!Error::Encode("too large".to_string()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::WorkerTimeout {
            store: "sample".to_string(),
            millis: 250,
        };
        assert_eq!(
            err.to_string(),
            "Disk worker for store sample did not respond within 250ms"
        );
    }
}
