//! Error types for the persistence layer

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle state of a persistent store coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Initialized,
    /// `close` is running its final commit
    Closing,
    Closed,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreState::Uninitialized => "uninitialized",
            StoreState::Initialized => "initialized",
            StoreState::Closing => "closing",
            StoreState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// A step of store initialization failed: the backing file could not be
    /// created or opened, the configuration was rejected, or a sub-store
    /// failed to initialize. Fatal to startup.
    #[error("Can't initialize storage [{}]: {}", .path.display(), .source)]
    Init {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Store is {state}, sub-stores are not available")]
    NotInitialized { state: StoreState },

    #[error("Invalid store state: {0}")]
    InvalidState(String),

    #[error("Engine is closed")]
    EngineClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_carries_path_and_cause() {
        let err = StorageError::Init {
            path: PathBuf::from("/no/such/dir/store.db"),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "missing parent",
            )),
        };

        let message = err.to_string();
        assert!(message.contains("/no/such/dir/store.db"));
        assert!(message.contains("missing parent"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_init_error_can_wrap_storage_errors() {
        let err = StorageError::Init {
            path: PathBuf::from("store.db"),
            source: Box::new(StorageError::InvalidData("broken map".to_string())),
        };

        let source = std::error::Error::source(&err).unwrap();
        assert!(matches!(
            source.downcast_ref::<StorageError>(),
            Some(StorageError::InvalidData(_))
        ));
    }

    #[test]
    fn test_not_initialized_names_state() {
        let err = StorageError::NotInitialized {
            state: StoreState::Closed,
        };
        assert_eq!(err.to_string(), "Store is closed, sub-stores are not available");
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let parse_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: StorageError = parse_err.into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
