//! mqstore Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by the
//! broker's persistence layer:
//! - Storage error taxonomy
//! - Persisted records (session snapshots, stored messages)
//! - Engine and sub-store trait abstractions

pub mod error;
pub mod message;
pub mod session;
pub mod traits;

pub use error::{StorageError, StorageResult, StoreState};
pub use message::{QoS, StoredMessage};
pub use session::PersistentSession;
pub use traits::{Engine, MessagesStore, SessionsStore};
