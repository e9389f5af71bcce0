//! mqstore Storage
//!
//! This crate provides the broker's persistence layer on top of an embedded
//! key-value engine:
//! - Engine adapter (in-memory or file-backed)
//! - Autosave scheduler
//! - Message and session stores bound to the engine
//! - The persistent store coordinator that ties them together

mod atomic_writer;
pub mod autosave;
pub mod config;
pub mod engine;
pub mod messages;
pub mod sessions;
pub mod store;

pub use autosave::AutosaveScheduler;
pub use config::StoreConfig;
pub use engine::{EngineOptions, KvEngine, OpenedEngine, Provenance};
pub use store::{EngineSubStores, PersistentStore, SubStoreFactory};
