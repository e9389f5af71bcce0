//! Persisted session snapshot

use serde::{Deserialize, Serialize};

/// Minimal persisted status of a client session.
///
/// Snapshots are never mutated in place: a changed clean-session preference
/// produces a new snapshot. Fields added later must carry `#[serde(default)]`
/// so records written by older versions stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSession {
    /// Whether the session's subscriptions and queued messages are discarded on disconnect
    pub clean_session: bool,
}

impl PersistentSession {
    pub fn new(clean_session: bool) -> Self {
        Self { clean_session }
    }
}
