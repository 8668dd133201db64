use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque server-issued participant identity. Globally unique while the
/// participant has a pending request or a roster entry; the only identity
/// that is stable across reconnects, and therefore the only one commands
/// may address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantKey(pub String);

impl ParticipantKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Malformed channel payloads degrade to an empty key; such entries can
    /// still be displayed but must never be addressed by a command.
    pub fn is_actionable(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic per-client-session ordering aid. Not stable across reconnects
/// and carries no semantics beyond presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalIndex(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestLifecycle {
    Entering,
    Queued,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberLifecycle {
    Entering,
    Active,
    Removing,
}
