use serde::{Deserialize, Serialize};

/// Display name substituted when a channel payload omits the name field.
pub const DEFAULT_DISPLAY_NAME: &str = "Unknown";

/// Inbound push event, tagged by kind. The channel is a best-effort
/// read-only stream: no retries, no acknowledgements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Authoritative full-replace push. Both collections and the log
    /// sequence are rebuilt wholesale from the lists.
    Snapshot {
        #[serde(default)]
        requests: Vec<WireParticipant>,
        #[serde(default)]
        allowed: Vec<WireMember>,
        #[serde(default)]
        logs: Vec<String>,
    },
    /// A single new join request.
    Insert { user: WireParticipant },
    /// One appended log line.
    Log { message: String },
}

/// A join-request entry as it appears on the wire. Every field is optional;
/// missing name/key degrade to documented defaults instead of failing the
/// whole frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireParticipant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelisted: Option<bool>,
}

/// An accepted-roster entry as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "canControl", default, skip_serializing_if = "Option::is_none")]
    pub can_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelisted: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Accept,
    Reject,
    Remove,
    Whitelist,
    RemoveWhitelist,
    Enable,
    Disable,
}

/// Outbound command body. The target key travels out-of-band (header);
/// `whitelisted` is only populated for accept so the server can record the
/// flag alongside the acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBody {
    pub action: CommandAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelisted: Option<bool>,
}

impl CommandBody {
    pub fn plain(action: CommandAction) -> Self {
        Self {
            action,
            whitelisted: None,
        }
    }
}
