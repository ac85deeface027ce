//! # Message Protocol
//!
//! Defines every datagram exchanged in the chat system:
//! - Server discovery, leadership announcements and heartbeats (multicast group)
//! - Ring election tokens (server to server, unicast)
//! - Client session traffic: join, chat text, notices, leave (unicast)
//!
//! Each datagram is one JSON object tagged by its `"type"` field, e.g.
//!
//! ```text
//! {"type":"discover","id":"192.168.1.20:5001","port":5001,"isLeader":false}
//! {"type":"message","sender_name":"Client 1","text":"hello"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{ChatError, Result};

/// Largest datagram either side will send or read.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Identity of a server: `"<ip>:<port>"` of its unicast endpoint.
///
/// Compared as a plain string. This ordering is the election tie-break,
/// so the highest address string wins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from an advertised unicast endpoint.
    pub fn from_endpoint(ip: impl fmt::Display, port: u16) -> Self {
        Self(format!("{}:{}", ip, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token a client picks for itself (a UUID in practice).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every datagram type in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    // ========== SERVER GROUP TRAFFIC ==========
    /// **Discover**
    ///
    /// Periodic presence beacon from every server, carrying its current
    /// leadership claim.
    Discover {
        id: ServerId,
        port: u16,
        #[serde(rename = "isLeader")]
        is_leader: bool,
    },

    /// **Heartbeat**
    ///
    /// Liveness signal, multicast only by the current leader.
    Heartbeat { id: ServerId, port: u16 },

    /// **Leader**
    ///
    /// Announcement sent once by the winner of an election round.
    Leader { id: ServerId, port: u16 },

    /// **Election**
    ///
    /// Ring token carrying the best candidate seen so far in the round.
    Election { token: ServerId },

    // ========== CLIENT SESSION TRAFFIC ==========
    /// **Join**
    ///
    /// Session admission request; `port` is the client's unicast port.
    Join { id: ClientId, port: u16 },

    /// **Welcome**
    ///
    /// The display name the leader assigned to a joining client.
    Welcome { name: String },

    /// **Message**
    ///
    /// Chat text. Clients send it with their `id`; the leader relays it with
    /// the resolved `sender_name` instead.
    #[serde(rename = "message")]
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        text: String,
    },

    /// **Notice**
    ///
    /// System text about clients joining or leaving.
    Notice { text: String },

    /// **Leave**
    ///
    /// Best-effort session termination sent by a client on shutdown.
    Leave { id: ClientId },
}

impl Message {
    /// Chat text as sent by a client to the leader.
    pub fn chat(id: ClientId, text: impl Into<String>) -> Self {
        Message::Chat {
            id: Some(id),
            sender_name: None,
            text: text.into(),
        }
    }

    /// Chat text as relayed by the leader to the other clients.
    pub fn relay(sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Message::Chat {
            id: None,
            sender_name: Some(sender_name.into()),
            text: text.into(),
        }
    }

    /// The identity and unicast port of a server claiming leadership, if this
    /// message is a leadership-flagged signal (heartbeat, announcement, or a
    /// discover beacon with the flag set).
    pub fn leadership_claim(&self) -> Option<(&ServerId, u16)> {
        match self {
            Message::Heartbeat { id, port } | Message::Leader { id, port } => Some((id, *port)),
            Message::Discover {
                id,
                port,
                is_leader: true,
            } => Some((id, *port)),
            _ => None,
        }
    }

    /// Wire name of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Discover { .. } => "discover",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Leader { .. } => "leader",
            Message::Election { .. } => "election",
            Message::Join { .. } => "join",
            Message::Welcome { .. } => "welcome",
            Message::Chat { .. } => "message",
            Message::Notice { .. } => "notice",
            Message::Leave { .. } => "leave",
        }
    }

    /// Serialize a message to JSON bytes, refusing anything that would not fit
    /// in a single datagram.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ChatError::TooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Deserialize a message from a received datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
