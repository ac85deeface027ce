//! # Client Session Registry
//!
//! Leader-only bookkeeping of connected chat clients. The registry lives for
//! one leadership term: it is reset when this server becomes leader and
//! cleared when it steps down, so clients rejoin every new leader.
//!
//! Operations return [`Delivery`] lists instead of sending anything; the
//! caller performs the sends outside the state lock.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::common::messages::{ClientId, Message};

/// One connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub identity: ClientId,
    pub address: SocketAddr,
    pub display_name: String,
}

/// A message addressed to one registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: ClientId,
    pub address: SocketAddr,
    pub message: Message,
}

/// Sessions of the current term plus the display-name counter.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ClientId, ClientSession>,
    /// Last number handed out as "Client N" this term
    issued: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a client.
    ///
    /// A first join assigns the next display name, welcomes the client and
    /// notifies everybody else. A repeated join for a registered identity
    /// changes nothing and sends nothing.
    pub fn join(&mut self, identity: ClientId, address: SocketAddr) -> Vec<Delivery> {
        if self.sessions.contains_key(&identity) {
            debug!("🔁 Duplicate join from {} ignored", identity);
            return Vec::new();
        }

        self.issued += 1;
        let display_name = format!("Client {}", self.issued);
        info!("✅ {} connected from {}", display_name, address);

        let notice = Message::Notice {
            text: format!("{} has joined the chat.", display_name),
        };
        let mut deliveries = vec![Delivery {
            recipient: identity.clone(),
            address,
            message: Message::Welcome {
                name: display_name.clone(),
            },
        }];
        deliveries.extend(self.fan_out(&notice, Some(&identity)));

        self.sessions.insert(
            identity.clone(),
            ClientSession {
                identity,
                address,
                display_name,
            },
        );
        deliveries
    }

    /// Remove a client and tell the rest. Unknown identities are a no-op.
    pub fn leave(&mut self, identity: &ClientId) -> Vec<Delivery> {
        let Some(session) = self.sessions.remove(identity) else {
            debug!("Leave from unknown client {} ignored", identity);
            return Vec::new();
        };

        info!("👋 {} has left the chat.", session.display_name);
        let notice = Message::Notice {
            text: format!("{} has left the chat.", session.display_name),
        };
        self.fan_out(&notice, None)
    }

    /// Relay chat text from `sender` to every other session.
    ///
    /// Text from an unregistered sender (e.g. racing its own leave) is
    /// dropped rather than relayed anonymously. So is text whose relayed
    /// form no longer fits in one datagram: the display name can make it
    /// longer than what the client sent.
    pub fn relay(&self, sender: &ClientId, text: &str) -> Vec<Delivery> {
        let Some(session) = self.sessions.get(sender) else {
            debug!("Dropping message from unregistered client {}", sender);
            return Vec::new();
        };

        let message = Message::relay(session.display_name.clone(), text);
        if let Err(e) = message.to_bytes() {
            warn!("⚠️  Not relaying message from {}: {}", session.display_name, e);
            return Vec::new();
        }

        info!(
            "💬 [{}]: {} (to {} other clients)",
            session.display_name,
            text,
            self.sessions.len().saturating_sub(1)
        );
        self.fan_out(&message, Some(sender))
    }

    /// Drop a session silently, e.g. after a failed send.
    pub fn remove(&mut self, identity: &ClientId) -> Option<ClientSession> {
        self.sessions.remove(identity)
    }

    /// Discard every session and restart naming; used at term boundaries.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.issued = 0;
    }

    pub fn get(&self, identity: &ClientId) -> Option<&ClientSession> {
        self.sessions.get(identity)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn fan_out(&self, message: &Message, exclude: Option<&ClientId>) -> Vec<Delivery> {
        self.sessions
            .values()
            .filter(|s| Some(&s.identity) != exclude)
            .map(|s| Delivery {
                recipient: s.identity.clone(),
                address: s.address,
                message: message.clone(),
            })
            .collect()
    }
}
