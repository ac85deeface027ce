//! # Client Middleware
//!
//! Connects a chat front end to whichever server currently leads.
//!
//! ## Responsibilities
//!
//! The [`ClientMiddleware`] struct manages the client side of the protocol:
//! - **Leader Discovery**: Listens on the multicast group for heartbeats,
//!   announcements and leader-flagged beacons
//! - **Session Management**: Joins the leader on first contact, rejoins
//!   after a leader change or a recovery, and resends a join that got no
//!   welcome within one heartbeat interval
//! - **Failure Detection**: Runs the same leader-loss timeout as the servers
//!   and refuses outbound chat while reconnecting
//! - **Delivery**: Turns welcomes, relayed messages and notices into
//!   [`ChatEvent`]s for the front end
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config: ClientConfig = load_or_default(args.config.as_deref())?;
//! let (middleware, mut events) = ClientMiddleware::bind(config).await?;
//! let middleware = Arc::new(middleware);
//!
//! let runner = middleware.clone();
//! tokio::spawn(async move { runner.run().await });
//!
//! middleware.send_text("hello").await?;
//! ```

use anyhow::Result;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};

use super::config::ClientConfig;
use super::link::LeaderLink;
use crate::common::error::ChatError;
use crate::common::messages::{ClientId, Message, ServerId};
use crate::common::transport::Endpoint;

/// Capacity of the event channel towards the front end.
const EVENT_BUFFER: usize = 64;

/// Something the front end should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The leader admitted us under this display name.
    Welcome { name: String },
    /// Chat text from another participant.
    Relayed { sender_name: String, text: String },
    /// A join/leave notification.
    Notice { text: String },
    /// A leader is reachable; a join has been sent.
    Connected { leader: ServerId },
    /// The leader went quiet or the link failed; sends are refused.
    Reconnecting,
}

pub struct ClientMiddleware {
    config: ClientConfig,
    identity: ClientId,
    link: Mutex<LeaderLink>,
    group: Arc<Endpoint>,
    unicast: Arc<Endpoint>,
    events: mpsc::Sender<ChatEvent>,
}

impl ClientMiddleware {
    /// Bind both sockets and pick a fresh client identity.
    ///
    /// Returns the middleware together with the receiving end of its event
    /// stream.
    pub async fn bind(config: ClientConfig) -> Result<(Self, mpsc::Receiver<ChatEvent>)> {
        let unicast = Endpoint::bind_unicast(config.client.port).await?;
        let group = Endpoint::bind_group(&config.network)?;
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let link = LeaderLink::new(config.timing.leader_timeout(), Instant::now());

        let middleware = Self {
            config,
            identity: ClientId::random(),
            link: Mutex::new(link),
            group: Arc::new(group),
            unicast: Arc::new(unicast),
            events,
        };
        Ok((middleware, receiver))
    }

    /// Runs the client loops until one of them terminates.
    pub async fn run(&self) {
        info!("🚀 Chat client {} starting", self.identity);
        info!("🔍 Looking for the current leader...");

        tokio::select! {
            _ = self.find_leader() => error!("❌ Leader discovery task terminated"),
            _ = self.receive_messages() => error!("❌ Receive task terminated"),
            _ = self.monitor_heartbeat() => error!("❌ Heartbeat monitor terminated"),
        }
    }

    /// Send one line of chat text to the leader.
    ///
    /// Refused with [`ChatError::NotConnected`] unless the link is up. A
    /// socket failure moves the link to reconnecting.
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let target = {
            let link = self.link.lock().await;
            link.outbound_target().inspect_err(|_| {
                debug!("Send refused while {:?}", link.status());
            })?
        };
        let message = Message::chat(self.identity.clone(), text);

        if let Err(e) = self.unicast.write_message(&message, target).await {
            error!("❌ Failed to send message: {}", e);
            self.link_failed().await;
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort `leave` on shutdown. Never fails and never waits for an
    /// answer.
    pub async fn leave(&self) {
        let (target, name) = {
            let link = self.link.lock().await;
            let Ok(target) = link.outbound_target() else {
                debug!("Not connected; skipping leave");
                return;
            };
            (target, link.display_name().unwrap_or("unnamed").to_owned())
        };

        let message = Message::Leave {
            id: self.identity.clone(),
        };
        match self.unicast.write_message(&message, target).await {
            Ok(()) => info!("👋 Sent leave to the leader as {}", name),
            Err(e) => warn!("⚠️  Could not send leave: {}", e),
        }
    }

    // ========================================================================
    // TASK 1: Leader discovery on the multicast group
    // ========================================================================

    async fn find_leader(&self) {
        loop {
            let (message, from) = match self.group.read_message().await {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) => {
                    error!("❌ Group socket receive error: {}", e);
                    continue;
                }
            };

            let Some((leader, port)) = message.leadership_claim() else {
                continue;
            };
            let leader = leader.clone();
            let address = SocketAddr::new(from.ip(), port);

            let join_target =
                self.link
                    .lock()
                    .await
                    .observe_leader_signal(&leader, address, Instant::now());
            if let Some(target) = join_target {
                self.join(leader, target).await;
            }
        }
    }

    async fn join(&self, leader: ServerId, target: SocketAddr) {
        match self.send_join(target).await {
            Ok(()) => {
                info!("✅ Joining leader {} at {}", leader, target);
                self.emit(ChatEvent::Connected { leader }).await;
            }
            Err(e) => {
                error!("❌ Failed to join leader {}: {}", leader, e);
                self.link_failed().await;
            }
        }
    }

    async fn send_join(&self, target: SocketAddr) -> Result<(), ChatError> {
        let join = Message::Join {
            id: self.identity.clone(),
            port: self.unicast.local_port()?,
        };
        self.unicast.write_message(&join, target).await
    }

    // ========================================================================
    // TASK 2: Messages from the leader
    // ========================================================================

    async fn receive_messages(&self) {
        loop {
            match self.unicast.read_message().await {
                Ok(Some((message, from))) => {
                    debug!("📥 {} from {}", message.kind(), from);
                    self.deliver(message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("❌ Receive error: {}", e);
                    self.link_failed().await;
                }
            }
        }
    }

    async fn deliver(&self, message: Message) {
        let event = match message {
            Message::Welcome { name } => {
                let mut link = self.link.lock().await;
                if let Some(leader) = link.leader() {
                    info!("🎉 Welcomed by {} as {}", leader, name);
                }
                link.welcome(name.clone());
                ChatEvent::Welcome { name }
            }
            Message::Chat {
                sender_name: Some(sender_name),
                text,
                ..
            } => ChatEvent::Relayed { sender_name, text },
            Message::Notice { text } => ChatEvent::Notice { text },
            other => {
                debug!("Ignoring {} on the client socket", other.kind());
                return;
            }
        };
        self.emit(event).await;
    }

    // ========================================================================
    // TASK 3: Leader-loss detection and join retry
    // ========================================================================

    async fn monitor_heartbeat(&self) {
        let patience = self.config.timing.heartbeat_interval();

        loop {
            tokio::time::sleep(self.config.timing.monitor_interval()).await;
            let now = Instant::now();
            let (timed_out, rejoin) = {
                let mut link = self.link.lock().await;
                let timed_out = link.check_timeout(now);
                (timed_out, link.rejoin_due(now, patience))
            };

            if timed_out {
                self.emit(ChatEvent::Reconnecting).await;
            }
            if let Some((leader, target)) = rejoin {
                warn!("⚠️  No welcome from {}; resending join", leader);
                if let Err(e) = self.send_join(target).await {
                    error!("❌ Failed to rejoin leader {}: {}", leader, e);
                    self.link_failed().await;
                }
            }
        }
    }

    // ========================================================================
    // HELPER FUNCTIONS
    // ========================================================================

    async fn link_failed(&self) {
        if self.link.lock().await.mark_link_failure() {
            warn!("⚠️  Link to the leader failed; reconnecting");
            self.emit(ChatEvent::Reconnecting).await;
        }
    }

    async fn emit(&self, event: ChatEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}
