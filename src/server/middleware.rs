//! # Server Middleware - Network Coordination
//!
//! The middleware owns the sockets and timers of one chat server and drives
//! its [`ServerNode`] state:
//!
//! ## Core Responsibilities
//!
//! ### 1. Discovery
//! - Multicasts a discover beacon (identity, port, leadership flag) on a fixed interval
//! - Feeds every received beacon, heartbeat and announcement into the node
//!
//! ### 2. Leader Election
//! - Runs the startup election check after the discovery window
//! - Walks election tokens along the ring, evicting hops that cannot be reached
//!
//! ### 3. Heartbeats & Failure Detection
//! - Multicasts heartbeats while this server leads
//! - Checks for leader loss on every monitor tick
//! - Reaps membership entries that outlived the grace period
//!
//! ### 4. Client Relay (leader only)
//! - Receives join/message/leave on the unicast port
//! - Sends welcomes, relayed messages and notices, dropping clients whose sends fail
//!
//! ## Locking
//!
//! All state sits behind one mutex. A handler locks, applies one event,
//! collects the resulting [`Outbound`] work and unlocks; sockets are only
//! touched after the guard is gone.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::config::ServerConfig;
use super::election::TokenRoute;
use super::node::{NodeStatus, Outbound, ServerNode};
use crate::common::messages::Message;
use crate::common::transport::{detect_local_ip, Endpoint};

/// Server middleware that runs every concurrent activity of one server.
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │            ServerMiddleware              │
/// │ (sockets, timers, token walks, sends)    │
/// │                                          │
/// │  ┌────────────────────────────────────┐  │
/// │  │   Mutex<ServerNode>                │  │
/// │  │ (membership, election, sessions)   │  │
/// │  └────────────────────────────────────┘  │
/// └──────────────────────────────────────────┘
/// ```
pub struct ServerMiddleware {
    /// Configuration loaded from TOML file
    config: ServerConfig,

    /// The single owner of all mutable coordination state
    node: Arc<Mutex<ServerNode>>,

    /// Multicast rendezvous socket (discovery, heartbeats, announcements)
    group: Arc<Endpoint>,

    /// Unicast socket (client traffic, election tokens)
    unicast: Arc<Endpoint>,
}

impl ServerMiddleware {
    /// Bind both sockets and build the initial node state.
    ///
    /// The server identity is `<advertised ip>:<port>`; the IP comes from the
    /// config or is detected from the outbound interface.
    ///
    /// # Example
    /// ```ignore
    /// let config: ServerConfig = load_config("config/server.toml")?;
    /// let middleware = ServerMiddleware::bind(config).await?;
    /// middleware.run().await;
    /// ```
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let unicast = Endpoint::bind_unicast(config.server.port).await?;
        let group = Endpoint::bind_group(&config.network)?;

        let ip = config.server.advertise_ip.unwrap_or_else(detect_local_ip);
        let address = SocketAddr::new(ip, unicast.local_port()?);
        let node = ServerNode::new(address, config.timing.leader_timeout(), Instant::now());

        Ok(Self::from_parts(config, node, group, unicast))
    }

    fn from_parts(config: ServerConfig, node: ServerNode, group: Endpoint, unicast: Endpoint) -> Self {
        Self {
            config,
            node: Arc::new(Mutex::new(node)),
            group: Arc::new(group),
            unicast: Arc::new(unicast),
        }
    }

    /// Main entry point - starts all server tasks and runs forever.
    ///
    /// This method:
    /// 1. Schedules the startup election check after the discovery window
    /// 2. Starts the discover beacon
    /// 3. Starts the group and unicast listeners
    /// 4. Starts the leader-loss monitor and the membership reaper
    ///
    /// Heartbeat loops are spawned separately whenever this server wins a term.
    pub async fn run(&self) {
        {
            let node = self.node.lock().await;
            info!("🚀 Starting Distributed Chat Server...");
            info!("🖥️  Server ID: {}", node.identity());
            info!("🌐 Unicast port: {}", node.address().port());
            info!(
                "📡 Multicast group: {} (discovery port {})",
                self.config.network.multicast_group, self.config.network.discovery_port
            );
        }

        let server = self.clone_arc();
        let window = self
            .config
            .timing
            .jittered(self.config.timing.startup_discovery());
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let work = server.node.lock().await.startup_check();
            server.execute(work).await;
            server.log_status().await;
        });

        let beacon_task = self.emit_discovery();
        let group_task = self.listen_group();
        let unicast_task = self.listen_unicast();
        let monitor_task = self.monitor_leader();
        let reaper_task = self.reap_members();

        // Run all tasks concurrently - if any terminates, log an error
        tokio::select! {
            _ = beacon_task => error!("❌ Discovery beacon task terminated"),
            _ = group_task => error!("❌ Group listener task terminated"),
            _ = unicast_task => error!("❌ Unicast listener task terminated"),
            _ = monitor_task => error!("❌ Leader monitor task terminated"),
            _ = reaper_task => error!("❌ Reaper task terminated"),
        }
    }

    // ========================================================================
    // TASK 1: Multicast discover beacons
    // ========================================================================

    async fn emit_discovery(&self) {
        let group_addr = self.config.network.group_addr();

        loop {
            let beacon = self.node.lock().await.discovery_beacon();
            if let Err(e) = self.group.write_message(&beacon, group_addr).await {
                warn!("⚠️  Failed to send discover beacon: {}", e);
            }

            tokio::time::sleep(
                self.config
                    .timing
                    .jittered(self.config.timing.discovery_interval()),
            )
            .await;
        }
    }

    // ========================================================================
    // TASK 2: Receive discovery, heartbeat and leader traffic
    // ========================================================================

    async fn listen_group(&self) {
        loop {
            match self.group.read_message().await {
                Ok(Some((message, from))) => {
                    debug!("📥 {} from {}", message.kind(), from);
                    let work = self
                        .node
                        .lock()
                        .await
                        .handle_group(message, from.ip(), Instant::now());
                    self.execute(work).await;
                }
                Ok(None) => {}
                Err(e) => error!("❌ Group socket receive error: {}", e),
            }
        }
    }

    // ========================================================================
    // TASK 3: Receive client traffic and election tokens
    // ========================================================================

    async fn listen_unicast(&self) {
        loop {
            match self.unicast.read_message().await {
                Ok(Some((message, from))) => {
                    debug!("📥 {} from {}", message.kind(), from);
                    let work = self.node.lock().await.handle_unicast(message, from);
                    self.execute(work).await;
                }
                Ok(None) => {}
                Err(e) => error!("❌ Server error: {}", e),
            }
        }
    }

    // ========================================================================
    // TASK 4: Leader-loss detection
    // ========================================================================

    async fn monitor_leader(&self) {
        loop {
            tokio::time::sleep(self.config.timing.monitor_interval()).await;
            let work = self.node.lock().await.check_leader(Instant::now());
            self.execute(work).await;
        }
    }

    // ========================================================================
    // TASK 5: Membership reaping
    // ========================================================================

    async fn reap_members(&self) {
        let grace = self.config.timing.grace_period();

        loop {
            tokio::time::sleep(self.config.timing.reaper_interval()).await;
            self.node.lock().await.reap(Instant::now(), grace);
            self.log_status().await;
        }
    }

    // ========================================================================
    // HEARTBEAT (leader only)
    // ========================================================================

    /// Spawn the heartbeat loop for `term`. It ends by itself once the node
    /// is no longer leader of that term.
    fn start_heartbeat(&self, term: u64) {
        let server = self.clone_arc();
        tokio::spawn(async move {
            let group_addr = server.config.network.group_addr();

            loop {
                let Some(heartbeat) = server.node.lock().await.heartbeat(term) else {
                    info!("💤 Heartbeat loop for term {} stopped", term);
                    break;
                };

                match server.group.write_message(&heartbeat, group_addr).await {
                    Ok(()) => debug!("💓 Heartbeat sent by the leader."),
                    Err(e) => warn!("⚠️  Failed to send heartbeat: {}", e),
                }

                tokio::time::sleep(
                    server
                        .config
                        .timing
                        .jittered(server.config.timing.heartbeat_interval()),
                )
                .await;
            }
        });
    }

    // ========================================================================
    // OUTBOUND WORK
    // ========================================================================

    /// Perform the network side effects of one or more state transitions.
    ///
    /// Called without the node lock held. Failures feed back into the node
    /// (evicting hops or sessions), which may queue more work.
    async fn execute(&self, work: Vec<Outbound>) {
        let mut queue: VecDeque<Outbound> = work.into();

        while let Some(item) = queue.pop_front() {
            match item {
                Outbound::Group(message) => {
                    let group_addr = self.config.network.group_addr();
                    if let Err(e) = self.group.write_message(&message, group_addr).await {
                        warn!("⚠️  Failed to multicast {}: {}", message.kind(), e);
                    }
                    if matches!(message, Message::Leader { .. }) {
                        info!("📢 Leader announced.");
                    }
                }
                Outbound::Client(delivery) => {
                    if let Err(e) = self
                        .unicast
                        .write_message(&delivery.message, delivery.address)
                        .await
                    {
                        error!("❌ Send error to {}: {}", delivery.recipient, e);
                        self.node.lock().await.delivery_failed(&delivery, &e);
                    }
                }
                Outbound::Token(route) => {
                    queue.extend(self.forward_token(route).await);
                }
                Outbound::StartHeartbeat { term } => self.start_heartbeat(term),
            }
        }
    }

    /// Hand the token to the first reachable hop of the route.
    ///
    /// Each hop that fails is evicted from the membership table; if none is
    /// reachable the node elects itself.
    async fn forward_token(&self, mut route: TokenRoute) -> Vec<Outbound> {
        let token = Message::Election {
            token: route.token().clone(),
        };

        while let Some(hop) = route.next_hop() {
            match self.unicast.write_message(&token, hop.address).await {
                Ok(()) => {
                    info!("🗳️  Election token {} forwarded to {}", route.token(), hop.identity);
                    return Vec::new();
                }
                Err(e) => {
                    warn!("⚠️  Could not reach {}: {}", hop.identity, e);
                    self.node.lock().await.hop_unreachable(&hop.identity);
                }
            }
        }

        self.node.lock().await.ring_exhausted()
    }

    // ========================================================================
    // HELPER FUNCTIONS
    // ========================================================================

    async fn log_status(&self) {
        let status = self.node.lock().await.status();
        log_status(&status);
    }

    /// Create an Arc-wrapped clone of this server.
    ///
    /// Needed to pass the server into spawned tasks. All shared fields are
    /// already behind `Arc`, so this is cheap.
    fn clone_arc(&self) -> Arc<Self> {
        Arc::new(Self {
            config: self.config.clone(),
            node: self.node.clone(),
            group: self.group.clone(),
            unicast: self.unicast.clone(),
        })
    }
}

fn log_status(status: &NodeStatus) {
    info!(
        "🖥️  Server {} | Leader: {} | Term: {} | Known servers: {} | Clients: {}",
        status.identity,
        if status.is_leader { "✅ Yes" } else { "❌ No" },
        status.term,
        status.known_servers,
        status.clients.len()
    );
    match &status.leader {
        Some(leader) if !status.is_leader => debug!("   └─ Current leader: {}", leader),
        None => debug!("   └─ No leader known"),
        _ => {}
    }
    for (i, (name, address)) in status.clients.iter().enumerate() {
        info!("  {}. {} ({})", i + 1, name, address);
    }
}
