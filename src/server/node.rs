//! # Server Node State
//!
//! Everything one server knows, owned by one value and mutated one message
//! at a time: the membership table, the leader-only session registry and the
//! local leadership state (leader flag, election vote, leader-signal watch).
//!
//! The middleware keeps a `ServerNode` behind a single mutex. Each handler
//! applies one incoming event atomically and returns the [`Outbound`] work
//! it implies; the caller releases the lock before touching the network.
//!
//! ```text
//!  group socket ──► handle_group ─┐
//!  unicast socket ► handle_unicast├─► ServerNode ──► Vec<Outbound> ──► sockets
//!  timers ────────► check_leader ─┘      (locked)        (unlocked)
//! ```

use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use super::election::{judge_token, plan_round, RoundPlan, TokenRoute, TokenVerdict};
use super::membership::{MembershipTable, Upsert};
use super::registry::{Delivery, SessionRegistry};
use crate::common::error::ChatError;
use crate::common::messages::{ClientId, Message, ServerId};
use crate::common::watch::LeaderWatch;

/// Network work produced by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Multicast to the rendezvous group.
    Group(Message),
    /// Unicast to one client; a failed send evicts the session.
    Client(Delivery),
    /// Walk an election token along the ring.
    Token(TokenRoute),
    /// Start the heartbeat loop for a freshly won term.
    StartHeartbeat { term: u64 },
}

/// Per-server leadership state.
#[derive(Debug, Clone)]
pub struct LocalLeaderState {
    pub is_leader: bool,
    /// Candidate this node forwarded in the current round; `None` until it votes.
    pub voted_for: Option<ServerId>,
    /// Age of the last leadership-flagged datagram from another server
    pub watch: LeaderWatch,
}

/// Snapshot for the periodic status log.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub identity: ServerId,
    pub is_leader: bool,
    pub term: u64,
    pub leader: Option<ServerId>,
    pub known_servers: usize,
    /// `(display name, address)` of each connected client
    pub clients: Vec<(String, SocketAddr)>,
}

/// One server's complete coordination state.
pub struct ServerNode {
    identity: ServerId,
    address: SocketAddr,
    membership: MembershipTable,
    sessions: SessionRegistry,
    leader: LocalLeaderState,
    /// Number of terms this node has won; heartbeat loops are tied to one
    term: u64,
}

impl ServerNode {
    /// Create a node that knows only itself.
    pub fn new(address: SocketAddr, leader_timeout: Duration, now: Instant) -> Self {
        let identity = ServerId::from_endpoint(address.ip(), address.port());
        Self {
            membership: MembershipTable::new(identity.clone(), address, now),
            identity,
            address,
            sessions: SessionRegistry::new(),
            leader: LocalLeaderState {
                is_leader: false,
                voted_for: None,
                watch: LeaderWatch::new(leader_timeout, now),
            },
            term: 0,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn identity(&self) -> &ServerId {
        &self.identity
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader
    }

    pub fn has_voted(&self) -> bool {
        self.leader.voted_for.is_some()
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn membership(&self) -> &MembershipTable {
        &self.membership
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Who this node currently believes leads, itself included.
    pub fn leader_identity(&self) -> Option<ServerId> {
        if self.leader.is_leader {
            return Some(self.identity.clone());
        }
        self.membership.remote_leader().map(|r| r.identity.clone())
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            identity: self.identity.clone(),
            is_leader: self.leader.is_leader,
            term: self.term,
            leader: self.leader_identity(),
            known_servers: self.membership.len(),
            clients: self
                .sessions
                .sessions()
                .map(|s| (s.display_name.clone(), s.address))
                .collect(),
        }
    }

    // ========================================================================
    // OUTGOING BEACONS
    // ========================================================================

    /// The periodic presence beacon.
    pub fn discovery_beacon(&self) -> Message {
        Message::Discover {
            id: self.identity.clone(),
            port: self.address.port(),
            is_leader: self.leader.is_leader,
        }
    }

    /// A heartbeat for `term`, or `None` once that term is over.
    pub fn heartbeat(&self, term: u64) -> Option<Message> {
        (self.leader.is_leader && self.term == term).then(|| Message::Heartbeat {
            id: self.identity.clone(),
            port: self.address.port(),
        })
    }

    // ========================================================================
    // INBOUND DISPATCH
    // ========================================================================

    /// Apply one datagram received on the multicast group socket.
    pub fn handle_group(&mut self, message: Message, from: IpAddr, now: Instant) -> Vec<Outbound> {
        match message {
            Message::Discover { id, port, is_leader } => {
                self.on_discover(id, SocketAddr::new(from, port), is_leader, now)
            }
            Message::Heartbeat { id, port } => self.on_heartbeat(id, SocketAddr::new(from, port), now),
            Message::Leader { id, port } => self.on_leader(id, SocketAddr::new(from, port), now),
            other @ (Message::Election { .. }
            | Message::Join { .. }
            | Message::Welcome { .. }
            | Message::Chat { .. }
            | Message::Notice { .. }
            | Message::Leave { .. }) => {
                debug!("Ignoring {} on the group socket", other.kind());
                Vec::new()
            }
        }
    }

    /// Apply one datagram received on the unicast socket.
    pub fn handle_unicast(&mut self, message: Message, from: SocketAddr) -> Vec<Outbound> {
        match message {
            Message::Election { token } => self.on_election_token(token),
            Message::Join { id, port } => self.on_join(id, SocketAddr::new(from.ip(), port)),
            Message::Chat {
                id: Some(id), text, ..
            } => self.on_chat(&id, &text),
            Message::Leave { id } => self.on_leave(&id),
            other @ (Message::Chat { id: None, .. }
            | Message::Discover { .. }
            | Message::Heartbeat { .. }
            | Message::Leader { .. }
            | Message::Welcome { .. }
            | Message::Notice { .. }) => {
                debug!("Ignoring {} from {} on the unicast socket", other.kind(), from);
                Vec::new()
            }
        }
    }

    // ========================================================================
    // DISCOVERY & LEADERSHIP SIGNALS
    // ========================================================================

    fn on_discover(&mut self, id: ServerId, address: SocketAddr, is_leader: bool, now: Instant) -> Vec<Outbound> {
        if id == self.identity {
            return Vec::new();
        }

        let outcome = self.membership.upsert(&id, address, Some(is_leader), now);
        if is_leader {
            debug!("Leader discovery received from {}", id);
            self.note_leader_claim(&id, now);
        }

        if outcome == Upsert::Inserted {
            info!("🔍 Discovered new server: {} ({})", id, address);
            if !self.leader.is_leader && !self.membership.any_leader() {
                info!("New server discovered and no leader exists. Initiating leader election...");
                return self.initiate_election();
            }
        }
        Vec::new()
    }

    fn on_heartbeat(&mut self, id: ServerId, address: SocketAddr, now: Instant) -> Vec<Outbound> {
        if id == self.identity {
            return Vec::new();
        }

        self.membership.upsert(&id, address, Some(true), now);
        self.note_leader_claim(&id, now);
        debug!("💓 Heartbeat received from leader {}", id);
        Vec::new()
    }

    fn on_leader(&mut self, id: ServerId, address: SocketAddr, now: Instant) -> Vec<Outbound> {
        // any announcement closes the round
        self.leader.voted_for = None;
        if id == self.identity {
            return Vec::new();
        }

        info!("👑 Server {} has been elected as leader.", id);
        self.membership.upsert(&id, address, Some(true), now);
        self.leader.watch.observe(now);
        if self.leader.is_leader {
            self.step_down();
        }
        self.membership.set_leader(&id);
        Vec::new()
    }

    /// A leadership-flagged signal from another server.
    ///
    /// A follower adopts the claimant. A leader yields only to a higher
    /// identity, so two leaders that find each other converge on one.
    fn note_leader_claim(&mut self, id: &ServerId, now: Instant) {
        self.leader.watch.observe(now);
        if self.leader.is_leader {
            if *id > self.identity {
                warn!("⚠️  Server {} also claims leadership and outranks us; stepping down", id);
                self.step_down();
                self.membership.set_leader(id);
            }
        } else {
            self.membership.set_leader(id);
        }
    }

    fn step_down(&mut self) {
        info!(
            "Server {} ends term {}; dropping {} client session(s)",
            self.identity,
            self.term,
            self.sessions.len()
        );
        self.leader.is_leader = false;
        self.sessions.reset();
    }

    // ========================================================================
    // ELECTION
    // ========================================================================

    /// Start a round with our own identity as the token.
    pub fn initiate_election(&mut self) -> Vec<Outbound> {
        if self.leader.is_leader {
            return Vec::new();
        }
        info!("🗳️  Server {} starting leader election...", self.identity);
        self.leader.voted_for = Some(self.identity.clone());
        self.circulate(self.identity.clone())
    }

    fn on_election_token(&mut self, token: ServerId) -> Vec<Outbound> {
        if self.leader.is_leader {
            debug!("Already leader; dropping election token {}", token);
            return Vec::new();
        }

        match judge_token(&self.identity, self.leader.voted_for.as_ref(), &token) {
            TokenVerdict::Drop => {
                debug!("Already voted this round; dropping token {}", token);
                Vec::new()
            }
            TokenVerdict::Elect => {
                if let Some(leader) = self.membership.remote_leader() {
                    info!("Token came home but {} already leads; ignoring", leader.identity);
                    return Vec::new();
                }
                info!("🎉 Token {} returned: I was elected as leader!", token);
                self.become_leader()
            }
            TokenVerdict::Forward(candidate) => {
                self.leader.voted_for = Some(candidate.clone());
                self.circulate(candidate)
            }
        }
    }

    fn circulate(&mut self, token: ServerId) -> Vec<Outbound> {
        match plan_round(&self.membership, &self.identity, token) {
            RoundPlan::LeaderKnown(leader) => {
                info!("Leader already exists: {}. Not becoming leader.", leader);
                Vec::new()
            }
            RoundPlan::Solitary => {
                info!("Only one server in the ring. I will become leader.");
                self.become_leader()
            }
            RoundPlan::Route(route) => {
                debug!(
                    "Forwarding token {} ({} candidate hop(s))",
                    route.token(),
                    route.remaining()
                );
                vec![Outbound::Token(route)]
            }
        }
    }

    /// A token hop could not be reached: forget that server.
    pub fn hop_unreachable(&mut self, identity: &ServerId) {
        if self.membership.evict(identity).is_some() {
            warn!("❌ Removing unreachable server {}", identity);
        }
    }

    /// Every hop of a route failed.
    pub fn ring_exhausted(&mut self) -> Vec<Outbound> {
        if self.membership.remote_leader().is_some() {
            return Vec::new();
        }
        info!("No reachable server in the ring. I will become leader.");
        self.become_leader()
    }

    fn become_leader(&mut self) -> Vec<Outbound> {
        if self.leader.is_leader {
            return Vec::new();
        }

        self.leader.is_leader = true;
        self.leader.voted_for = Some(self.identity.clone());
        self.term += 1;
        self.sessions.reset();
        self.membership.set_leader(&self.identity);
        info!("👑 Server {} is now LEADER (term {})", self.identity, self.term);

        vec![
            Outbound::Group(Message::Leader {
                id: self.identity.clone(),
                port: self.address.port(),
            }),
            Outbound::StartHeartbeat { term: self.term },
        ]
    }

    // ========================================================================
    // FAILURE DETECTION
    // ========================================================================

    /// Leader-loss check, run on every monitor tick.
    ///
    /// While the signal stays stale each tick starts a fresh round, which
    /// also retries rounds whose tokens were lost in transit.
    pub fn check_leader(&mut self, now: Instant) -> Vec<Outbound> {
        if self.leader.is_leader || !self.leader.watch.expired(now) {
            return Vec::new();
        }

        warn!(
            "⚠️  Leader unresponsive for {:.1}s. Initiating leader election.",
            self.leader.watch.age(now).as_secs_f64()
        );
        self.membership.clear_leader_flags();
        self.leader.voted_for = None;
        self.initiate_election()
    }

    /// Election check after the startup discovery window.
    pub fn startup_check(&mut self) -> Vec<Outbound> {
        if self.leader.is_leader {
            return Vec::new();
        }
        match self.membership.remote_leader() {
            Some(leader) => {
                info!("Leader already exists: {}", leader.identity);
                Vec::new()
            }
            None => {
                info!("No leader found at startup. Initiating leader election...");
                self.initiate_election()
            }
        }
    }

    /// Evict peers silent for longer than `grace`.
    pub fn reap(&mut self, now: Instant, grace: Duration) -> Vec<ServerId> {
        let evicted = self.membership.reap(now, grace);
        for identity in &evicted {
            warn!("❌ Removing dead server {} from servers.", identity);
        }
        evicted
    }

    // ========================================================================
    // CLIENT SESSIONS (leader only)
    // ========================================================================

    fn on_join(&mut self, id: ClientId, address: SocketAddr) -> Vec<Outbound> {
        if !self.leader.is_leader {
            debug!("Not leader; ignoring join from {}", address);
            return Vec::new();
        }
        Self::deliveries(self.sessions.join(id, address))
    }

    fn on_chat(&mut self, id: &ClientId, text: &str) -> Vec<Outbound> {
        if !self.leader.is_leader {
            debug!("Not leader; ignoring message from {}", id);
            return Vec::new();
        }
        Self::deliveries(self.sessions.relay(id, text))
    }

    fn on_leave(&mut self, id: &ClientId) -> Vec<Outbound> {
        if !self.leader.is_leader {
            return Vec::new();
        }
        Self::deliveries(self.sessions.leave(id))
    }

    /// A delivery could not be sent.
    ///
    /// Only a socket error means the recipient is unreachable and costs it
    /// its session; a message that cannot be encoded says nothing about the
    /// client and is just dropped.
    pub fn delivery_failed(&mut self, delivery: &Delivery, error: &ChatError) {
        match error {
            ChatError::Io(_) => self.drop_session(&delivery.recipient),
            other => warn!(
                "⚠️  Dropped {} for {}: {}",
                delivery.message.kind(),
                delivery.recipient,
                other
            ),
        }
    }

    fn drop_session(&mut self, id: &ClientId) {
        if let Some(session) = self.sessions.remove(id) {
            warn!("❌ Dropping unreachable client {} ({})", session.display_name, session.address);
        }
    }

    fn deliveries(deliveries: Vec<Delivery>) -> Vec<Outbound> {
        deliveries.into_iter().map(Outbound::Client).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn node(last: u8, now: Instant) -> ServerNode {
        ServerNode::new(SocketAddr::from(([10, 0, 0, last], 5001)), TIMEOUT, now)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn discover(last: u8, is_leader: bool) -> Message {
        Message::Discover {
            id: ServerId::from_endpoint(ip(last), 5001),
            port: 5001,
            is_leader,
        }
    }

    #[test]
    fn test_identity_is_ip_and_port() {
        let n = node(4, Instant::now());
        assert_eq!(n.identity().as_str(), "10.0.0.4:5001");
    }

    #[test]
    fn test_solitary_node_elects_itself() {
        let now = Instant::now();
        let mut n = node(1, now);

        let out = n.startup_check();
        assert!(n.is_leader());
        assert!(n.has_voted());
        assert_eq!(n.term(), 1);
        assert!(matches!(&out[0], Outbound::Group(Message::Leader { .. })));
        assert_eq!(out[1], Outbound::StartHeartbeat { term: 1 });
        assert!(n.heartbeat(1).is_some());
        assert!(n.heartbeat(2).is_none());
    }

    #[test]
    fn test_new_peer_without_leader_triggers_election() {
        let now = Instant::now();
        let mut n = node(1, now);

        let out = n.handle_group(discover(2, false), ip(2), now);
        assert!(matches!(&out[..], [Outbound::Token(route)] if route.token() == n.identity()));

        // a second beacon from the same peer is just a refresh
        assert!(n.handle_group(discover(2, false), ip(2), now).is_empty());
    }

    #[test]
    fn test_new_peer_with_leader_known_does_not_elect() {
        let now = Instant::now();
        let mut n = node(1, now);
        n.handle_group(discover(3, true), ip(3), now);

        assert!(n.handle_group(discover(2, false), ip(2), now).is_empty());
        assert_eq!(n.leader_identity().unwrap().as_str(), "10.0.0.3:5001");
    }

    #[test]
    fn test_own_beacon_is_ignored() {
        let now = Instant::now();
        let mut n = node(1, now);
        assert!(n.handle_group(discover(1, false), ip(1), now).is_empty());
        assert_eq!(n.membership().len(), 1);
    }

    #[test]
    fn test_leader_signals_refresh_watch() {
        let t0 = Instant::now();
        let mut n = node(1, t0);
        let leader = Message::Heartbeat {
            id: ServerId::from_endpoint(ip(9), 5001),
            port: 5001,
        };

        let t1 = t0 + Duration::from_secs(14);
        n.handle_group(leader, ip(9), t1);
        assert!(n.check_leader(t0 + Duration::from_secs(20)).is_empty());
        assert_eq!(n.leader_identity().unwrap().as_str(), "10.0.0.9:5001");
    }

    #[test]
    fn test_leader_loss_clears_leader_and_starts_round() {
        let t0 = Instant::now();
        let mut n = node(1, t0);
        n.handle_group(discover(2, false), ip(2), t0);
        n.handle_group(discover(9, true), ip(9), t0);
        assert!(n.leader_identity().is_some());

        let out = n.check_leader(t0 + Duration::from_secs(16));
        assert!(n.leader_identity().is_none());
        assert!(matches!(&out[..], [Outbound::Token(_)]));
    }

    #[test]
    fn test_announcement_resets_vote_and_demotes_leader() {
        let now = Instant::now();
        let mut n = node(5, now);
        n.startup_check();
        assert!(n.is_leader());

        let announce = Message::Leader {
            id: ServerId::from_endpoint(ip(2), 5001),
            port: 5001,
        };
        n.handle_group(announce, ip(2), now);

        assert!(!n.is_leader());
        assert!(!n.has_voted());
        assert_eq!(n.leader_identity().unwrap().as_str(), "10.0.0.2:5001");
        assert!(n.sessions().is_empty());
    }

    #[test]
    fn test_leader_yields_only_to_higher_heartbeat() {
        let now = Instant::now();
        let mut n = node(5, now);
        n.startup_check();

        let lower = Message::Heartbeat {
            id: ServerId::from_endpoint(ip(3), 5001),
            port: 5001,
        };
        n.handle_group(lower, ip(3), now);
        assert!(n.is_leader());

        let higher = Message::Heartbeat {
            id: ServerId::from_endpoint(ip(8), 5001),
            port: 5001,
        };
        n.handle_group(higher, ip(8), now);
        assert!(!n.is_leader());
        assert_eq!(n.leader_identity().unwrap().as_str(), "10.0.0.8:5001");
    }

    #[test]
    fn test_client_traffic_ignored_unless_leader() {
        let now = Instant::now();
        let mut n = node(1, now);
        let join = Message::Join {
            id: ClientId::new("c1"),
            port: 40000,
        };
        let from = SocketAddr::from(([192, 168, 0, 9], 40000));

        assert!(n.handle_unicast(join.clone(), from).is_empty());

        n.startup_check();
        let out = n.handle_unicast(join, from);
        assert!(matches!(
            &out[..],
            [Outbound::Client(Delivery { message: Message::Welcome { name }, .. })] if name == "Client 1"
        ));
    }

    #[test]
    fn test_join_address_uses_source_ip_and_advertised_port() {
        let now = Instant::now();
        let mut n = node(1, now);
        n.startup_check();

        let join = Message::Join {
            id: ClientId::new("c1"),
            port: 41000,
        };
        n.handle_unicast(join, SocketAddr::from(([192, 168, 0, 9], 55555)));
        let session = n.sessions().get(&ClientId::new("c1")).unwrap();
        assert_eq!(session.address, SocketAddr::from(([192, 168, 0, 9], 41000)));
    }

    #[test]
    fn test_only_socket_errors_evict_the_recipient() {
        let now = Instant::now();
        let mut n = node(1, now);
        n.startup_check();
        let from = SocketAddr::from(([192, 168, 0, 9], 40000));
        n.handle_unicast(Message::Join { id: ClientId::new("c1"), port: 40000 }, from);

        let delivery = Delivery {
            recipient: ClientId::new("c1"),
            address: from,
            message: Message::relay("Client 2", "hi"),
        };
        let too_large = ChatError::TooLarge { size: 5000, max: 4096 };
        n.delivery_failed(&delivery, &too_large);
        assert_eq!(n.sessions().len(), 1);

        let refused = ChatError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        n.delivery_failed(&delivery, &refused);
        assert!(n.sessions().is_empty());
    }

    #[test]
    fn test_status_snapshot() {
        let now = Instant::now();
        let mut n = node(1, now);
        n.handle_group(discover(2, true), ip(2), now);

        let status = n.status();
        assert!(!status.is_leader);
        assert_eq!(status.known_servers, 2);
        assert_eq!(status.leader.unwrap().as_str(), "10.0.0.2:5001");
        assert!(status.clients.is_empty());
    }
}
