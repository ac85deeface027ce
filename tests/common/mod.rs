//! In-memory cluster for driving several `ServerNode`s without sockets.
//!
//! Group datagrams reach every other live node, election tokens walk their
//! hops (a stopped node counts as unreachable) and client deliveries are
//! collected for inspection. Heartbeat loops are not simulated; call
//! [`Cluster::heartbeat_round`] instead.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use lan_chat::common::messages::{ClientId, Message, ServerId};
use lan_chat::server::node::{Outbound, ServerNode};
use lan_chat::server::registry::Delivery;

pub const LEADER_TIMEOUT: Duration = Duration::from_secs(15);
pub const GRACE_PERIOD: Duration = Duration::from_secs(20);

pub fn server_addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 5001))
}

pub fn server_id(last: u8) -> ServerId {
    let addr = server_addr(last);
    ServerId::from_endpoint(addr.ip(), addr.port())
}

pub fn client_addr(last: u8) -> SocketAddr {
    SocketAddr::from(([192, 168, 0, last], 40000 + last as u16))
}

pub struct Cluster {
    pub nodes: Vec<ServerNode>,
    pub now: Instant,
    /// Client deliveries produced so far, in order
    pub deliveries: Vec<Delivery>,
    /// When set, election tokens vanish in transit
    pub lose_tokens: bool,
    down: HashSet<usize>,
}

impl Cluster {
    pub fn new(lasts: &[u8]) -> Self {
        let now = Instant::now();
        Self {
            nodes: lasts
                .iter()
                .map(|&last| ServerNode::new(server_addr(last), LEADER_TIMEOUT, now))
                .collect(),
            now,
            deliveries: Vec::new(),
            lose_tokens: false,
            down: HashSet::new(),
        }
    }

    /// Start a cluster where every node knows every other node but no
    /// election has completed: the first beacons' tokens are lost.
    pub fn fully_meshed(lasts: &[u8]) -> Self {
        let mut cluster = Self::new(lasts);
        cluster.lose_tokens = true;
        cluster.beacon_round();
        cluster.lose_tokens = false;
        cluster
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Stop a node: it neither sends nor receives from now on.
    pub fn stop(&mut self, index: usize) {
        self.down.insert(index);
    }

    /// Bring a stopped node back with the state it had.
    pub fn resume(&mut self, index: usize) {
        self.down.remove(&index);
    }

    pub fn is_live(&self, index: usize) -> bool {
        !self.down.contains(&index)
    }

    fn live(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.is_live(i)).collect()
    }

    pub fn beacon_round(&mut self) {
        for i in self.live() {
            let beacon = self.nodes[i].discovery_beacon();
            self.pump(i, vec![Outbound::Group(beacon)]);
        }
    }

    pub fn heartbeat_round(&mut self) {
        for i in self.live() {
            let term = self.nodes[i].term();
            if let Some(heartbeat) = self.nodes[i].heartbeat(term) {
                self.pump(i, vec![Outbound::Group(heartbeat)]);
            }
        }
    }

    pub fn startup(&mut self) {
        for i in self.live() {
            let work = self.nodes[i].startup_check();
            self.pump(i, work);
        }
    }

    pub fn monitor_round(&mut self) {
        for i in self.live() {
            let work = self.nodes[i].check_leader(self.now);
            self.pump(i, work);
        }
    }

    pub fn reap_round(&mut self) {
        for i in self.live() {
            self.nodes[i].reap(self.now, GRACE_PERIOD);
        }
    }

    /// Identities of live nodes that consider themselves leader.
    pub fn leaders(&self) -> Vec<ServerId> {
        self.live()
            .into_iter()
            .filter(|&i| self.nodes[i].is_leader())
            .map(|i| self.nodes[i].identity().clone())
            .collect()
    }

    /// The leader every live node agrees on, if they all agree.
    pub fn agreed_leader(&self) -> Option<ServerId> {
        let views: HashSet<Option<ServerId>> = self
            .live()
            .into_iter()
            .map(|i| self.nodes[i].leader_identity())
            .collect();
        match views.len() {
            1 => views.into_iter().next().flatten(),
            _ => None,
        }
    }

    /// Deliver a unicast datagram from a client to node `index`.
    pub fn client_sends(&mut self, index: usize, message: Message, from: SocketAddr) {
        let work = self.nodes[index].handle_unicast(message, from);
        self.pump(index, work);
    }

    pub fn join(&mut self, index: usize, client: &ClientId, last: u8) {
        let from = client_addr(last);
        let join = Message::Join {
            id: client.clone(),
            port: from.port(),
        };
        self.client_sends(index, join, from);
    }

    /// Deliveries addressed to `client`, oldest first.
    pub fn inbox(&self, client: &ClientId) -> Vec<&Message> {
        self.deliveries
            .iter()
            .filter(|d| &d.recipient == client)
            .map(|d| &d.message)
            .collect()
    }

    fn index_of(&self, identity: &ServerId) -> Option<usize> {
        self.nodes.iter().position(|n| n.identity() == identity)
    }

    fn ip(&self, index: usize) -> IpAddr {
        self.nodes[index].address().ip()
    }

    /// Run `work` produced by node `from`, and everything it triggers.
    fn pump(&mut self, from: usize, work: Vec<Outbound>) {
        let mut queue: VecDeque<(usize, Outbound)> =
            work.into_iter().map(|item| (from, item)).collect();

        while let Some((source, item)) = queue.pop_front() {
            match item {
                Outbound::Group(message) => {
                    for j in self.live() {
                        if j == source {
                            continue;
                        }
                        let sender_ip = self.ip(source);
                        let out = self.nodes[j].handle_group(message.clone(), sender_ip, self.now);
                        queue.extend(out.into_iter().map(|o| (j, o)));
                    }
                }
                Outbound::Client(delivery) => self.deliveries.push(delivery),
                Outbound::Token(mut route) => {
                    if self.lose_tokens {
                        continue;
                    }
                    let token = Message::Election {
                        token: route.token().clone(),
                    };
                    let sender = self.nodes[source].address();
                    loop {
                        match route.next_hop() {
                            Some(hop) => match self.index_of(&hop.identity) {
                                Some(j) if self.is_live(j) => {
                                    let out = self.nodes[j].handle_unicast(token.clone(), sender);
                                    queue.extend(out.into_iter().map(|o| (j, o)));
                                    break;
                                }
                                _ => self.nodes[source].hop_unreachable(&hop.identity),
                            },
                            None => {
                                let out = self.nodes[source].ring_exhausted();
                                queue.extend(out.into_iter().map(|o| (source, o)));
                                break;
                            }
                        }
                    }
                }
                Outbound::StartHeartbeat { .. } => {}
            }
        }
    }
}
