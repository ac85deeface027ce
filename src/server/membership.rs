//! # Membership Table
//!
//! Each server's view of the other servers on the segment, fed by discover
//! beacons, heartbeats and leadership announcements. The table always holds
//! the local server's own record, which the reaper never evicts.

use log::info;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::messages::ServerId;

/// One known server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub identity: ServerId,
    /// Unicast endpoint (source IP of its datagrams, advertised port)
    pub address: SocketAddr,
    pub is_leader: bool,
    pub last_seen: Instant,
}

/// What an upsert did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A server nobody knew about.
    Inserted,
    /// A known address re-announced under a new identity (process restart).
    Rebound { previous: ServerId },
    /// An existing record was refreshed.
    Refreshed,
}

/// Known servers keyed by identity, iterated in identity order.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    local: ServerId,
    peers: BTreeMap<ServerId, PeerRecord>,
}

impl MembershipTable {
    pub fn new(local: ServerId, address: SocketAddr, now: Instant) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(
            local.clone(),
            PeerRecord {
                identity: local.clone(),
                address,
                is_leader: false,
                last_seen: now,
            },
        );
        Self { local, peers }
    }

    /// Record a sighting of `identity` at `address`.
    ///
    /// `is_leader` overwrites the stored flag when the datagram carried one;
    /// `None` leaves it untouched. If the identity is unknown but another
    /// record already owns the address, that record is re-keyed in place.
    pub fn upsert(
        &mut self,
        identity: &ServerId,
        address: SocketAddr,
        is_leader: Option<bool>,
        now: Instant,
    ) -> Upsert {
        if let Some(record) = self.peers.get_mut(identity) {
            record.address = address;
            record.last_seen = now;
            if let Some(flag) = is_leader {
                record.is_leader = flag;
            }
            return Upsert::Refreshed;
        }

        let previous = self
            .peers
            .values()
            .find(|r| r.address == address && r.identity != self.local)
            .map(|r| r.identity.clone());

        match previous {
            Some(previous) => {
                let mut record = self
                    .peers
                    .remove(&previous)
                    .unwrap_or_else(|| Self::fresh(identity, address, now));
                record.identity = identity.clone();
                record.last_seen = now;
                if let Some(flag) = is_leader {
                    record.is_leader = flag;
                }
                self.peers.insert(identity.clone(), record);
                info!("🔁 Server at {} restarted as {} (was {})", address, identity, previous);
                Upsert::Rebound { previous }
            }
            None => {
                let mut record = Self::fresh(identity, address, now);
                record.is_leader = is_leader.unwrap_or(false);
                self.peers.insert(identity.clone(), record);
                Upsert::Inserted
            }
        }
    }

    fn fresh(identity: &ServerId, address: SocketAddr, now: Instant) -> PeerRecord {
        PeerRecord {
            identity: identity.clone(),
            address,
            is_leader: false,
            last_seen: now,
        }
    }

    /// Mark `leader` as the only record claiming leadership.
    pub fn set_leader(&mut self, leader: &ServerId) {
        for record in self.peers.values_mut() {
            record.is_leader = record.identity == *leader;
        }
    }

    /// Forget who the leader is.
    pub fn clear_leader_flags(&mut self) {
        for record in self.peers.values_mut() {
            record.is_leader = false;
        }
    }

    /// Any record (including our own) claiming leadership.
    pub fn any_leader(&self) -> bool {
        self.peers.values().any(|r| r.is_leader)
    }

    /// The first record other than ours that claims leadership.
    pub fn remote_leader(&self) -> Option<&PeerRecord> {
        self.peers
            .values()
            .find(|r| r.is_leader && r.identity != self.local)
    }

    /// Remove a record. The local record cannot be evicted.
    pub fn evict(&mut self, identity: &ServerId) -> Option<PeerRecord> {
        if *identity == self.local {
            return None;
        }
        self.peers.remove(identity)
    }

    /// Evict every remote record silent for longer than `grace`.
    ///
    /// Leadership does not protect a record; returns the evicted identities.
    pub fn reap(&mut self, now: Instant, grace: Duration) -> Vec<ServerId> {
        let stale: Vec<ServerId> = self
            .peers
            .values()
            .filter(|r| r.identity != self.local)
            .filter(|r| now.saturating_duration_since(r.last_seen) > grace)
            .map(|r| r.identity.clone())
            .collect();

        for identity in &stale {
            self.peers.remove(identity);
        }
        stale
    }

    pub fn get(&self, identity: &ServerId) -> Option<&PeerRecord> {
        self.peers.get(identity)
    }

    pub fn contains(&self, identity: &ServerId) -> bool {
        self.peers.contains_key(identity)
    }

    /// Records in identity order, our own included.
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Number of known servers, our own record included; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

}
