//! # Ring Election
//!
//! Leader election by token circulation over a logical ring of the known
//! servers, ordered by identity. The token carries the best (highest)
//! candidate seen so far; every node either passes it on unchanged or
//! replaces it with its own identity when it is higher. The token that
//! comes back to the node it names has beaten every reachable identity, and
//! that node becomes leader.
//!
//! This module holds the pure decision logic. Network forwarding, eviction of
//! unreachable hops and leadership side effects live in
//! [`ServerNode`](super::node::ServerNode) and the middleware.
//!
//! ## Ring Example
//!
//! ```text
//! A < B < C          A initiates with token A
//! A -(A)-> B         B > A: B replaces, forwards B
//! B -(B)-> C         C > B: C replaces, forwards C
//! C -(C)-> A -(C)-> B -(C)-> C
//!                    C receives its own identity: C is elected
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;

use super::membership::MembershipTable;
use crate::common::messages::ServerId;

/// A ring position: identity plus the unicast address tokens are sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMember {
    pub identity: ServerId,
    pub address: SocketAddr,
}

/// Immutable snapshot of the ring taken at the start of a forwarding
/// decision. Later table mutations do not change the computed hops.
#[derive(Debug, Clone)]
pub struct Ring {
    members: Vec<RingMember>,
}

impl Ring {
    /// Snapshot every record in the table, ordered by identity.
    pub fn snapshot(table: &MembershipTable) -> Self {
        // BTreeMap iteration is already identity-ordered
        let members = table
            .iter()
            .map(|r| RingMember {
                identity: r.identity.clone(),
                address: r.address,
            })
            .collect();
        Self { members }
    }

    /// Every other member in ring order, starting right after `of` and
    /// wrapping around. Empty when `of` is the only member or not a member.
    pub fn successors(&self, of: &ServerId) -> Vec<RingMember> {
        let Some(position) = self.members.iter().position(|m| m.identity == *of) else {
            return Vec::new();
        };

        let n = self.members.len();
        (1..n)
            .map(|offset| self.members[(position + offset) % n].clone())
            .collect()
    }
}

/// What a node does with an incoming token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    /// Pass this candidate to the next ring member.
    Forward(ServerId),
    /// The token came back naming us: we won the round.
    Elect,
    /// A re-delivery, or a candidate no better than the one we already
    /// forwarded this round.
    Drop,
}

/// Judge a token against the local identity and this round's vote.
///
/// `voted_for` is the candidate this node last forwarded in the current
/// round (`None` if it has not voted). A node that has voted only lets a
/// strictly better candidate through, which drops duplicate deliveries
/// while still letting the round's maximum finish its lap.
pub fn judge_token(local: &ServerId, voted_for: Option<&ServerId>, token: &ServerId) -> TokenVerdict {
    if token == local {
        return TokenVerdict::Elect;
    }
    if let Some(voted) = voted_for {
        if token <= voted {
            return TokenVerdict::Drop;
        }
    }
    if token > local {
        TokenVerdict::Forward(token.clone())
    } else {
        TokenVerdict::Forward(local.clone())
    }
}

/// Ordered list of hops to try for one token.
///
/// The first hop that accepts the datagram ends the walk. A hop that fails
/// is evicted by the caller and the next one is tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRoute {
    token: ServerId,
    hops: VecDeque<RingMember>,
}

impl TokenRoute {
    pub fn new(token: ServerId, hops: impl IntoIterator<Item = RingMember>) -> Self {
        Self {
            token,
            hops: hops.into_iter().collect(),
        }
    }

    pub fn token(&self) -> &ServerId {
        &self.token
    }

    /// Next candidate hop, in ring order.
    pub fn next_hop(&mut self) -> Option<RingMember> {
        self.hops.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.hops.len()
    }
}

/// Outcome of planning one forwarding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPlan {
    /// Someone else already claims leadership; no election needed.
    LeaderKnown(ServerId),
    /// We are alone in the ring: elect ourselves.
    Solitary,
    /// Send the token along this route.
    Route(TokenRoute),
}

/// Decide how to move `token` onward from `local`.
pub fn plan_round(table: &MembershipTable, local: &ServerId, token: ServerId) -> RoundPlan {
    if let Some(leader) = table.remote_leader() {
        return RoundPlan::LeaderKnown(leader.identity.clone());
    }

    let ring = Ring::snapshot(table);
    let hops = ring.successors(local);
    if hops.is_empty() {
        return RoundPlan::Solitary;
    }
    RoundPlan::Route(TokenRoute::new(token, hops))
}
